//! Copy availability state machine.
//!
//! All status changes to a [`BookCopy`] go through [`transition`], which
//! enforces both that the copy is currently in the state the caller believes
//! it is, and that the requested edge is legal. Legal edges live on
//! [`CopyStatus::can_transition_to`].

use common::CopyId;
use store::{BookCopy, CopyStatus, StoreTx};

use crate::error::{CirculationError, Result};

/// Moves a copy from `from_expected` to `to` inside the given transaction.
///
/// Fails with [`CirculationError::InvalidTransition`] when the copy is not in
/// `from_expected` (stale caller view) or the edge itself is illegal.
pub async fn transition(
    tx: &mut dyn StoreTx,
    copy_id: CopyId,
    from_expected: CopyStatus,
    to: CopyStatus,
) -> Result<BookCopy> {
    let mut copy = tx
        .copy(copy_id)
        .await?
        .ok_or_else(|| CirculationError::not_found("copy", copy_id))?;

    if copy.status != from_expected {
        return Err(CirculationError::invalid_transition(
            "copy",
            copy.status,
            to,
        ));
    }
    if !from_expected.can_transition_to(to) {
        return Err(CirculationError::invalid_transition(
            "copy",
            from_expected,
            to,
        ));
    }

    tracing::debug!(%copy_id, from = %from_expected, to = %to, "copy transition");
    copy.status = to;
    tx.update_copy(copy.clone()).await?;
    Ok(copy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::BookId;
    use store::{InMemoryStore, Store};

    async fn seeded_copy(store: &InMemoryStore) -> BookCopy {
        store.add_copy(BookId::new()).await
    }

    #[tokio::test]
    async fn test_legal_transition_persists() {
        let store = InMemoryStore::new();
        let copy = seeded_copy(&store).await;

        let mut tx = store.begin().await.unwrap();
        let updated = transition(
            tx.as_mut(),
            copy.id,
            CopyStatus::Available,
            CopyStatus::OnLoan,
        )
        .await
        .unwrap();
        assert_eq!(updated.status, CopyStatus::OnLoan);
        tx.commit().await.unwrap();

        let stored = store.get_copy(copy.id).await.unwrap();
        assert_eq!(stored.status, CopyStatus::OnLoan);
    }

    #[tokio::test]
    async fn test_stale_expected_state_rejected() {
        let store = InMemoryStore::new();
        let copy = seeded_copy(&store).await;

        let mut tx = store.begin().await.unwrap();
        let err = transition(
            tx.as_mut(),
            copy.id,
            CopyStatus::OnLoan,
            CopyStatus::Available,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CirculationError::InvalidTransition { .. }));
        tx.rollback().await;
    }

    #[tokio::test]
    async fn test_illegal_edge_rejected() {
        let store = InMemoryStore::new();
        let copy = seeded_copy(&store).await;

        let mut tx = store.begin().await.unwrap();
        // Available -> Lost is not a legal edge; Lost is only reachable from OnLoan.
        let err = transition(
            tx.as_mut(),
            copy.id,
            CopyStatus::Available,
            CopyStatus::Lost,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CirculationError::InvalidTransition { .. }));
        tx.rollback().await;
    }

    #[tokio::test]
    async fn test_missing_copy_is_not_found() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = transition(
            tx.as_mut(),
            CopyId::new(),
            CopyStatus::Available,
            CopyStatus::OnLoan,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CirculationError::NotFound { .. }));
        tx.rollback().await;
    }
}
