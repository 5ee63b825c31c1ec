//! In-flight request bookkeeping

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::error::DriverError;

/// Outcome delivered to a waiting caller
pub type Outcome = Result<Vec<u8>, DriverError>;

/// Single-use continuation for one pending request
pub type Completion = oneshot::Sender<Outcome>;

/// Pending requests keyed by request id.
///
/// Each entry is settled at most once: settling, removing and draining all
/// take the entry out of the map before touching its completion.
#[derive(Debug, Default)]
pub struct RequestTable {
    pending: HashMap<u32, Completion>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a completion under `id`.
    ///
    /// A live entry is never overwritten. On collision the new completion is
    /// rejected with `DuplicateId` and the existing request is untouched.
    pub fn insert(&mut self, id: u32, completion: Completion) -> Result<(), DriverError> {
        if self.pending.contains_key(&id) {
            tracing::error!("Request id {} allocated while still pending", id);
            let _ = completion.send(Err(DriverError::DuplicateId(id)));
            return Err(DriverError::DuplicateId(id));
        }
        self.pending.insert(id, completion);
        Ok(())
    }

    /// Remove `id` and hand it `outcome`.
    ///
    /// Returns false when no such request is pending; stray and duplicate
    /// responses end up here and are dropped.
    pub fn settle(&mut self, id: u32, outcome: Outcome) -> bool {
        match self.pending.remove(&id) {
            Some(completion) => {
                if completion.send(outcome).is_err() {
                    tracing::debug!("Caller for request {} went away before settlement", id);
                }
                true
            }
            None => {
                tracing::warn!("{}; discarding", DriverError::UnknownId(id));
                false
            }
        }
    }

    /// Forget `id` without settling it. The caller has stopped waiting.
    pub fn remove(&mut self, id: u32) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Reject every pending request with its own copy of `err`.
    pub fn drain_all_with_error(&mut self, err: &DriverError) -> usize {
        let drained = self.pending.len();
        for (_, completion) in self.pending.drain() {
            let _ = completion.send(Err(err.clone()));
        }
        drained
    }

    pub fn contains(&self, id: u32) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_resolves_once() {
        let mut table = RequestTable::new();
        let (tx, mut rx) = oneshot::channel();
        table.insert(5, tx).unwrap();

        assert!(table.settle(5, Ok(vec![1, 2, 3])));
        assert_eq!(rx.try_recv().unwrap(), Ok(vec![1, 2, 3]));

        // second response for the same id is discarded
        assert!(!table.settle(5, Ok(vec![9])));
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_insert_rejects_only_newcomer() {
        let mut table = RequestTable::new();
        let (first_tx, mut first_rx) = oneshot::channel();
        let (second_tx, mut second_rx) = oneshot::channel();

        table.insert(9, first_tx).unwrap();
        assert_eq!(table.insert(9, second_tx), Err(DriverError::DuplicateId(9)));
        assert_eq!(second_rx.try_recv().unwrap(), Err(DriverError::DuplicateId(9)));

        // original entry still live
        assert!(first_rx.try_recv().is_err());
        assert!(table.settle(9, Ok(vec![0x01])));
        assert_eq!(first_rx.try_recv().unwrap(), Ok(vec![0x01]));
    }

    #[test]
    fn test_unknown_id_is_discarded() {
        let mut table = RequestTable::new();
        let (tx, mut rx) = oneshot::channel();
        table.insert(1, tx).unwrap();

        assert!(!table.settle(2, Ok(vec![])));
        assert!(table.contains(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_drain_rejects_everyone() {
        let mut table = RequestTable::new();
        let mut receivers = Vec::new();
        for id in 0..4 {
            let (tx, rx) = oneshot::channel();
            table.insert(id, tx).unwrap();
            receivers.push(rx);
        }

        let err = DriverError::Transport("reset by peer".to_string());
        assert_eq!(table.drain_all_with_error(&err), 4);
        assert!(table.is_empty());

        for mut rx in receivers {
            assert_eq!(rx.try_recv().unwrap(), Err(err.clone()));
        }
    }

    #[test]
    fn test_remove_leaves_caller_unsettled() {
        let mut table = RequestTable::new();
        let (tx, mut rx) = oneshot::channel();
        table.insert(3, tx).unwrap();

        assert!(table.remove(3));
        assert!(!table.remove(3));
        // sender dropped without a value
        assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
    }
}
