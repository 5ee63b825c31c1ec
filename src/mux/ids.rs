use rand::Rng;

use super::table::RequestTable;

/// Wrapping request id counter.
///
/// Seeded randomly so ids from successive clients do not line up in shared
/// logs. Skips ids that are still pending after wraparound.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::starting_at(rand::thread_rng().gen())
    }

    pub fn starting_at(seed: u32) -> Self {
        Self { next: seed }
    }

    /// Next id not present in `table`, or `None` if every id is pending.
    pub fn allocate(&mut self, table: &RequestTable) -> Option<u32> {
        if table.len() as u64 > u32::MAX as u64 {
            return None;
        }
        loop {
            let id = self.next;
            self.next = self.next.wrapping_add(1);
            if !table.contains(id) {
                return Some(id);
            }
            tracing::debug!("Skipping request id {} still in flight", id);
        }
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[test]
    fn test_sequential_from_seed() {
        let table = RequestTable::new();
        let mut ids = IdAllocator::starting_at(10);
        assert_eq!(ids.allocate(&table), Some(10));
        assert_eq!(ids.allocate(&table), Some(11));
        assert_eq!(ids.allocate(&table), Some(12));
    }

    #[test]
    fn test_wraps_at_u32_max() {
        let table = RequestTable::new();
        let mut ids = IdAllocator::starting_at(u32::MAX - 1);
        assert_eq!(ids.allocate(&table), Some(u32::MAX - 1));
        assert_eq!(ids.allocate(&table), Some(u32::MAX));
        assert_eq!(ids.allocate(&table), Some(0));
    }

    #[test]
    fn test_skips_pending_ids_after_wraparound() {
        let mut table = RequestTable::new();
        let mut receivers = Vec::new();
        for id in [u32::MAX, 0, 1] {
            let (tx, rx) = oneshot::channel();
            table.insert(id, tx).unwrap();
            receivers.push(rx);
        }

        let mut ids = IdAllocator::starting_at(u32::MAX - 1);
        assert_eq!(ids.allocate(&table), Some(u32::MAX - 1));
        assert_eq!(ids.allocate(&table), Some(2));
        assert_eq!(ids.allocate(&table), Some(3));
    }
}
