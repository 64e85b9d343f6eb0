//! Historical-marking bookkeeping.
//!
//! An [`InnovationTracker`] lives as long as one population. It hands out
//! sequential innovation numbers for `(from, to)` node pairs and memoizes node
//! splits per connection innovation, so that the same structural mutation
//! arising independently in two genomes yields identical genes. Genes can then
//! be aligned by innovation during crossover and speciation without any graph
//! comparison.
//!
//! The tracker must never be reset mid-run: a fresh counter would hand
//! already-used innovation numbers to unrelated connections.

use std::collections::HashMap;

/// Result of splitting one connection innovation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SplitRecord {
    /// Historical id of the inserted hidden node.
    pub new_node_id: u64,
    /// Innovation of `from -> new node`.
    pub in_innovation: u64,
    /// Innovation of `new node -> to`.
    pub out_innovation: u64,
}

/// Run-wide registry of connection innovations and node splits.
#[derive(Debug, Clone)]
pub struct InnovationTracker {
    connections: HashMap<(u64, u64), u64>,
    splits: HashMap<u64, SplitRecord>,
    next_innovation: u64,
    next_node_id: u64,
}

impl InnovationTracker {
    /// Create a tracker for genomes with the given fixed node counts.
    ///
    /// Ids `0` (bias), `1..=input_count` and the following `output_count`
    /// ids are reserved for the fixed nodes every genome shares.
    #[must_use]
    pub fn new(input_count: usize, output_count: usize) -> Self {
        Self {
            connections: HashMap::new(),
            splits: HashMap::new(),
            next_innovation: 0,
            next_node_id: (1 + input_count + output_count) as u64,
        }
    }

    /// Innovation number of the connection `from -> to`.
    ///
    /// Returns the existing number if this pair was seen anywhere in the run,
    /// otherwise allocates the next sequential one.
    pub fn get_innovation(&mut self, from: u64, to: u64) -> u64 {
        let next = &mut self.next_innovation;
        *self.connections.entry((from, to)).or_insert_with(|| {
            let innovation = *next;
            *next += 1;
            innovation
        })
    }

    /// Split record for connection `connection_innovation` between `from` and `to`.
    ///
    /// Memoized per connection innovation: every genome that splits this
    /// connection gets the same hidden node id and replacement innovations.
    pub fn get_split_record(
        &mut self,
        connection_innovation: u64,
        from: u64,
        to: u64,
    ) -> SplitRecord {
        if let Some(record) = self.splits.get(&connection_innovation) {
            return *record;
        }

        let new_node_id = self.next_node_id;
        self.next_node_id += 1;
        let record = SplitRecord {
            new_node_id,
            in_innovation: self.get_innovation(from, new_node_id),
            out_innovation: self.get_innovation(new_node_id, to),
        };
        self.splits.insert(connection_innovation, record);
        record
    }

    /// Number of distinct connection innovations registered so far.
    #[must_use]
    pub fn innovation_count(&self) -> u64 {
        self.next_innovation
    }

    /// The id the next split will receive.
    #[must_use]
    pub fn next_node_id(&self) -> u64 {
        self.next_node_id
    }

    /// Number of distinct splits registered so far.
    #[must_use]
    pub fn split_count(&self) -> usize {
        self.splits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_innovation_reused_for_same_pair() {
        let mut tracker = InnovationTracker::new(2, 1);
        let a = tracker.get_innovation(1, 3);
        let b = tracker.get_innovation(1, 3);
        assert_eq!(a, b);
        assert_eq!(tracker.innovation_count(), 1);
    }

    #[test]
    fn test_innovation_order_matters() {
        let mut tracker = InnovationTracker::new(2, 1);
        let forward = tracker.get_innovation(1, 3);
        let backward = tracker.get_innovation(3, 1);
        assert_ne!(forward, backward);
    }

    #[test]
    fn test_innovations_are_sequential() {
        let mut tracker = InnovationTracker::new(3, 2);
        let ids: Vec<u64> = (0..5).map(|i| tracker.get_innovation(i, 10)).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_node_ids_start_after_fixed_nodes() {
        let tracker = InnovationTracker::new(3, 2);
        // bias + 3 inputs + 2 outputs
        assert_eq!(tracker.next_node_id(), 6);
    }

    #[test]
    fn test_split_record_memoized() {
        let mut tracker = InnovationTracker::new(2, 1);
        let conn = tracker.get_innovation(1, 3);

        let first = tracker.get_split_record(conn, 1, 3);
        let second = tracker.get_split_record(conn, 1, 3);

        assert_eq!(first, second);
        assert_eq!(tracker.split_count(), 1);
        assert_eq!(first.new_node_id, 4);
        assert_ne!(first.in_innovation, first.out_innovation);
        assert_ne!(first.in_innovation, conn);
        assert_eq!(tracker.get_innovation(1, first.new_node_id), first.in_innovation);
        assert_eq!(tracker.get_innovation(first.new_node_id, 3), first.out_innovation);
    }

    #[test]
    fn test_distinct_splits_get_distinct_nodes() {
        let mut tracker = InnovationTracker::new(2, 1);
        let c1 = tracker.get_innovation(1, 3);
        let c2 = tracker.get_innovation(2, 3);

        let s1 = tracker.get_split_record(c1, 1, 3);
        let s2 = tracker.get_split_record(c2, 2, 3);
        assert_ne!(s1.new_node_id, s2.new_node_id);
    }
}
