use std::collections::BTreeMap;

use serde::Serialize;

/// One entry in the key index: either a whole link or a (link, endpoint)
/// pair, with its live event count. Used for building filter selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyIndexEntry {
    pub link_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<u32>,
    pub count: u64,
}

/// Tracks every distinct link and (link, endpoint) pair ever seen, with a
/// live event count per key. The index only grows; a session clear is the
/// only way to empty it.
#[derive(Debug, Default)]
pub struct KeyIndex {
    links: BTreeMap<u32, u64>,
    pairs: BTreeMap<(u32, u32), u64>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one event for the given key, creating entries on first
    /// sighting.
    pub fn observe(&mut self, link_id: u32, endpoint_id: u32) {
        *self.links.entry(link_id).or_insert(0) += 1;
        *self.pairs.entry((link_id, endpoint_id)).or_insert(0) += 1;
    }

    /// Number of distinct links seen.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Number of distinct (link, endpoint) pairs seen.
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Live event count for a link, if seen.
    pub fn link_events(&self, link_id: u32) -> Option<u64> {
        self.links.get(&link_id).copied()
    }

    /// Live event count for a (link, endpoint) pair, if seen.
    pub fn pair_events(&self, link_id: u32, endpoint_id: u32) -> Option<u64> {
        self.pairs.get(&(link_id, endpoint_id)).copied()
    }

    /// Returns all entries ordered by link, each link entry followed by its
    /// endpoint entries.
    pub fn snapshot(&self) -> Vec<KeyIndexEntry> {
        let mut entries = Vec::with_capacity(self.links.len() + self.pairs.len());

        for (&link_id, &count) in &self.links {
            entries.push(KeyIndexEntry {
                link_id,
                endpoint_id: None,
                count,
            });

            for (&(_, endpoint_id), &count) in
                self.pairs.range((link_id, u32::MIN)..=(link_id, u32::MAX))
            {
                entries.push(KeyIndexEntry {
                    link_id,
                    endpoint_id: Some(endpoint_id),
                    count,
                });
            }
        }

        entries
    }

    /// Drops all entries (session clear).
    pub fn reset(&mut self) {
        self.links.clear();
        self.pairs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_creates_and_increments() {
        let mut index = KeyIndex::new();
        index.observe(1, 1);
        index.observe(1, 1);
        index.observe(1, 2);

        assert_eq!(index.link_count(), 1);
        assert_eq!(index.pair_count(), 2);
        assert_eq!(index.link_events(1), Some(3));
        assert_eq!(index.pair_events(1, 1), Some(2));
        assert_eq!(index.pair_events(1, 2), Some(1));
        assert_eq!(index.pair_events(2, 1), None);
    }

    #[test]
    fn test_snapshot_orders_links_then_endpoints() {
        let mut index = KeyIndex::new();
        index.observe(2, 5);
        index.observe(1, 9);
        index.observe(1, 3);

        let snap = index.snapshot();
        assert_eq!(snap.len(), 5);

        assert_eq!(snap[0].link_id, 1);
        assert_eq!(snap[0].endpoint_id, None);
        assert_eq!(snap[0].count, 2);
        assert_eq!(snap[1].endpoint_id, Some(3));
        assert_eq!(snap[2].endpoint_id, Some(9));
        assert_eq!(snap[3].link_id, 2);
        assert_eq!(snap[3].endpoint_id, None);
        assert_eq!(snap[4].endpoint_id, Some(5));
    }

    #[test]
    fn test_reset_empties_index() {
        let mut index = KeyIndex::new();
        index.observe(1, 1);
        index.reset();
        assert_eq!(index.link_count(), 0);
        assert!(index.snapshot().is_empty());
    }
}
