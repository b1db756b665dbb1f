//! Tracts: inter-layer delivery objects
//!
//! A tract subscribes to fire events of a source layer (optionally
//! filtered by an allow-set of source indices) and routes them into a
//! destination layer. Windowed wiring onto a sink grid uses a per-source
//! sink map (deduplicated center targets); otherwise delivery goes through
//! the destination's 2D-aware or scalar propagation hooks. Delivery itself
//! is performed by the region, which owns both layers.

use std::collections::{BTreeMap, BTreeSet};

/// Identifier of a tract within its region.
pub type TractId = usize;

/// Inter-layer subscription and routing table.
#[derive(Debug, Clone)]
pub struct Tract {
    pub(crate) source: usize,
    pub(crate) dest: usize,
    pub(crate) feedback: bool,
    /// Source indices this tract listens to; `None` means all.
    pub(crate) allowed: Option<BTreeSet<usize>>,
    /// Per-source sink targets (already deduplicated); delivery stops here.
    pub(crate) sink_map: Option<BTreeMap<usize, BTreeSet<usize>>>,
    /// Captured source shape for 2D-aware destination routing.
    pub(crate) source_shape: Option<(usize, usize)>,
}

impl Tract {
    /// Create a tract between two layer indices.
    pub fn new(
        source: usize,
        dest: usize,
        feedback: bool,
        allowed: Option<BTreeSet<usize>>,
        sink_map: Option<BTreeMap<usize, BTreeSet<usize>>>,
        source_shape: Option<(usize, usize)>,
    ) -> Self {
        Self {
            source,
            dest,
            feedback,
            allowed,
            sink_map,
            source_shape,
        }
    }

    /// Source layer index.
    pub fn source(&self) -> usize {
        self.source
    }

    /// Destination layer index.
    pub fn dest(&self) -> usize {
        self.dest
    }

    /// Whether this tract carries feedback wiring.
    pub fn is_feedback(&self) -> bool {
        self.feedback
    }

    /// Whether events from this source index pass the allow-set.
    pub fn allows(&self, source_index: usize) -> bool {
        match &self.allowed {
            Some(set) => set.contains(&source_index),
            None => true,
        }
    }

    /// Sink targets for a source index, if this tract is sink-mapped.
    pub fn sink_targets(&self, source_index: usize) -> Option<&BTreeSet<usize>> {
        self.sink_map.as_ref().and_then(|map| map.get(&source_index))
    }

    /// The captured source shape, when the source is a 2D grid.
    pub fn source_shape(&self) -> Option<(usize, usize)> {
        self.source_shape
    }

    /// Number of distinct source subscriptions this tract installed.
    pub fn unique_source_count(&self) -> usize {
        self.allowed.as_ref().map(BTreeSet::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_set_filtering() {
        let allowed: BTreeSet<usize> = [1, 3, 5].into_iter().collect();
        let tract = Tract::new(0, 1, false, Some(allowed), None, None);
        assert!(tract.allows(3));
        assert!(!tract.allows(2));
        assert_eq!(tract.unique_source_count(), 3);

        let open = Tract::new(0, 1, false, None, None, None);
        assert!(open.allows(1_000));
    }

    #[test]
    fn test_sink_map_is_deduplicated_by_construction() {
        let mut sink_map = BTreeMap::new();
        let mut centers = BTreeSet::new();
        // The same center inserted repeatedly collapses to one target.
        centers.insert(7);
        centers.insert(7);
        centers.insert(7);
        sink_map.insert(5, centers);

        let tract = Tract::new(0, 1, false, None, Some(sink_map), Some((4, 4)));
        let targets = tract.sink_targets(5).unwrap();
        assert_eq!(targets.len(), 1);
        assert!(tract.sink_targets(6).is_none());
        assert_eq!(tract.source_shape(), Some((4, 4)));
    }
}
