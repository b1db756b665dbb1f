//! Stable enumeration domains for parallel kernels

/// A half-open index domain `[0, count)` with a stable iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDomain {
    /// Number of indices in the domain.
    pub count: usize,
}

impl IndexDomain {
    /// Create a new index domain.
    pub const fn new(count: usize) -> Self {
        Self { count }
    }

    /// Materialize the domain as an ordered index vector.
    pub fn indices(&self) -> Vec<usize> {
        (0..self.count).collect()
    }
}

impl IntoIterator for IndexDomain {
    type Item = usize;
    type IntoIter = std::ops::Range<usize>;

    fn into_iter(self) -> Self::IntoIter {
        0..self.count
    }
}

/// A tile of neurons within one layer: the half-open range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// Index of the layer this tile belongs to.
    pub layer_index: usize,
    /// First neuron index covered by the tile.
    pub start: usize,
    /// One past the last neuron index covered by the tile.
    pub end: usize,
}

impl Tile {
    /// Number of neurons covered by this tile.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the tile covers no neurons.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Build a stable tile list covering every neuron of every layer.
///
/// Enumeration is lexicographic in `(layer_index, start)`; kernels that
/// mutate per-neuron state therefore touch disjoint ranges, and ordered
/// reductions over the returned list are reproducible.
pub fn build_layer_neuron_tiles(neuron_counts: &[usize], tile_size: usize) -> Vec<Tile> {
    let tile_size = tile_size.max(1);
    let mut tiles = Vec::new();
    for (layer_index, &total) in neuron_counts.iter().enumerate() {
        let mut start = 0;
        while start < total {
            let end = total.min(start + tile_size);
            tiles.push(Tile {
                layer_index,
                start,
                end,
            });
            start = end;
        }
    }
    tiles
}
