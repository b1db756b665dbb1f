//! Proximity autowiring sidecar
//!
//! Optional policy that adds directed edges between neurons that are close
//! in a deterministic 3D layout of the region. Runs after propagation and
//! before end-of-tick decay. STEP mode is fully deterministic; LINEAR and
//! LOGISTIC modes draw once per candidate from the seeded region RNG and
//! refuse to run without one.

use std::collections::HashMap;

use rand::Rng;

use crate::error::{GrowNetError, Result};
use crate::region::Region;

/// Distance-to-probability shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProximityFunction {
    /// Probability 1 inside the radius.
    #[default]
    Step,
    /// `(1 − d/r)^γ` inside the radius.
    Linear,
    /// `1 / (1 + exp(k·(d − r)))`.
    Logistic,
}

/// Configuration for the proximity policy.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProximityConfig {
    /// Master toggle.
    pub enabled: bool,
    /// Neighborhood radius in layout units.
    pub radius: f64,
    /// Distance-to-probability shape.
    pub function: ProximityFunction,
    /// Exponent γ for [`ProximityFunction::Linear`].
    pub linear_exponent_gamma: f64,
    /// Steepness k for [`ProximityFunction::Logistic`].
    pub logistic_steepness_k: f64,
    /// Edge budget per tick.
    pub max_edges_per_tick: usize,
    /// Ticks a neuron rests between attempts.
    pub cooldown_ticks: u64,
    /// First bus step at which the policy runs.
    pub window_start: u64,
    /// Last bus step at which the policy runs.
    pub window_end: u64,
    /// Reserved: hits before an edge is considered stable.
    pub stabilization_hits: u32,
    /// Reserved: whether unused candidate edges decay.
    pub decay_if_unused: bool,
    /// Reserved: half-life for unused-edge decay.
    pub decay_half_life_ticks: u64,
    /// Layers to consider; empty means all layers.
    pub candidate_layers: Vec<usize>,
    /// Whether cross-layer edges record mesh rules for future autowiring.
    pub record_mesh_rules_on_cross_layer: bool,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            radius: 1.0,
            function: ProximityFunction::Step,
            linear_exponent_gamma: 1.0,
            logistic_steepness_k: 4.0,
            max_edges_per_tick: 128,
            cooldown_ticks: 5,
            window_start: 0,
            window_end: u64::MAX,
            stabilization_hits: 3,
            decay_if_unused: true,
            decay_half_life_ticks: 200,
            candidate_layers: Vec::new(),
            record_mesh_rules_on_cross_layer: true,
        }
    }
}

impl ProximityConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.radius <= 0.0 {
            return Err(GrowNetError::bad_config("proximity radius must be > 0"));
        }
        if self.window_end < self.window_start {
            return Err(GrowNetError::bad_config(
                "proximity window_end must be >= window_start",
            ));
        }
        Ok(())
    }
}

/// Deterministic 3D layout of a region's neurons.
///
/// Layers stack along z; 2D layers center their grid around the origin,
/// other layers fall back to a ceil-sqrt grid. Spacing constants are part
/// of the cross-language contract.
pub struct DeterministicLayout;

impl DeterministicLayout {
    /// Distance between consecutive layer planes.
    pub const LAYER_SPACING: f64 = 4.0;
    /// Distance between neighboring grid positions within a layer.
    pub const GRID_SPACING: f64 = 1.2;

    /// Position of one neuron in layout space.
    pub fn position(
        layer_index: usize,
        neuron_index: usize,
        layer_height: usize,
        layer_width: usize,
    ) -> [f64; 3] {
        let z = layer_index as f64 * Self::LAYER_SPACING;
        if layer_height > 0 && layer_width > 0 {
            let row = (neuron_index / layer_width) as f64;
            let col = (neuron_index % layer_width) as f64;
            let x = (col - (layer_width as f64 - 1.0) / 2.0) * Self::GRID_SPACING;
            let y = ((layer_height as f64 - 1.0) / 2.0 - row) * Self::GRID_SPACING;
            return [x, y, z];
        }
        // Non-2D: ceil-sqrt grid centered around the origin.
        let mut side = ((neuron_index + 1) as f64).sqrt() as usize;
        if side * side < neuron_index + 1 {
            side += 1;
        }
        let side = side.max(1);
        let row = (neuron_index / side) as f64;
        let col = (neuron_index % side) as f64;
        let x = (col - (side as f64 - 1.0) / 2.0) * Self::GRID_SPACING;
        let y = ((side as f64 - 1.0) / 2.0 - row) * Self::GRID_SPACING;
        [x, y, z]
    }
}

/// Spatial hash over layout space with cell size equal to the radius.
pub(crate) struct SpatialHash {
    cell_size: f64,
    cells: HashMap<(i64, i64, i64), Vec<(usize, usize)>>,
}

impl SpatialHash {
    pub(crate) fn new(cell_size: f64) -> Result<Self> {
        if cell_size <= 0.0 {
            return Err(GrowNetError::bad_config("cell size must be > 0"));
        }
        Ok(Self {
            cell_size,
            cells: HashMap::new(),
        })
    }

    fn key_for(&self, position: [f64; 3]) -> (i64, i64, i64) {
        (
            (position[0] / self.cell_size).floor() as i64,
            (position[1] / self.cell_size).floor() as i64,
            (position[2] / self.cell_size).floor() as i64,
        )
    }

    pub(crate) fn insert(&mut self, item: (usize, usize), position: [f64; 3]) {
        self.cells.entry(self.key_for(position)).or_default().push(item);
    }

    /// Items in the 27 cells around `position`, in deterministic order
    /// (fixed offset sweep, insertion order within each cell).
    pub(crate) fn near(&self, position: [f64; 3]) -> Vec<(usize, usize)> {
        let base = self.key_for(position);
        let mut found = Vec::new();
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let key = (base.0 + dx, base.1 + dy, base.2 + dz);
                    if let Some(bucket) = self.cells.get(&key) {
                        found.extend_from_slice(bucket);
                    }
                }
            }
        }
        found
    }
}

/// The proximity policy engine.
pub struct ProximityEngine;

impl ProximityEngine {
    /// Apply the policy once; returns the number of edges added.
    ///
    /// Gated off (returning 0) when disabled, when the radius is
    /// non-positive, or when the region bus step is outside the
    /// development window. Probabilistic modes without a seeded region RNG
    /// are a configuration error.
    pub fn apply(region: &mut Region, config: &ProximityConfig) -> Result<usize> {
        if !config.enabled || config.radius <= 0.0 {
            return Ok(0);
        }
        let current_step = region.bus().current_step();
        if current_step < config.window_start || current_step > config.window_end {
            return Ok(0);
        }
        if config.function != ProximityFunction::Step && !region.has_rng() {
            return Err(GrowNetError::bad_config(
                "probabilistic proximity modes require a seeded region RNG",
            ));
        }

        let candidate_layers: Vec<usize> = if config.candidate_layers.is_empty() {
            (0..region.layers.len()).collect()
        } else {
            let len = region.layers.len();
            for &index in &config.candidate_layers {
                if index >= len {
                    return Err(GrowNetError::bad_index("layer", index, len));
                }
            }
            config.candidate_layers.clone()
        };
        if candidate_layers.is_empty() {
            return Ok(0);
        }

        let mut grid = SpatialHash::new(config.radius)?;
        for &layer_index in &candidate_layers {
            let layer = &region.layers[layer_index];
            let (height, width) = (layer.height(), layer.width());
            for neuron_index in 0..layer.neuron_count() {
                let position =
                    DeterministicLayout::position(layer_index, neuron_index, height, width);
                grid.insert((layer_index, neuron_index), position);
            }
        }

        let mut edges_added = 0usize;
        'layers: for &layer_index in &candidate_layers {
            let (height, width) = {
                let layer = &region.layers[layer_index];
                (layer.height(), layer.width())
            };
            for neuron_index in 0..region.layers[layer_index].neuron_count() {
                let source = (layer_index, neuron_index);
                if let Some(&last) = region.proximity_last_attempt.get(&source) {
                    if current_step.saturating_sub(last) < config.cooldown_ticks {
                        continue;
                    }
                }
                // Attempts are marked even when no edge results.
                region.proximity_last_attempt.insert(source, current_step);

                let origin =
                    DeterministicLayout::position(layer_index, neuron_index, height, width);
                for (neighbor_layer, neighbor_neuron) in grid.near(origin) {
                    if neighbor_layer == layer_index && neighbor_neuron == neuron_index {
                        continue;
                    }
                    if region.layers[layer_index].neurons()[neuron_index]
                        .has_edge_to(neighbor_layer, neighbor_neuron)
                    {
                        continue;
                    }
                    let neighbor_position = {
                        let layer = &region.layers[neighbor_layer];
                        DeterministicLayout::position(
                            neighbor_layer,
                            neighbor_neuron,
                            layer.height(),
                            layer.width(),
                        )
                    };
                    let dx = origin[0] - neighbor_position[0];
                    let dy = origin[1] - neighbor_position[1];
                    let dz = origin[2] - neighbor_position[2];
                    let distance = (dx * dx + dy * dy + dz * dz).sqrt();
                    if distance > config.radius {
                        continue;
                    }
                    let probability = probability_from_distance(config, distance);
                    if probability < 1.0 {
                        let draw = region
                            .rng_mut()
                            .expect("checked above for probabilistic modes")
                            .gen::<f64>();
                        if draw >= probability {
                            continue;
                        }
                    }
                    region.layers[layer_index].neurons_mut()[neuron_index].connect(
                        neighbor_layer,
                        neighbor_neuron,
                        false,
                    );
                    if config.record_mesh_rules_on_cross_layer && neighbor_layer != layer_index {
                        region.record_mesh_rule(layer_index, neighbor_layer, 1.0, false);
                    }
                    region
                        .proximity_last_attempt
                        .insert((neighbor_layer, neighbor_neuron), current_step);
                    edges_added += 1;
                    log::trace!(
                        "proximity edge ({layer_index},{neuron_index}) -> \
                         ({neighbor_layer},{neighbor_neuron}) d={distance:.3}"
                    );
                    if edges_added >= config.max_edges_per_tick {
                        break 'layers;
                    }
                }
            }
        }
        if edges_added > 0 {
            log::debug!("proximity added {edges_added} edges at step {current_step}");
        }
        Ok(edges_added)
    }
}

fn probability_from_distance(config: &ProximityConfig, distance: f64) -> f64 {
    match config.function {
        ProximityFunction::Step => {
            if distance <= config.radius {
                1.0
            } else {
                0.0
            }
        }
        ProximityFunction::Linear => {
            let normalized = (1.0 - distance / config.radius.max(1e-12)).max(0.0);
            normalized.powf(config.linear_exponent_gamma.max(1e-12))
        }
        ProximityFunction::Logistic => {
            1.0 / (1.0 + (config.logistic_steepness_k * (distance - config.radius)).exp())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_2d_grid_centered() {
        // A 3x3 grid centers its middle neuron at the layer origin.
        let center = DeterministicLayout::position(0, 4, 3, 3);
        assert_eq!(center, [0.0, 0.0, 0.0]);
        let corner = DeterministicLayout::position(0, 0, 3, 3);
        assert_eq!(corner, [-1.2, 1.2, 0.0]);
        // Layers are stacked along z.
        let above = DeterministicLayout::position(2, 4, 3, 3);
        assert_eq!(above[2], 8.0);
    }

    #[test]
    fn test_layout_fallback_grid() {
        // Neuron 0 of a non-2D layer sits alone on a 1x1 grid.
        assert_eq!(DeterministicLayout::position(0, 0, 0, 0), [0.0, 0.0, 0.0]);
        // Neuron 3 lands on a 2x2 grid.
        let p = DeterministicLayout::position(0, 3, 0, 0);
        assert!((p[0] - 0.6).abs() < 1e-12);
        assert!((p[1] + 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_spatial_hash_neighborhood() {
        let mut grid = SpatialHash::new(1.0).unwrap();
        grid.insert((0, 0), [0.1, 0.1, 0.1]);
        grid.insert((0, 1), [0.9, 0.9, 0.9]);
        grid.insert((0, 2), [5.0, 5.0, 5.0]);
        let near = grid.near([0.0, 0.0, 0.0]);
        assert!(near.contains(&(0, 0)));
        assert!(near.contains(&(0, 1)));
        assert!(!near.contains(&(0, 2)));
    }

    #[test]
    fn test_spatial_hash_rejects_bad_cell_size() {
        assert!(SpatialHash::new(0.0).is_err());
        assert!(SpatialHash::new(-1.0).is_err());
    }

    #[test]
    fn test_probability_shapes() {
        let mut config = ProximityConfig::default();
        config.radius = 2.0;

        config.function = ProximityFunction::Step;
        assert_eq!(probability_from_distance(&config, 1.0), 1.0);
        assert_eq!(probability_from_distance(&config, 3.0), 0.0);

        config.function = ProximityFunction::Linear;
        assert!((probability_from_distance(&config, 1.0) - 0.5).abs() < 1e-12);

        config.function = ProximityFunction::Logistic;
        let at_radius = probability_from_distance(&config, 2.0);
        assert!((at_radius - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ProximityConfig::default();
        config.enabled = true;
        config.radius = 0.0;
        assert!(config.validate().is_err());

        config.radius = 1.0;
        assert!(config.validate().is_ok());
    }
}
