//! Region-level growth controller
//!
//! After end-of-tick housekeeping the region measures pressure over its
//! trainable layers — average slots per neuron and the share of neurons
//! saturated with fallback — and, when a threshold trips and the cooldown
//! has elapsed, adds one spillover excitatory layer wired from the most
//! saturated source. At most one layer is ever added per tick.

use crate::error::{GrowNetError, Result};
use crate::region::Region;

/// Policy knobs for automatic region layer growth.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GrowthPolicy {
    /// Master toggle.
    pub enable_layer_growth: bool,
    /// Hard cap on total layers; `-1` means unlimited.
    pub max_total_layers: i64,
    /// Trigger when avg(slots per neuron) reaches this value.
    pub avg_slots_threshold: f64,
    /// OR-trigger when this percentage of neurons is saturated with fallback.
    pub percent_neurons_at_cap_threshold: f64,
    /// Minimum ticks between layer growth events.
    pub layer_cooldown_ticks: u64,
    /// Excitatory population of the spillover layer.
    pub new_layer_excitatory_count: usize,
    /// Probability used when wiring source → spillover.
    pub wire_probability: f64,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            enable_layer_growth: true,
            max_total_layers: -1,
            avg_slots_threshold: 8.0,
            percent_neurons_at_cap_threshold: 50.0,
            layer_cooldown_ticks: 25,
            new_layer_excitatory_count: 4,
            wire_probability: 1.0,
        }
    }
}

impl GrowthPolicy {
    /// Validate the policy.
    pub fn validate(&self) -> Result<()> {
        if self.max_total_layers < -1 {
            return Err(GrowNetError::bad_config("max_total_layers must be >= -1"));
        }
        if !(0.0..=1.0).contains(&self.wire_probability) {
            return Err(GrowNetError::bad_config(
                "wire_probability must be in [0, 1]",
            ));
        }
        if self.new_layer_excitatory_count == 0 {
            return Err(GrowNetError::bad_config(
                "new_layer_excitatory_count must be >= 1",
            ));
        }
        Ok(())
    }
}

/// Saturation share of one layer: fraction of neurons at slot capacity
/// whose latest selection used the fallback.
fn saturation_score(region: &Region, layer_index: usize) -> Option<f64> {
    let layer = &region.layers[layer_index];
    if layer.neuron_count() == 0 {
        return None;
    }
    let saturated = layer
        .neurons()
        .iter()
        .filter(|n| n.at_slot_capacity() && n.last_slot_used_fallback())
        .count();
    Some(saturated as f64 / layer.neuron_count() as f64)
}

/// Inspect the region after end-of-tick and add a spillover layer when
/// pressure is high. Returns whether a layer was added.
pub(crate) fn maybe_grow(region: &mut Region) -> bool {
    let Some(policy) = region.growth_policy().cloned() else {
        return false;
    };
    if !policy.enable_layer_growth {
        return false;
    }
    let total_layers = region.layers.len() as i64;
    if policy.max_total_layers > 0 && total_layers >= policy.max_total_layers {
        return false;
    }

    // Cooldown window, measured on the first layer's bus step (advanced in
    // end_tick).
    let now = match region.layers.first() {
        Some(layer) => layer.bus().current_step(),
        None => return false,
    };
    // One growth per tick, no matter which path produced it.
    if region.layer_grown_this_tick {
        return false;
    }
    if let Some(last) = region.last_layer_growth_step {
        if now.saturating_sub(last) < policy.layer_cooldown_ticks {
            return false;
        }
    }

    let trainable: Vec<usize> = (0..region.layers.len())
        .filter(|&index| region.layers[index].is_trainable())
        .collect();
    if trainable.is_empty() {
        return false;
    }

    let mut neuron_count = 0usize;
    let mut total_slots = 0usize;
    let mut saturated = 0usize;
    for &index in &trainable {
        for neuron in region.layers[index].neurons() {
            neuron_count += 1;
            total_slots += neuron.slots().len();
            if neuron.at_slot_capacity() && neuron.last_slot_used_fallback() {
                saturated += 1;
            }
        }
    }
    if neuron_count == 0 {
        return false;
    }

    let avg_slots = total_slots as f64 / neuron_count as f64;
    let pct_saturated = 100.0 * saturated as f64 / neuron_count as f64;
    if avg_slots < policy.avg_slots_threshold
        && pct_saturated < policy.percent_neurons_at_cap_threshold
    {
        return false;
    }

    // The most saturated trainable layer feeds the spillover.
    let mut best_index = trainable[trainable.len() - 1];
    let mut best_score = -1.0;
    for &index in &trainable {
        if let Some(score) = saturation_score(region, index) {
            if score > best_score {
                best_score = score;
                best_index = index;
            }
        }
    }

    let new_excitatory = policy.new_layer_excitatory_count.max(1);
    let new_index = region.add_layer(new_excitatory, 0, 0);
    if let Err(err) = region.connect_layers(best_index, new_index, policy.wire_probability, false) {
        // The spillover stays useful even if wiring could not be completed.
        log::warn!("spillover wiring failed: {err}");
    }
    region.last_layer_growth_step = Some(now);
    region.layer_grown_this_tick = true;
    log::debug!(
        "region grew spillover layer {new_index} from layer {best_index} at step {now} \
         (avg_slots {avg_slots:.2}, pct_saturated {pct_saturated:.1})"
    );
    true
}
