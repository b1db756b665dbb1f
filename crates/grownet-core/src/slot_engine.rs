//! Deterministic slot selection (scalar and 2D)
//!
//! The engine maps an input to a slot key from pure arithmetic: anchor,
//! percent delta, bin width. Capacity is clamped strictly — when the
//! desired bin cannot be created, an existing slot is reused and the
//! neuron's fallback markers are set so growth policies can see the
//! pressure. No randomness anywhere.

use crate::neuron::Neuron;
use crate::weight::Weight;
use crate::slot_config::{AnchorMode, SlotPolicy};

/// Key of one slot within a neuron's slot map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SlotKey {
    /// Temporal (scalar) bin.
    Scalar(i64),
    /// Spatial bin pair.
    Spatial {
        /// Row bin.
        row: i64,
        /// Column bin.
        col: i64,
    },
}

/// Stateless slot selection helpers.
///
/// All selection state lives on the neuron; the engine only encodes the
/// binning and capacity rules.
pub struct SlotEngine;

impl SlotEngine {
    /// Smallest usable bin width in percent.
    const MIN_BIN_WIDTH_PCT: f64 = 0.1;

    /// Select (or create) the scalar slot for `input`, marking fallback
    /// state on the neuron. Returns the key of the selected slot, which is
    /// guaranteed to exist in the neuron's slot map afterwards.
    pub fn select_or_create_slot(neuron: &mut Neuron, input: f64) -> SlotKey {
        let anchor = match neuron.slot_cfg.anchor_mode {
            AnchorMode::Origin => 0.0,
            _ => {
                if neuron.anchor.is_none() {
                    neuron.anchor = Some(input);
                }
                neuron.anchor.unwrap_or(0.0)
            }
        };
        let denom = anchor.abs().max(neuron.slot_cfg.epsilon_scale.max(1e-12));
        let delta_pct = (input - anchor).abs() / denom * 100.0;
        let desired = Self::desired_bin(neuron, delta_pct);

        let limit = neuron.effective_slot_limit();
        let at_capacity = limit > 0 && neuron.slots.len() as i64 >= limit;
        let out_of_domain = limit > 0 && desired >= limit;
        let desired_key = SlotKey::Scalar(desired);
        let use_fallback =
            out_of_domain || (at_capacity && !neuron.slots.contains_key(&desired_key));

        let key = if use_fallback {
            let clamped = SlotKey::Scalar(limit - 1);
            if neuron.slots.contains_key(&clamped) || !at_capacity {
                clamped
            } else {
                // Never allocate at capacity: reuse the lowest existing bin.
                *neuron
                    .slots
                    .keys()
                    .next()
                    .expect("at capacity implies at least one slot")
            }
        } else {
            desired_key
        };

        neuron.last_slot_used_fallback = use_fallback;
        if use_fallback {
            neuron.last_missing_slot = Some(desired_key);
            neuron.last_max_axis_delta_pct = delta_pct;
        }
        neuron.slots.entry(key).or_insert_with(Weight::new);
        key
    }

    /// Select (or create) the spatial slot for `(row, col)`.
    ///
    /// Anchors follow `ORIGIN` (always `(0, 0)`) or `FIRST` (first observed
    /// position); per-axis percent deltas use a spatial epsilon of at least
    /// 1.0 so origin anchors do not explode the bin index.
    pub fn select_or_create_slot_2d(neuron: &mut Neuron, row: i64, col: i64) -> SlotKey {
        let (anchor_row, anchor_col) = match neuron.slot_cfg.anchor_mode {
            AnchorMode::Origin => (0, 0),
            _ => {
                if neuron.anchor_row.is_none() || neuron.anchor_col.is_none() {
                    neuron.anchor_row = Some(row);
                    neuron.anchor_col = Some(col);
                }
                (
                    neuron.anchor_row.unwrap_or(0),
                    neuron.anchor_col.unwrap_or(0),
                )
            }
        };

        let epsilon = neuron.slot_cfg.epsilon_scale.max(1.0);
        let denom_row = (anchor_row.abs() as f64).max(epsilon);
        let denom_col = (anchor_col.abs() as f64).max(epsilon);
        let dp_row = (row - anchor_row).abs() as f64 / denom_row * 100.0;
        let dp_col = (col - anchor_col).abs() as f64 / denom_col * 100.0;

        let width_row = neuron.slot_cfg.row_bin_width_pct.max(Self::MIN_BIN_WIDTH_PCT);
        let width_col = neuron.slot_cfg.col_bin_width_pct.max(Self::MIN_BIN_WIDTH_PCT);
        let row_bin = (dp_row / width_row).floor() as i64;
        let col_bin = (dp_col / width_col).floor() as i64;

        let limit = neuron.effective_slot_limit();
        let at_capacity = limit > 0 && neuron.slots.len() as i64 >= limit;
        let out_of_domain = limit > 0 && (row_bin >= limit || col_bin >= limit);
        let desired_key = SlotKey::Spatial {
            row: row_bin,
            col: col_bin,
        };
        let use_fallback =
            out_of_domain || (at_capacity && !neuron.slots.contains_key(&desired_key));

        let key = if use_fallback {
            let clamped = SlotKey::Spatial {
                row: limit - 1,
                col: limit - 1,
            };
            if neuron.slots.contains_key(&clamped) || !at_capacity {
                clamped
            } else {
                *neuron
                    .slots
                    .keys()
                    .next()
                    .expect("at capacity implies at least one slot")
            }
        } else {
            desired_key
        };

        neuron.last_slot_used_fallback = use_fallback;
        if use_fallback {
            neuron.last_missing_slot = Some(desired_key);
            neuron.last_max_axis_delta_pct = dp_row.max(dp_col);
        }
        neuron.slots.entry(key).or_insert_with(Weight::new);
        key
    }

    fn desired_bin(neuron: &Neuron, delta_pct: f64) -> i64 {
        match neuron.slot_cfg.policy {
            SlotPolicy::Fixed | SlotPolicy::Adaptive => {
                let width = neuron
                    .slot_cfg
                    .fixed_delta_percent
                    .max(Self::MIN_BIN_WIDTH_PCT);
                (delta_pct / width).floor() as i64
            }
            SlotPolicy::NonUniform => {
                for (index, edge) in neuron.slot_cfg.nonuniform_edges.iter().enumerate() {
                    if delta_pct <= *edge {
                        return index as i64;
                    }
                }
                neuron.slot_cfg.nonuniform_edges.len() as i64
            }
        }
    }
}
