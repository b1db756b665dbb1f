//! Slot policy configuration
//!
//! A `SlotConfig` travels with every neuron and controls how its input
//! domain is carved into slots, how anchors are chosen, and when structural
//! growth may be requested.

use crate::error::{GrowNetError, Result};

/// How percent deltas map to slot bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SlotPolicy {
    /// Fixed-width percent bins.
    #[default]
    Fixed,
    /// Ascending custom percent edges.
    NonUniform,
    /// Reserved; behaves as [`SlotPolicy::Fixed`].
    Adaptive,
}

/// How the binning anchor is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AnchorMode {
    /// Anchor at the first observed input (scalar) or position (2D).
    #[default]
    First,
    /// Reserved; behaves as [`AnchorMode::First`].
    Ema,
    /// Reserved; behaves as [`AnchorMode::First`].
    Window,
    /// Reserved; behaves as [`AnchorMode::First`].
    Last,
    /// Anchor at zero (scalar) or `(0, 0)` (2D).
    Origin,
}

/// Per-neuron slotting and growth knobs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotConfig {
    /// Binning policy.
    pub policy: SlotPolicy,
    /// Bin width in percent for [`SlotPolicy::Fixed`] (and `Adaptive`).
    pub fixed_delta_percent: f64,
    /// Ascending percent edges for [`SlotPolicy::NonUniform`].
    pub nonuniform_edges: Vec<f64>,
    /// Anchor selection mode.
    pub anchor_mode: AnchorMode,
    /// Scalar bin width in percent.
    pub bin_width_pct: f64,
    /// Denominator floor for scalar percent deltas.
    pub epsilon_scale: f64,
    /// Reserved re-anchoring threshold (percent).
    pub recenter_threshold_pct: f64,
    /// Reserved re-anchoring lock window (ticks).
    pub recenter_lock_ticks: u32,
    /// Reserved EMA anchor coefficient.
    pub anchor_beta: f64,
    /// Reserved outlier threshold (percent).
    pub outlier_growth_threshold_pct: f64,
    /// Slot capacity per neuron; `-1` means unlimited.
    pub slot_limit: i64,
    /// Whether 2D inputs select spatial slots.
    pub spatial_enabled: bool,
    /// Row bin width in percent for spatial slotting.
    pub row_bin_width_pct: f64,
    /// Column bin width in percent for spatial slotting.
    pub col_bin_width_pct: f64,
    /// Master growth toggle.
    pub growth_enabled: bool,
    /// Whether this neuron may request neuron growth.
    pub neuron_growth_enabled: bool,
    /// Whether a blocked neuron growth may escalate to layer growth.
    pub layer_growth_enabled: bool,
    /// Consecutive fallback selections required before growth.
    pub fallback_growth_threshold: u32,
    /// Minimum ticks between growth requests from one neuron.
    pub neuron_growth_cooldown_ticks: u64,
    /// Minimum observed delta (percent) for a fallback to count.
    pub min_delta_pct_for_growth: f64,
    /// Whether the fallback streak requires the same missing slot each time.
    pub fallback_growth_requires_same_missing_slot: bool,
    /// Default per-layer neuron cap; `-1` means unlimited.
    pub layer_neuron_limit_default: i64,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            policy: SlotPolicy::Fixed,
            fixed_delta_percent: 10.0,
            nonuniform_edges: Vec::new(),
            anchor_mode: AnchorMode::First,
            bin_width_pct: 10.0,
            epsilon_scale: 1e-6,
            recenter_threshold_pct: 35.0,
            recenter_lock_ticks: 20,
            anchor_beta: 0.05,
            outlier_growth_threshold_pct: 60.0,
            slot_limit: 16,
            spatial_enabled: false,
            row_bin_width_pct: 100.0,
            col_bin_width_pct: 100.0,
            growth_enabled: true,
            neuron_growth_enabled: true,
            layer_growth_enabled: false,
            fallback_growth_threshold: 3,
            neuron_growth_cooldown_ticks: 0,
            min_delta_pct_for_growth: 0.0,
            fallback_growth_requires_same_missing_slot: false,
            layer_neuron_limit_default: -1,
        }
    }
}

impl SlotConfig {
    /// A default config with spatial slotting enabled and the given
    /// per-axis bin widths.
    pub fn spatial(row_bin_width_pct: f64, col_bin_width_pct: f64) -> Self {
        Self {
            spatial_enabled: true,
            row_bin_width_pct,
            col_bin_width_pct,
            ..Self::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.fixed_delta_percent <= 0.0 {
            return Err(GrowNetError::bad_config(
                "fixed_delta_percent must be > 0",
            ));
        }
        if self.bin_width_pct <= 0.0 {
            return Err(GrowNetError::bad_config("bin_width_pct must be > 0"));
        }
        if self.row_bin_width_pct <= 0.0 || self.col_bin_width_pct <= 0.0 {
            return Err(GrowNetError::bad_config(
                "row/col bin widths must be > 0",
            ));
        }
        if self.epsilon_scale <= 0.0 {
            return Err(GrowNetError::bad_config("epsilon_scale must be > 0"));
        }
        if self.slot_limit < -1 {
            return Err(GrowNetError::bad_config("slot_limit must be >= -1"));
        }
        if self.layer_neuron_limit_default < -1 {
            return Err(GrowNetError::bad_config(
                "layer_neuron_limit_default must be >= -1",
            ));
        }
        if self.policy == SlotPolicy::NonUniform {
            if self.nonuniform_edges.is_empty() {
                return Err(GrowNetError::bad_config(
                    "NonUniform policy requires at least one edge",
                ));
            }
            let ascending = self
                .nonuniform_edges
                .windows(2)
                .all(|pair| pair[0] < pair[1]);
            if !ascending {
                return Err(GrowNetError::bad_config(
                    "nonuniform_edges must be strictly ascending",
                ));
            }
        }
        Ok(())
    }
}
