//! Wiring presets built on top of the core region API
//!
//! Topographic wiring wraps [`Region::connect_layers_windowed`] and
//! computes deterministic distance-based weights from each source pixel to
//! its window center: a Gaussian bump, or a difference-of-Gaussians when a
//! center-surround profile is wanted. Weights are returned to the caller;
//! the core connectivity is untouched beyond the windowed tract.

use std::collections::BTreeMap;

use crate::error::{GrowNetError, Result};
use crate::region::Region;

/// Configuration for topographic windowed wiring.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TopographicConfig {
    /// Window height.
    pub kernel_h: usize,
    /// Window width.
    pub kernel_w: usize,
    /// Row stride.
    pub stride_h: usize,
    /// Column stride.
    pub stride_w: usize,
    /// `"same"` or `"valid"`.
    pub padding: String,
    /// Whether the underlying tract is feedback wiring.
    pub feedback: bool,
    /// `"gaussian"` or `"dog"` (difference of Gaussians).
    pub weight_mode: String,
    /// Center sigma.
    pub sigma_center: f64,
    /// Surround sigma (DoG only; must exceed `sigma_center`).
    pub sigma_surround: f64,
    /// Surround amplitude ratio (DoG only).
    pub surround_ratio: f64,
    /// Normalize incoming weights per center to sum to 1.
    pub normalize_incoming: bool,
}

impl Default for TopographicConfig {
    fn default() -> Self {
        Self {
            kernel_h: 7,
            kernel_w: 7,
            stride_h: 1,
            stride_w: 1,
            padding: "same".to_string(),
            feedback: false,
            weight_mode: "gaussian".to_string(),
            sigma_center: 2.0,
            sigma_surround: 4.0,
            surround_ratio: 0.5,
            normalize_incoming: true,
        }
    }
}

impl TopographicConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.kernel_h == 0 || self.kernel_w == 0 {
            return Err(GrowNetError::bad_config("kernel dims must be >= 1"));
        }
        if self.stride_h == 0 || self.stride_w == 0 {
            return Err(GrowNetError::bad_config("strides must be >= 1"));
        }
        let padding = self.padding.to_ascii_lowercase();
        if padding != "same" && padding != "valid" {
            return Err(GrowNetError::bad_config(
                "padding must be \"same\" or \"valid\"",
            ));
        }
        if self.sigma_center <= 0.0 {
            return Err(GrowNetError::bad_config("sigma_center must be > 0"));
        }
        let mode = self.weight_mode.to_ascii_lowercase();
        if mode != "gaussian" && mode != "dog" {
            return Err(GrowNetError::bad_config(
                "weight_mode must be \"gaussian\" or \"dog\"",
            ));
        }
        if mode == "dog" {
            if self.sigma_surround <= self.sigma_center {
                return Err(GrowNetError::bad_config(
                    "sigma_surround must be > sigma_center for DoG mode",
                ));
            }
            if self.surround_ratio < 0.0 {
                return Err(GrowNetError::bad_config("surround_ratio must be >= 0"));
            }
        }
        Ok(())
    }
}

/// Result of topographic wiring: the windowed unique-source count plus the
/// computed `(source, center)` weights.
#[derive(Debug, Clone, PartialEq)]
pub struct TopographicWiring {
    /// Unique source subscriptions installed by the windowed wiring.
    pub unique_sources: usize,
    /// Deterministic weight per `(source_index, center_index)` pair.
    pub weights: BTreeMap<(usize, usize), f64>,
}

/// Wire two 2D layers topographically and compute source→center weights.
pub fn connect_layers_topographic(
    region: &mut Region,
    source: usize,
    dest: usize,
    config: &TopographicConfig,
) -> Result<TopographicWiring> {
    config.validate()?;

    let unique_sources = region.connect_layers_windowed(
        source,
        dest,
        config.kernel_h,
        config.kernel_w,
        config.stride_h,
        config.stride_w,
        &config.padding,
        config.feedback,
    )?;

    let source_height = region.layer(source)?.height() as i64;
    let source_width = region.layer(source)?.width() as i64;
    let dest_height = region.layer(dest)?.height() as i64;
    let dest_width = region.layer(dest)?.width() as i64;
    if source_height == 0 || dest_height == 0 {
        return Err(GrowNetError::bad_shape(
            "topographic wiring requires 2D source and destination layers",
        ));
    }

    // Mirror the windowed origin enumeration exactly.
    let (kh, kw) = (config.kernel_h as i64, config.kernel_w as i64);
    let (sh, sw) = (config.stride_h as i64, config.stride_w as i64);
    let mut origins = Vec::new();
    if config.padding.eq_ignore_ascii_case("same") {
        let pad_r = (kh - 1) / 2;
        let pad_c = (kw - 1) / 2;
        let mut row = -pad_r;
        while row + kh <= source_height + 2 * pad_r {
            let mut col = -pad_c;
            while col + kw <= source_width + 2 * pad_c {
                origins.push((row, col));
                col += sw;
            }
            row += sh;
        }
    } else {
        let mut row = 0;
        while row + kh <= source_height {
            let mut col = 0;
            while col + kw <= source_width {
                origins.push((row, col));
                col += sw;
            }
            row += sh;
        }
    }

    let dog = config.weight_mode.eq_ignore_ascii_case("dog");
    let mut weights: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (origin_row, origin_col) in origins {
        let row_start = origin_row.max(0);
        let col_start = origin_col.max(0);
        let row_end = (origin_row + kh).min(source_height);
        let col_end = (origin_col + kw).min(source_width);
        if row_start >= row_end || col_start >= col_end {
            continue;
        }
        let center_row = (origin_row + kh / 2).clamp(0, source_height - 1);
        let center_col = (origin_col + kw / 2).clamp(0, source_width - 1);
        let center_index = (center_row * dest_width + center_col) as usize;
        if center_index as i64 >= dest_height * dest_width {
            continue;
        }
        for row in row_start..row_end {
            for col in col_start..col_end {
                let source_index = (row * source_width + col) as usize;
                let dr = (row - center_row) as f64;
                let dc = (col - center_col) as f64;
                let squared = dr * dr + dc * dc;
                let center_term =
                    (-squared / (2.0 * config.sigma_center * config.sigma_center)).exp();
                let value = if dog {
                    let surround_term =
                        (-squared / (2.0 * config.sigma_surround * config.sigma_surround)).exp();
                    (center_term - config.surround_ratio * surround_term).max(0.0)
                } else {
                    center_term
                };
                // First window wins: the center rule makes later duplicates
                // identical anyway.
                weights.entry((source_index, center_index)).or_insert(value);
            }
        }
    }

    if config.normalize_incoming {
        let mut incoming: BTreeMap<usize, f64> = BTreeMap::new();
        for (&(_, center_index), &value) in &weights {
            *incoming.entry(center_index).or_insert(0.0) += value;
        }
        for ((_, center_index), value) in weights.iter_mut() {
            let sum = incoming.get(center_index).copied().unwrap_or(0.0);
            if sum > 1e-12 {
                *value /= sum;
            }
        }
    }

    Ok(TopographicWiring {
        unique_sources,
        weights,
    })
}

/// Per-center incoming weight sums (demo/test helper).
pub fn incoming_weight_sums(
    region: &Region,
    dest: usize,
    weights: &BTreeMap<(usize, usize), f64>,
) -> Result<Vec<f64>> {
    let layer = region.layer(dest)?;
    let size = (layer.height() * layer.width()).max(1);
    let mut totals = vec![0.0; size];
    for (&(_, center_index), &value) in weights {
        if center_index < totals.len() {
            totals[center_index] += value;
        }
    }
    Ok(totals)
}
