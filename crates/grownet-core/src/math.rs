//! Scalar math helpers shared by weights and slot binning

/// Interpolation used inside the soft bands of [`smooth_clamp_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ClampMode {
    /// Cubic Hermite `h(t) = t^2 (3 - 2t)`; C1 continuous.
    #[default]
    Cubic,
    /// Quintic `h(t) = t^3 (10 - 15t + 6t^2)`; C2 continuous.
    Quintic,
}

impl ClampMode {
    fn ease(self, t: f64) -> f64 {
        match self {
            ClampMode::Cubic => t * t * (3.0 - 2.0 * t),
            ClampMode::Quintic => t * t * t * (10.0 - 15.0 * t + 6.0 * t * t),
        }
    }
}

/// Hard clamp to `[lo, hi]`.
pub fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
    if value < lo {
        lo
    } else if value > hi {
        hi
    } else {
        value
    }
}

/// Hard clamp to `[0, 1]`.
pub fn clamp01(value: f64) -> f64 {
    clamp(value, 0.0, 1.0)
}

/// Smooth clamp with the default soft band (10% of the range) and cubic knee.
pub fn smooth_clamp(value: f64, lo: f64, hi: f64) -> f64 {
    smooth_clamp_with(value, lo, hi, None, ClampMode::Cubic)
}

/// Smooth clamp to `[lo, hi]` with a soft knee near each bound.
///
/// Outside the soft bands the mapping is the identity (hard-clamped at the
/// bounds); inside a band of width `soft` the value is eased toward the
/// bound with the chosen polynomial, so repeated increments saturate
/// smoothly instead of slamming into the rail. `soft` defaults to 10% of
/// the range and is always capped at half the range.
pub fn smooth_clamp_with(value: f64, lo: f64, hi: f64, soft: Option<f64>, mode: ClampMode) -> f64 {
    let range = hi - lo;
    if !(range > 0.0) {
        return clamp(value, lo.min(hi), hi.max(lo));
    }
    let soft = soft.unwrap_or(0.1 * range).min(0.5 * range);
    if soft <= 0.0 {
        return clamp(value, lo, hi);
    }
    if value <= lo {
        return lo;
    }
    if value >= hi {
        return hi;
    }
    if value < lo + soft {
        let t = (value - lo) / soft;
        return lo + soft * mode.ease(t);
    }
    if value > hi - soft {
        let t = (hi - value) / soft;
        return hi - soft * mode.ease(t);
    }
    value
}

/// Percent delta of `current` relative to `previous`.
///
/// A zero previous value maps to 0% (both zero) or 100% (step from zero),
/// keeping bin arithmetic finite.
pub fn percent_delta(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return if current == 0.0 { 0.0 } else { 100.0 };
    }
    (current - previous).abs() / previous.abs() * 100.0
}
