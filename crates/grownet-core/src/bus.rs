//! Lateral bus: per-layer transient inhibition/modulation and the tick counter
//!
//! The decay contract is load-bearing: inhibition decays multiplicatively
//! toward zero (never reset to 1.0), modulation resets to 1.0 every tick,
//! and the step counter advances exactly once per decay. Growth cooldowns
//! and the bus tests all lean on this.

/// Default multiplicative inhibition decay per tick.
pub const DEFAULT_INHIBITION_DECAY: f64 = 0.90;

/// Per-layer transient signal carrier and monotonic step counter.
///
/// The same type serves as the region-wide bus; the contract is identical
/// at both scopes.
#[derive(Debug, Clone, PartialEq)]
pub struct LateralBus {
    inhibition_factor: f64,
    modulation_factor: f64,
    inhibition_decay: f64,
    current_step: u64,
}

impl LateralBus {
    /// Create a bus with the default inhibition decay.
    pub fn new() -> Self {
        Self::with_inhibition_decay(DEFAULT_INHIBITION_DECAY)
    }

    /// Create a bus with a custom inhibition decay factor.
    pub fn with_inhibition_decay(inhibition_decay: f64) -> Self {
        Self {
            inhibition_factor: 0.0,
            modulation_factor: 1.0,
            inhibition_decay,
            current_step: 0,
        }
    }

    /// Set the inhibition factor for this tick.
    pub fn set_inhibition(&mut self, factor: f64) {
        self.inhibition_factor = factor;
    }

    /// Set the modulation factor for this tick.
    pub fn set_modulation(&mut self, factor: f64) {
        self.modulation_factor = factor;
    }

    /// Current inhibition factor (0.0 = none).
    pub fn inhibition_factor(&self) -> f64 {
        self.inhibition_factor
    }

    /// Current modulation factor (1.0 = neutral).
    pub fn modulation_factor(&self) -> f64 {
        self.modulation_factor
    }

    /// The configured inhibition decay factor.
    pub fn inhibition_decay(&self) -> f64 {
        self.inhibition_decay
    }

    /// Monotonic step counter, advanced by [`LateralBus::decay`].
    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    /// End-of-tick transient decay.
    ///
    /// Inhibition is multiplied by the decay factor; modulation is reset to
    /// 1.0; the step counter increments.
    pub fn decay(&mut self) {
        self.inhibition_factor *= self.inhibition_decay;
        self.modulation_factor = 1.0;
        self.current_step += 1;
    }
}

impl Default for LateralBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decay_contract() {
        let mut bus = LateralBus::new();
        bus.set_inhibition(1.0);
        bus.set_modulation(2.5);

        bus.decay();
        assert!((bus.inhibition_factor() - 0.9).abs() < 1e-12);
        assert_eq!(bus.modulation_factor(), 1.0);
        assert_eq!(bus.current_step(), 1);

        // Inhibition keeps decaying, it is never reset to 1.0.
        bus.decay();
        assert!((bus.inhibition_factor() - 0.81).abs() < 1e-12);
        assert_eq!(bus.current_step(), 2);
    }

    #[test]
    fn test_custom_decay_factor() {
        let mut bus = LateralBus::with_inhibition_decay(0.5);
        bus.set_inhibition(0.8);
        bus.decay();
        assert!((bus.inhibition_factor() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_fresh_bus_is_neutral() {
        let bus = LateralBus::new();
        assert_eq!(bus.inhibition_factor(), 0.0);
        assert_eq!(bus.modulation_factor(), 1.0);
        assert_eq!(bus.current_step(), 0);
    }
}
