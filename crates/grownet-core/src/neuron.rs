//! Neurons: slot management, firing, hooks, and growth requests
//!
//! A neuron owns its slot map and outgoing synapses; everything else it
//! touches (the lateral bus, the region) is handed in by the owning layer
//! as plain values, so the per-tick state machine stays borrow-friendly.
//! Variant behavior is a tag: only the fire step (and, for outputs, the
//! end-of-tick EMA) differs between kinds.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::math::clamp01;
use crate::slot_config::SlotConfig;
use crate::slot_engine::{SlotEngine, SlotKey};
use crate::tract::TractId;
use crate::weight::Weight;

/// Bus inhibition level set by a firing inhibitory neuron, for one tick.
pub const INHIBITION_PULSE: f64 = 0.7;
/// Bus modulation level set by a firing modulatory neuron, for one tick.
pub const MODULATION_PULSE: f64 = 1.5;

/// Directed edge to another neuron, with its own plastic weight.
#[derive(Debug, Clone, PartialEq)]
pub struct Synapse {
    /// Target layer index.
    pub target_layer: usize,
    /// Target neuron index within the target layer.
    pub target_neuron: usize,
    /// Whether this edge is feedback wiring.
    pub feedback: bool,
    /// Plastic gate weight for this edge.
    pub weight: Weight,
    /// Bus step at which this edge last carried an event.
    pub last_step: u64,
}

impl Synapse {
    /// Create a new synapse toward `(target_layer, target_neuron)`.
    pub fn new(target_layer: usize, target_neuron: usize, feedback: bool) -> Self {
        Self {
            target_layer,
            target_neuron,
            feedback,
            weight: Weight::new(),
            last_step: 0,
        }
    }
}

/// Behavioral variant of a neuron.
#[derive(Debug, Clone, PartialEq)]
pub enum NeuronKind {
    /// Default propagating neuron.
    Excitatory,
    /// Raises bus inhibition for one tick when it fires; does not propagate.
    Inhibitory,
    /// Raises bus modulation for one tick when it fires; does not propagate.
    Modulatory,
    /// Single-slot sensor; the hosting layer performs delivery.
    Input {
        /// Stimulus gain applied before clamping to `[0, 1]`.
        gain: f64,
        /// Fraction below the first stimulus at which the threshold imprints.
        epsilon_fire: f64,
    },
    /// Single-slot smoothed sink with an EMA output value.
    Output {
        /// EMA coefficient applied at end of tick.
        smoothing: f64,
        /// Amplitude accepted this tick, consumed by `end_tick`.
        pending: f64,
        /// Smoothed output value.
        output_value: f64,
    },
}

impl NeuronKind {
    /// An input sensor kind.
    pub fn input(gain: f64, epsilon_fire: f64) -> Self {
        Self::Input { gain, epsilon_fire }
    }

    /// An output sink kind.
    pub fn output(smoothing: f64) -> Self {
        Self::Output {
            smoothing,
            pending: 0.0,
            output_value: 0.0,
        }
    }

    /// Whether firing fans out along outgoing synapses.
    pub fn propagates(&self) -> bool {
        matches!(self, Self::Excitatory | Self::Input { .. })
    }

    /// Whether this is a sensor kind.
    pub fn is_input(&self) -> bool {
        matches!(self, Self::Input { .. })
    }

    /// Whether this is a sink kind.
    pub fn is_output(&self) -> bool {
        matches!(self, Self::Output { .. })
    }

    /// The same variant with transient state reset, for grown neurons.
    pub(crate) fn spawn_like(&self) -> Self {
        match self {
            Self::Output { smoothing, .. } => Self::output(*smoothing),
            other => other.clone(),
        }
    }
}

/// How [`Neuron::value`] summarizes the slot map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueMode {
    /// Max of `strength − theta` across slots.
    Readiness,
    /// Mean of `ema_rate` across slots.
    FiringRate,
    /// Sum of `|strength|` across slots.
    Memory,
}

/// A slot-structured neuron.
#[derive(Debug, Clone)]
pub struct Neuron {
    pub(crate) kind: NeuronKind,
    pub(crate) slots: BTreeMap<SlotKey, Weight>,
    pub(crate) outgoing: SmallVec<[Synapse; 2]>,
    pub(crate) fire_hooks: SmallVec<[TractId; 2]>,
    pub(crate) slot_cfg: SlotConfig,
    pub(crate) slot_limit: i64,

    pub(crate) anchor: Option<f64>,
    pub(crate) anchor_row: Option<i64>,
    pub(crate) anchor_col: Option<i64>,

    pub(crate) last_slot: Option<SlotKey>,
    pub(crate) last_frozen_slot: Option<SlotKey>,
    pub(crate) prefer_last_slot_once: bool,

    pub(crate) last_slot_used_fallback: bool,
    pub(crate) last_missing_slot: Option<SlotKey>,
    pub(crate) prev_missing_slot: Option<SlotKey>,
    pub(crate) last_max_axis_delta_pct: f64,
    pub(crate) fallback_streak: u32,
    pub(crate) last_growth_tick: Option<u64>,
    pub(crate) growth_requested: bool,

    pub(crate) fired_last: bool,
    pub(crate) last_input_value: f64,
}

impl Neuron {
    /// Create a neuron of the given kind.
    ///
    /// Sensor and sink kinds get their single slot 0 up front and a slot
    /// limit of 1; other kinds start empty with the config's limit.
    pub fn new(kind: NeuronKind, slot_cfg: SlotConfig) -> Self {
        let mut slots = BTreeMap::new();
        let mut slot_limit = -1;
        if kind.is_input() || kind.is_output() {
            slots.insert(SlotKey::Scalar(0), Weight::new());
            slot_limit = 1;
        }
        Self {
            kind,
            slots,
            outgoing: SmallVec::new(),
            fire_hooks: SmallVec::new(),
            slot_cfg,
            slot_limit,
            anchor: None,
            anchor_row: None,
            anchor_col: None,
            last_slot: None,
            last_frozen_slot: None,
            prefer_last_slot_once: false,
            last_slot_used_fallback: false,
            last_missing_slot: None,
            prev_missing_slot: None,
            last_max_axis_delta_pct: 0.0,
            fallback_streak: 0,
            last_growth_tick: None,
            growth_requested: false,
            fired_last: false,
            last_input_value: 0.0,
        }
    }

    /// Drive the neuron with a scalar input; returns whether it fired.
    ///
    /// The caller supplies the bus modulation factor and the current bus
    /// step; bus side effects of firing (inhibition/modulation pulses) are
    /// applied by the owning layer.
    pub fn on_input(&mut self, value: f64, modulation: f64, now: u64) -> bool {
        match self.kind {
            NeuronKind::Input { gain, epsilon_fire } => {
                self.sense(value, gain, epsilon_fire, modulation, now)
            }
            NeuronKind::Output { .. } => self.absorb(value, modulation, now),
            _ => {
                let key = self.select_scalar_slot(value);
                self.drive_slot(key, value, modulation, now)
            }
        }
    }

    /// Drive the neuron with a 2D-located input; returns whether it fired.
    ///
    /// Falls back to the scalar path when spatial slotting is disabled or
    /// the variant has no spatial slots.
    pub fn on_input_2d(&mut self, value: f64, row: usize, col: usize, modulation: f64, now: u64) -> bool {
        if !self.slot_cfg.spatial_enabled || self.kind.is_input() || self.kind.is_output() {
            return self.on_input(value, modulation, now);
        }
        let key = match self.take_preferred_slot() {
            Some(key) => key,
            None => SlotEngine::select_or_create_slot_2d(self, row as i64, col as i64),
        };
        self.drive_slot(key, value, modulation, now)
    }

    /// Accept an output amplitude (sink kinds only).
    pub fn on_output(&mut self, amplitude: f64) {
        if let NeuronKind::Output { pending, .. } = &mut self.kind {
            *pending = amplitude;
        }
    }

    /// End-of-tick housekeeping: sinks fold the pending amplitude into
    /// their EMA output value.
    pub fn end_tick(&mut self) {
        if let NeuronKind::Output {
            smoothing,
            pending,
            output_value,
        } = &mut self.kind
        {
            *output_value = (1.0 - *smoothing) * *output_value + *smoothing * *pending;
            *pending = 0.0;
        }
    }

    fn select_scalar_slot(&mut self, value: f64) -> SlotKey {
        match self.take_preferred_slot() {
            Some(key) => key,
            None => SlotEngine::select_or_create_slot(self, value),
        }
    }

    /// Consume the one-shot reuse hint set by `unfreeze_last_slot`.
    fn take_preferred_slot(&mut self) -> Option<SlotKey> {
        if !self.prefer_last_slot_once {
            return None;
        }
        let key = self.last_slot?;
        self.prefer_last_slot_once = false;
        self.last_slot_used_fallback = false;
        Some(key)
    }

    fn drive_slot(&mut self, key: SlotKey, value: f64, modulation: f64, now: u64) -> bool {
        let slot = self
            .slots
            .get_mut(&key)
            .expect("selected slot exists in the slot map");
        slot.reinforce(modulation);
        slot.touch(now);
        let fired = slot.update_threshold(value);
        self.last_slot = Some(key);
        self.fired_last = fired;
        self.last_input_value = value;
        self.maybe_request_neuron_growth(now);
        fired
    }

    fn sense(&mut self, value: f64, gain: f64, epsilon_fire: f64, modulation: f64, now: u64) -> bool {
        let stimulus = clamp01(value * gain);
        let effective = clamp01(stimulus * modulation);
        let slot = self
            .slots
            .get_mut(&SlotKey::Scalar(0))
            .expect("sensor slot 0 exists");
        if !slot.seen_first() {
            // S0 imprint: just below the first stimulus, so it fires once.
            slot.imprint_threshold((effective * (1.0 - epsilon_fire)).max(0.0));
        }
        slot.set_strength(effective);
        slot.touch(now);
        let fired = slot.update_threshold(effective);
        self.last_slot = Some(SlotKey::Scalar(0));
        self.fired_last = fired;
        self.last_input_value = effective;
        fired
    }

    fn absorb(&mut self, value: f64, modulation: f64, now: u64) -> bool {
        let slot = self
            .slots
            .get_mut(&SlotKey::Scalar(0))
            .expect("sink slot 0 exists");
        slot.reinforce(modulation);
        slot.touch(now);
        let fired = slot.update_threshold(value);
        self.last_slot = Some(SlotKey::Scalar(0));
        self.fired_last = fired;
        self.last_input_value = value;
        if fired {
            self.on_output(value);
        }
        fired
    }

    /// Add an outgoing synapse; returns its index in the outgoing list.
    pub fn connect(&mut self, target_layer: usize, target_neuron: usize, feedback: bool) -> usize {
        self.outgoing
            .push(Synapse::new(target_layer, target_neuron, feedback));
        self.outgoing.len() - 1
    }

    /// Whether an outgoing synapse to the given target already exists.
    pub fn has_edge_to(&self, target_layer: usize, target_neuron: usize) -> bool {
        self.outgoing
            .iter()
            .any(|s| s.target_layer == target_layer && s.target_neuron == target_neuron)
    }

    /// Subscribe a tract to this neuron's fire events.
    pub fn register_fire_hook(&mut self, tract: TractId) {
        self.fire_hooks.push(tract);
    }

    /// Freeze the most recently selected slot. Returns false when no slot
    /// has been selected yet.
    pub fn freeze_last_slot(&mut self) -> bool {
        let Some(key) = self.last_slot else {
            return false;
        };
        if let Some(slot) = self.slots.get_mut(&key) {
            slot.freeze();
            self.last_frozen_slot = Some(key);
            return true;
        }
        false
    }

    /// Unfreeze the last frozen slot (falling back to the last selected
    /// one) and arrange for the very next input to reuse exactly that slot.
    pub fn unfreeze_last_slot(&mut self) -> bool {
        let Some(key) = self.last_frozen_slot.or(self.last_slot) else {
            return false;
        };
        if let Some(slot) = self.slots.get_mut(&key) {
            slot.unfreeze();
            self.last_slot = Some(key);
            self.prefer_last_slot_once = true;
            return true;
        }
        false
    }

    /// Drop synapses that are simultaneously stale and weak.
    ///
    /// A synapse survives if it carried an event within `stale_window`
    /// steps of `now`, or if its weight strength is at least
    /// `min_strength`. Returns the number removed.
    pub fn prune_synapses(&mut self, now: u64, stale_window: u64, min_strength: f64) -> usize {
        let before = self.outgoing.len();
        self.outgoing.retain(|s| {
            now.saturating_sub(s.last_step) <= stale_window
                || s.weight.strength() >= min_strength
        });
        before - self.outgoing.len()
    }

    /// A single scalar summary derived from this neuron's slots.
    pub fn value(&self, mode: ValueMode) -> f64 {
        if self.slots.is_empty() {
            return 0.0;
        }
        match mode {
            ValueMode::Readiness => self
                .slots
                .values()
                .map(|w| w.strength() - w.theta())
                .fold(f64::NEG_INFINITY, f64::max),
            ValueMode::FiringRate => {
                self.slots.values().map(Weight::ema_rate).sum::<f64>() / self.slots.len() as f64
            }
            ValueMode::Memory => self.slots.values().map(|w| w.strength().abs()).sum(),
        }
    }

    /// Slot capacity in effect: the per-neuron override when set, else the
    /// config default.
    pub fn effective_slot_limit(&self) -> i64 {
        if self.slot_limit >= 0 {
            self.slot_limit
        } else {
            self.slot_cfg.slot_limit
        }
    }

    /// Whether the slot map has reached its capacity.
    pub fn at_slot_capacity(&self) -> bool {
        let limit = self.effective_slot_limit();
        limit > 0 && self.slots.len() as i64 >= limit
    }

    /// Growth escalation guard, run after every slot selection.
    ///
    /// Pressure only accumulates while the neuron is at capacity and the
    /// last selection fell back; the min-delta and same-missing-slot gates
    /// reset or restart the streak. A successful request latches
    /// `growth_requested` for the region to service and starts the
    /// per-neuron cooldown.
    fn maybe_request_neuron_growth(&mut self, now: u64) {
        if !self.slot_cfg.growth_enabled || !self.slot_cfg.neuron_growth_enabled {
            return;
        }
        if !(self.at_slot_capacity() && self.last_slot_used_fallback) {
            self.fallback_streak = 0;
            self.prev_missing_slot = None;
            return;
        }
        if self.slot_cfg.min_delta_pct_for_growth > 0.0
            && self.last_max_axis_delta_pct < self.slot_cfg.min_delta_pct_for_growth
        {
            self.fallback_streak = 0;
            return;
        }
        if self.slot_cfg.fallback_growth_requires_same_missing_slot {
            if self.prev_missing_slot.is_some() && self.prev_missing_slot == self.last_missing_slot
            {
                self.fallback_streak += 1;
            } else {
                self.fallback_streak = 1;
            }
        } else {
            self.fallback_streak += 1;
        }
        self.prev_missing_slot = self.last_missing_slot;

        if self.fallback_streak >= self.slot_cfg.fallback_growth_threshold {
            let cooled = match self.last_growth_tick {
                Some(last) => {
                    now.saturating_sub(last) >= self.slot_cfg.neuron_growth_cooldown_ticks
                }
                None => true,
            };
            if cooled {
                log::debug!("neuron requests growth at step {now}");
                self.growth_requested = true;
                self.last_growth_tick = Some(now);
                self.fallback_streak = 0;
                self.prev_missing_slot = None;
            }
        }
    }

    /// Consume a latched growth request.
    pub(crate) fn take_growth_request(&mut self) -> bool {
        std::mem::take(&mut self.growth_requested)
    }

    // ---- accessors ----

    /// The neuron's behavioral kind.
    pub fn kind(&self) -> &NeuronKind {
        &self.kind
    }

    /// The slot map.
    pub fn slots(&self) -> &BTreeMap<SlotKey, Weight> {
        &self.slots
    }

    /// Outgoing synapses.
    pub fn outgoing(&self) -> &[Synapse] {
        &self.outgoing
    }

    /// The slot configuration.
    pub fn slot_config(&self) -> &SlotConfig {
        &self.slot_cfg
    }

    /// Mutable slot configuration (experiment knobs).
    pub fn slot_config_mut(&mut self) -> &mut SlotConfig {
        &mut self.slot_cfg
    }

    /// Override the per-neuron slot capacity (`-1` defers to the config).
    pub fn set_slot_limit(&mut self, limit: i64) {
        self.slot_limit = limit;
    }

    /// The per-neuron slot capacity override.
    pub fn slot_limit(&self) -> i64 {
        self.slot_limit
    }

    /// Key of the most recently selected slot.
    pub fn last_slot(&self) -> Option<SlotKey> {
        self.last_slot
    }

    /// Whether the most recent selection used the capacity fallback.
    pub fn last_slot_used_fallback(&self) -> bool {
        self.last_slot_used_fallback
    }

    /// Whether the neuron fired on its most recent input.
    pub fn fired_last(&self) -> bool {
        self.fired_last
    }

    /// The most recent (effective) input value.
    pub fn last_input_value(&self) -> f64 {
        self.last_input_value
    }

    /// Smoothed output value (sink kinds; 0.0 otherwise).
    pub fn output_value(&self) -> f64 {
        match self.kind {
            NeuronKind::Output { output_value, .. } => output_value,
            _ => 0.0,
        }
    }
}
