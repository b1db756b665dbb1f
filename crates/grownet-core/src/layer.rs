//! Layers: neuron populations sharing one lateral bus
//!
//! A layer is an arena of neurons with stable indices plus exactly one
//! bus. Kind-specific behavior (2D sensor grids, smoothed output frames,
//! flat ND sensors) hangs off a tag so inter-layer routing can stay
//! index-based. Drive methods return the fired `(index, amplitude)` pairs;
//! the region fans those out through synapses and tracts.

use crate::bus::LateralBus;
use crate::error::{GrowNetError, Result};
use crate::neuron::{Neuron, NeuronKind, INHIBITION_PULSE, MODULATION_PULSE};
use crate::slot_config::SlotConfig;

/// Structural variant of a layer.
#[derive(Debug, Clone)]
pub enum LayerKind {
    /// Mixed excitatory/inhibitory/modulatory population.
    Mixed,
    /// Shape-aware sensor grid (e.g. a grayscale image).
    Input2D {
        /// Grid height.
        height: usize,
        /// Grid width.
        width: usize,
        /// Per-pixel stimulus gain.
        gain: f64,
        /// Sensor threshold imprint slack.
        epsilon_fire: f64,
    },
    /// Shape-aware smoothed sink grid with a readable frame.
    Output2D {
        /// Grid height.
        height: usize,
        /// Grid width.
        width: usize,
        /// EMA smoothing applied at end of tick.
        smoothing: f64,
        /// Row-major frame refreshed at end of tick.
        frame: Vec<f64>,
    },
    /// Flat N-dimensional sensor.
    InputNd {
        /// Tensor shape; product of dims is the neuron count.
        shape: Vec<usize>,
        /// Per-element stimulus gain.
        gain: f64,
        /// Sensor threshold imprint slack.
        epsilon_fire: f64,
    },
}

/// A population of neurons and its lateral bus.
#[derive(Debug, Clone)]
pub struct Layer {
    pub(crate) kind: LayerKind,
    pub(crate) neurons: Vec<Neuron>,
    pub(crate) bus: LateralBus,
    pub(crate) neuron_limit: i64,
}

impl Layer {
    /// Create a mixed E/I/M layer. Neurons share the config and the bus.
    pub fn new_mixed(
        excitatory: usize,
        inhibitory: usize,
        modulatory: usize,
        slot_cfg: SlotConfig,
    ) -> Self {
        let mut neurons = Vec::with_capacity(excitatory + inhibitory + modulatory);
        for _ in 0..excitatory {
            neurons.push(Neuron::new(NeuronKind::Excitatory, slot_cfg.clone()));
        }
        for _ in 0..inhibitory {
            neurons.push(Neuron::new(NeuronKind::Inhibitory, slot_cfg.clone()));
        }
        for _ in 0..modulatory {
            neurons.push(Neuron::new(NeuronKind::Modulatory, slot_cfg.clone()));
        }
        Self {
            kind: LayerKind::Mixed,
            neurons,
            bus: LateralBus::new(),
            neuron_limit: slot_cfg.layer_neuron_limit_default,
        }
    }

    /// Create a 2D sensor layer of `height × width` input neurons.
    pub fn new_input_2d(height: usize, width: usize, gain: f64, epsilon_fire: f64) -> Result<Self> {
        if height == 0 || width == 0 {
            return Err(GrowNetError::bad_config(
                "input layer dimensions must be > 0",
            ));
        }
        let mut neurons = Vec::with_capacity(height * width);
        for _ in 0..height * width {
            neurons.push(Neuron::new(
                NeuronKind::input(gain, epsilon_fire),
                SlotConfig::default(),
            ));
        }
        Ok(Self {
            kind: LayerKind::Input2D {
                height,
                width,
                gain,
                epsilon_fire,
            },
            neurons,
            bus: LateralBus::new(),
            neuron_limit: -1,
        })
    }

    /// Create a 2D sink layer of `height × width` output neurons.
    pub fn new_output_2d(height: usize, width: usize, smoothing: f64) -> Result<Self> {
        if height == 0 || width == 0 {
            return Err(GrowNetError::bad_config(
                "output layer dimensions must be > 0",
            ));
        }
        let mut neurons = Vec::with_capacity(height * width);
        for _ in 0..height * width {
            neurons.push(Neuron::new(NeuronKind::output(smoothing), SlotConfig::default()));
        }
        Ok(Self {
            kind: LayerKind::Output2D {
                height,
                width,
                smoothing,
                frame: vec![0.0; height * width],
            },
            neurons,
            bus: LateralBus::new(),
            neuron_limit: -1,
        })
    }

    /// Create a flat ND sensor layer.
    pub fn new_input_nd(shape: &[usize], gain: f64, epsilon_fire: f64) -> Result<Self> {
        if shape.is_empty() {
            return Err(GrowNetError::bad_shape("shape must have rank >= 1"));
        }
        if shape.iter().any(|&dim| dim == 0) {
            return Err(GrowNetError::bad_shape("shape dims must be > 0"));
        }
        let size: usize = shape.iter().product();
        let mut neurons = Vec::with_capacity(size);
        for _ in 0..size {
            neurons.push(Neuron::new(
                NeuronKind::input(gain, epsilon_fire),
                SlotConfig::default(),
            ));
        }
        Ok(Self {
            kind: LayerKind::InputNd {
                shape: shape.to_vec(),
                gain,
                epsilon_fire,
            },
            neurons,
            bus: LateralBus::new(),
            neuron_limit: -1,
        })
    }

    /// Drive every neuron with a scalar for this tick.
    pub fn forward(&mut self, value: f64) -> Vec<(usize, f64)> {
        let mut fired = Vec::new();
        for index in 0..self.neurons.len() {
            let modulation = self.bus.modulation_factor();
            let now = self.bus.current_step();
            if self.neurons[index].on_input(value, modulation, now) {
                self.after_fire(index, &mut fired);
            }
        }
        fired
    }

    /// Drive a 2D sensor layer with a row-major frame.
    pub fn forward_image(&mut self, frame: &[Vec<f64>]) -> Result<Vec<(usize, f64)>> {
        let (height, width) = match self.kind {
            LayerKind::Input2D { height, width, .. } => (height, width),
            _ => {
                return Err(GrowNetError::bad_shape(
                    "forward_image requires a 2D input layer",
                ))
            }
        };
        if frame.len() != height || frame.iter().any(|row| row.len() != width) {
            return Err(GrowNetError::bad_shape(format!(
                "frame shape does not match input layer {}x{}",
                height, width
            )));
        }
        let mut fired = Vec::new();
        for row in 0..height {
            for col in 0..width {
                let index = row * width + col;
                let modulation = self.bus.modulation_factor();
                let now = self.bus.current_step();
                if self.neurons[index].on_input(frame[row][col], modulation, now) {
                    self.after_fire(index, &mut fired);
                }
            }
        }
        Ok(fired)
    }

    /// Drive a flat ND sensor layer, validating the shape first.
    pub fn forward_nd(&mut self, flat: &[f64], shape: &[usize]) -> Result<Vec<(usize, f64)>> {
        if !self.has_shape(shape) {
            return Err(GrowNetError::bad_shape(
                "shape mismatch with bound ND input layer",
            ));
        }
        if flat.len() != self.neurons.len() {
            return Err(GrowNetError::bad_shape(format!(
                "flat length {} != expected {}",
                flat.len(),
                self.neurons.len()
            )));
        }
        let mut fired = Vec::new();
        for (index, &value) in flat.iter().enumerate() {
            let modulation = self.bus.modulation_factor();
            let now = self.bus.current_step();
            if self.neurons[index].on_input(value, modulation, now) {
                self.after_fire(index, &mut fired);
            }
        }
        Ok(fired)
    }

    /// Whether this is an ND sensor layer with exactly the given shape.
    pub fn has_shape(&self, shape: &[usize]) -> bool {
        match &self.kind {
            LayerKind::InputNd { shape: own, .. } => own.as_slice() == shape,
            _ => false,
        }
    }

    /// Destination-side delivery without 2D context.
    ///
    /// Sink layers route by source index; mixed layers treat the event as
    /// a uniform external drive.
    pub fn propagate_from(&mut self, source_index: usize, value: f64) -> Vec<(usize, f64)> {
        match self.kind {
            LayerKind::Output2D { .. } => {
                if source_index < self.neurons.len() {
                    let modulation = self.bus.modulation_factor();
                    let now = self.bus.current_step();
                    // Firing is absorbed by the sink; nothing cascades.
                    self.neurons[source_index].on_input(value, modulation, now);
                }
                Vec::new()
            }
            LayerKind::Mixed => self.forward(value),
            _ => Vec::new(),
        }
    }

    /// Destination-side delivery with the source's 2D shape.
    ///
    /// Maps `source_index` to `(row, col)` and drives each neuron's
    /// spatial path; neurons without spatial slotting fall back to the
    /// scalar path internally.
    pub fn propagate_from_2d(
        &mut self,
        source_index: usize,
        value: f64,
        height: usize,
        width: usize,
    ) -> Vec<(usize, f64)> {
        if !matches!(self.kind, LayerKind::Mixed) {
            return self.propagate_from(source_index, value);
        }
        let (row, col) = if width > 0 && height > 0 {
            (source_index / width, source_index % width)
        } else {
            (0, 0)
        };
        let mut fired = Vec::new();
        for index in 0..self.neurons.len() {
            let modulation = self.bus.modulation_factor();
            let now = self.bus.current_step();
            if self.neurons[index].on_input_2d(value, row, col, modulation, now) {
                self.after_fire(index, &mut fired);
            }
        }
        fired
    }

    /// Deliver a value to one neuron (synapse-targeted delivery).
    pub(crate) fn deliver(&mut self, neuron_index: usize, value: f64) -> Option<(usize, f64)> {
        if neuron_index >= self.neurons.len() {
            return None;
        }
        let modulation = self.bus.modulation_factor();
        let now = self.bus.current_step();
        if self.neurons[neuron_index].on_input(value, modulation, now) {
            let mut fired = Vec::new();
            self.after_fire(neuron_index, &mut fired);
            return fired.pop();
        }
        None
    }

    /// Deliver to a sink-map target: `on_input`, with `on_output` applied
    /// on fire (sink kinds do that internally; other kinds just absorb).
    pub(crate) fn deliver_to_sink(&mut self, neuron_index: usize, value: f64) {
        if neuron_index >= self.neurons.len() {
            return;
        }
        let modulation = self.bus.modulation_factor();
        let now = self.bus.current_step();
        self.neurons[neuron_index].on_input(value, modulation, now);
    }

    /// Reinforce the source neuron's outgoing synapses for a fired event
    /// and return the targets whose gate passed.
    pub(crate) fn collect_fanout(&mut self, source_index: usize, value: f64) -> Vec<(usize, usize)> {
        let modulation = self.bus.modulation_factor();
        let now = self.bus.current_step();
        let mut passed = Vec::new();
        for synapse in self.neurons[source_index].outgoing.iter_mut() {
            synapse.weight.reinforce(modulation);
            synapse.last_step = now;
            if synapse.weight.update_threshold(value) {
                passed.push((synapse.target_layer, synapse.target_neuron));
            }
        }
        passed
    }

    fn after_fire(&mut self, index: usize, fired: &mut Vec<(usize, f64)>) {
        match self.neurons[index].kind {
            NeuronKind::Inhibitory => {
                self.bus.set_inhibition(INHIBITION_PULSE);
                fired.push((index, self.neurons[index].last_input_value()));
            }
            NeuronKind::Modulatory => {
                self.bus.set_modulation(MODULATION_PULSE);
                fired.push((index, self.neurons[index].last_input_value()));
            }
            NeuronKind::Output { .. } => {
                // Sinks absorb; nothing downstream to notify.
            }
            _ => {
                fired.push((index, self.neurons[index].last_input_value()));
            }
        }
    }

    /// End-of-tick housekeeping: neuron EMA updates, output frame refresh,
    /// then bus decay.
    pub fn end_tick(&mut self) {
        for neuron in &mut self.neurons {
            neuron.end_tick();
        }
        if let LayerKind::Output2D { frame, .. } = &mut self.kind {
            for (index, neuron) in self.neurons.iter().enumerate() {
                frame[index] = neuron.output_value();
            }
        }
        self.bus.decay();
    }

    /// Clone a grown neuron from a seed, sharing config and limits.
    ///
    /// Capacity checks and auto-wiring are the region's job.
    pub(crate) fn grow_from_seed(&mut self, seed_index: usize) -> usize {
        let seed = &self.neurons[seed_index];
        let kind = seed.kind.spawn_like();
        let mut grown = Neuron::new(kind, seed.slot_cfg.clone());
        grown.slot_limit = seed.slot_limit;
        self.neurons.push(grown);
        self.neurons.len() - 1
    }

    // ---- accessors ----

    /// The layer's structural kind.
    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    /// Grid height (0 for non-2D layers).
    pub fn height(&self) -> usize {
        match self.kind {
            LayerKind::Input2D { height, .. } | LayerKind::Output2D { height, .. } => height,
            _ => 0,
        }
    }

    /// Grid width (0 for non-2D layers).
    pub fn width(&self) -> usize {
        match self.kind {
            LayerKind::Input2D { width, .. } | LayerKind::Output2D { width, .. } => width,
            _ => 0,
        }
    }

    /// Whether this layer participates in growth pressure metrics.
    pub fn is_trainable(&self) -> bool {
        matches!(self.kind, LayerKind::Mixed)
    }

    /// Number of neurons.
    pub fn neuron_count(&self) -> usize {
        self.neurons.len()
    }

    /// The neuron arena.
    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    /// Mutable neuron arena (experiment knobs, freeze helpers).
    pub fn neurons_mut(&mut self) -> &mut Vec<Neuron> {
        &mut self.neurons
    }

    /// The shared lateral bus.
    pub fn bus(&self) -> &LateralBus {
        &self.bus
    }

    /// Mutable lateral bus (pulses).
    pub fn bus_mut(&mut self) -> &mut LateralBus {
        &mut self.bus
    }

    /// Per-layer neuron cap (`-1` = unlimited).
    pub fn neuron_limit(&self) -> i64 {
        self.neuron_limit
    }

    /// Set the per-layer neuron cap (`-1` = unlimited).
    pub fn set_neuron_limit(&mut self, limit: i64) {
        self.neuron_limit = limit;
    }

    /// The current output frame as rows (sink layers only).
    pub fn output_frame(&self) -> Option<Vec<Vec<f64>>> {
        match &self.kind {
            LayerKind::Output2D {
                height,
                width,
                frame,
                ..
            } => {
                let mut rows = Vec::with_capacity(*height);
                for row in 0..*height {
                    rows.push(frame[row * width..(row + 1) * width].to_vec());
                }
                Some(rows)
            }
            _ => None,
        }
    }
}
