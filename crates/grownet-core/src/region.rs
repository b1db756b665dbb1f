//! Region: layers, wiring, ports, pulses, ticks, pruning, growth
//!
//! The region owns every layer and tract and runs the tick pipeline:
//! drive the port's edge layer, drain the two-phase delivery queue
//! (synapse fan-out plus tract hooks), service neuron growth requests,
//! apply the proximity policy, run end-of-tick housekeeping and bus decay,
//! aggregate metrics through the PAL's ordered reduction, and finally give
//! the growth controller one chance to add a spillover layer.
//!
//! All inter-neuron references are `(layer_index, neuron_index)` pairs
//! into region-owned arenas; nothing in the graph owns anything else.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;

use crate::bus::LateralBus;
use crate::error::{GrowNetError, Result};
use crate::growth::{self, GrowthPolicy};
use crate::layer::{Layer, LayerKind};
use crate::metrics::{frame_stats, PruneSummary, RegionMetrics};
use crate::proximity::{ProximityConfig, ProximityEngine};
use crate::slot_config::SlotConfig;
use crate::tract::{Tract, TractId};

/// Environment variable enabling spatial metrics on 2D ticks.
pub const SPATIAL_METRICS_ENV: &str = "GROWNET_ENABLE_SPATIAL_METRICS";
/// Environment variable switching `delivered_events` to bound-layer counts.
pub const COMPAT_DELIVERED_COUNT_ENV: &str = "GROWNET_COMPAT_DELIVERED_COUNT";

/// A recorded bulk-connect rule, replayed when new neurons grow in.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeshRule {
    /// Source layer index.
    pub src: usize,
    /// Destination layer index.
    pub dst: usize,
    /// Wiring probability the rule was recorded with.
    pub prob: f64,
    /// Whether the rule wires feedback edges.
    pub feedback: bool,
}

/// Queued fire event awaiting fan-out: `(layer, neuron, amplitude)`.
type FireEvent = (usize, usize, f64);

/// The orchestrator of a GrowNet network.
#[derive(Debug)]
pub struct Region {
    name: String,
    pub(crate) layers: Vec<Layer>,
    pub(crate) tracts: Vec<Tract>,
    mesh_rules: Vec<MeshRule>,
    input_ports: HashMap<String, Vec<usize>>,
    output_ports: HashMap<String, Vec<usize>>,
    input_edges: HashMap<String, usize>,
    output_edges: HashMap<String, usize>,
    bus: LateralBus,
    rng: Option<StdRng>,
    growth_policy: Option<GrowthPolicy>,
    pub(crate) last_layer_growth_step: Option<u64>,
    pub(crate) layer_grown_this_tick: bool,
    proximity_config: Option<ProximityConfig>,
    pub(crate) proximity_last_attempt: HashMap<(usize, usize), u64>,
    default_slot_config: SlotConfig,
}

impl Region {
    /// Create an empty region. No RNG is installed; wiring with
    /// probability 1.0 and STEP proximity work without one.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layers: Vec::new(),
            tracts: Vec::new(),
            mesh_rules: Vec::new(),
            input_ports: HashMap::new(),
            output_ports: HashMap::new(),
            input_edges: HashMap::new(),
            output_edges: HashMap::new(),
            bus: LateralBus::new(),
            rng: None,
            growth_policy: None,
            last_layer_growth_step: None,
            layer_grown_this_tick: false,
            proximity_config: None,
            proximity_last_attempt: HashMap::new(),
            default_slot_config: SlotConfig::default(),
        }
    }

    /// Create a region with a seeded RNG for probabilistic wiring.
    pub fn with_seed(name: impl Into<String>, seed: u64) -> Self {
        let mut region = Self::new(name);
        region.set_rng_seed(seed);
        region
    }

    /// Install (or replace) the region RNG with a stable seed.
    pub fn set_rng_seed(&mut self, seed: u64) {
        self.rng = Some(StdRng::seed_from_u64(seed));
    }

    /// Replace the slot configuration used for new mixed layers.
    pub fn set_default_slot_config(&mut self, config: SlotConfig) -> Result<()> {
        config.validate()?;
        self.default_slot_config = config;
        Ok(())
    }

    // ---- construction ----

    /// Add a mixed E/I/M layer; returns its index.
    pub fn add_layer(&mut self, excitatory: usize, inhibitory: usize, modulatory: usize) -> usize {
        self.layers.push(Layer::new_mixed(
            excitatory,
            inhibitory,
            modulatory,
            self.default_slot_config.clone(),
        ));
        self.layers.len() - 1
    }

    /// Add a 2D sensor layer; returns its index.
    pub fn add_input_layer_2d(
        &mut self,
        height: usize,
        width: usize,
        gain: f64,
        epsilon_fire: f64,
    ) -> Result<usize> {
        self.layers
            .push(Layer::new_input_2d(height, width, gain, epsilon_fire)?);
        Ok(self.layers.len() - 1)
    }

    /// Add a 2D sink layer; returns its index.
    pub fn add_output_layer_2d(
        &mut self,
        height: usize,
        width: usize,
        smoothing: f64,
    ) -> Result<usize> {
        self.layers
            .push(Layer::new_output_2d(height, width, smoothing)?);
        Ok(self.layers.len() - 1)
    }

    /// Add a flat ND sensor layer; returns its index.
    pub fn add_input_layer_nd(
        &mut self,
        shape: &[usize],
        gain: f64,
        epsilon_fire: f64,
    ) -> Result<usize> {
        self.layers
            .push(Layer::new_input_nd(shape, gain, epsilon_fire)?);
        Ok(self.layers.len() - 1)
    }

    fn check_layer(&self, index: usize) -> Result<()> {
        if index >= self.layers.len() {
            return Err(GrowNetError::bad_index("layer", index, self.layers.len()));
        }
        Ok(())
    }

    // ---- wiring ----

    /// Wire every source neuron to every destination neuron with the given
    /// probability. Records a mesh rule for future autowiring and returns
    /// the number of edges created.
    pub fn connect_layers(
        &mut self,
        source: usize,
        dest: usize,
        probability: f64,
        feedback: bool,
    ) -> Result<usize> {
        self.check_layer(source)?;
        self.check_layer(dest)?;
        if !(0.0..=1.0).contains(&probability) {
            return Err(GrowNetError::bad_config("probability must be in [0, 1]"));
        }
        if probability < 1.0 && self.rng.is_none() {
            return Err(GrowNetError::bad_config(
                "probabilistic wiring requires a seeded region RNG",
            ));
        }
        let source_count = self.layers[source].neuron_count();
        let dest_count = self.layers[dest].neuron_count();
        let mut edges = 0;
        for si in 0..source_count {
            for di in 0..dest_count {
                if source == dest && si == di {
                    continue;
                }
                let accept = probability >= 1.0
                    || self
                        .rng
                        .as_mut()
                        .map(|rng| rng.gen::<f64>() < probability)
                        .unwrap_or(false);
                if accept {
                    self.layers[source].neurons_mut()[si].connect(dest, di, feedback);
                    edges += 1;
                }
            }
        }
        self.record_mesh_rule(source, dest, probability, feedback);
        Ok(edges)
    }

    /// Deterministic sliding-window wiring from a 2D source.
    ///
    /// Returns the number of unique source subscriptions installed (not
    /// the edge count). With an Output2D destination, every window maps
    /// its source pixels to the output neuron at the window center,
    /// deduplicated per `(source, center)` pair; otherwise the destination
    /// receives events through its 2D propagation hook.
    #[allow(clippy::too_many_arguments)]
    pub fn connect_layers_windowed(
        &mut self,
        source: usize,
        dest: usize,
        kernel_h: usize,
        kernel_w: usize,
        stride_h: usize,
        stride_w: usize,
        padding: &str,
        feedback: bool,
    ) -> Result<usize> {
        self.check_layer(source)?;
        self.check_layer(dest)?;
        let height = self.layers[source].height() as i64;
        let width = self.layers[source].width() as i64;
        if height == 0 || width == 0 {
            return Err(GrowNetError::bad_shape(
                "windowed wiring requires a 2D source layer",
            ));
        }
        if kernel_h == 0 || kernel_w == 0 || stride_h == 0 || stride_w == 0 {
            return Err(GrowNetError::bad_config(
                "kernel and stride must be >= 1",
            ));
        }
        let same = match padding.to_ascii_lowercase().as_str() {
            "same" => true,
            "valid" => false,
            other => {
                return Err(GrowNetError::bad_config(format!(
                    "padding must be \"valid\" or \"same\", got {other:?}"
                )))
            }
        };
        let (kh, kw) = (kernel_h as i64, kernel_w as i64);
        let (sh, sw) = (stride_h as i64, stride_w as i64);

        let mut origins = Vec::new();
        if same {
            let pad_r = (kh - 1) / 2;
            let pad_c = (kw - 1) / 2;
            let mut row = -pad_r;
            while row + kh <= height + 2 * pad_r {
                let mut col = -pad_c;
                while col + kw <= width + 2 * pad_c {
                    origins.push((row, col));
                    col += sw;
                }
                row += sh;
            }
        } else {
            let mut row = 0;
            while row + kh <= height {
                let mut col = 0;
                while col + kw <= width {
                    origins.push((row, col));
                    col += sw;
                }
                row += sh;
            }
        }

        let mut allowed: BTreeSet<usize> = BTreeSet::new();
        for &(origin_row, origin_col) in &origins {
            let row_start = origin_row.max(0);
            let col_start = origin_col.max(0);
            let row_end = (origin_row + kh).min(height);
            let col_end = (origin_col + kw).min(width);
            for row in row_start..row_end {
                for col in col_start..col_end {
                    allowed.insert((row * width + col) as usize);
                }
            }
        }

        let sink_map = if matches!(self.layers[dest].kind(), LayerKind::Output2D { .. }) {
            let dest_width = self.layers[dest].width() as i64;
            let dest_count = self.layers[dest].neuron_count();
            let mut map: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
            for &(origin_row, origin_col) in &origins {
                let row_start = origin_row.max(0);
                let col_start = origin_col.max(0);
                let row_end = (origin_row + kh).min(height);
                let col_end = (origin_col + kw).min(width);
                if row_start >= row_end || col_start >= col_end {
                    continue;
                }
                let center_row = (origin_row + kh / 2).clamp(0, height - 1);
                let center_col = (origin_col + kw / 2).clamp(0, width - 1);
                let center_index = (center_row * dest_width + center_col) as usize;
                if center_index >= dest_count {
                    continue;
                }
                for row in row_start..row_end {
                    for col in col_start..col_end {
                        map.entry((row * width + col) as usize)
                            .or_default()
                            .insert(center_index);
                    }
                }
            }
            Some(map)
        } else {
            None
        };

        let unique_sources = allowed.len();
        let tract = Tract::new(
            source,
            dest,
            feedback,
            Some(allowed),
            sink_map,
            Some((height as usize, width as usize)),
        );
        self.install_tract(tract);
        Ok(unique_sources)
    }

    /// Register a tract and subscribe it to its source neurons.
    fn install_tract(&mut self, tract: Tract) -> TractId {
        let id = self.tracts.len();
        let source = tract.source;
        let subscribers: Vec<usize> = match &tract.allowed {
            Some(set) => set.iter().copied().collect(),
            None => (0..self.layers[source].neuron_count()).collect(),
        };
        for index in subscribers {
            if index < self.layers[source].neuron_count() {
                self.layers[source].neurons_mut()[index].register_fire_hook(id);
            }
        }
        self.tracts.push(tract);
        id
    }

    /// Subscribe a newly grown source neuron to a tract.
    pub fn attach_source_neuron(&mut self, tract: TractId, new_index: usize) -> Result<()> {
        if tract >= self.tracts.len() {
            return Err(GrowNetError::bad_index("tract", tract, self.tracts.len()));
        }
        let source = self.tracts[tract].source;
        self.check_layer(source)?;
        if new_index >= self.layers[source].neuron_count() {
            return Err(GrowNetError::bad_index(
                "neuron",
                new_index,
                self.layers[source].neuron_count(),
            ));
        }
        if let Some(set) = &mut self.tracts[tract].allowed {
            set.insert(new_index);
        }
        self.layers[source].neurons_mut()[new_index].register_fire_hook(tract);
        Ok(())
    }

    pub(crate) fn record_mesh_rule(&mut self, src: usize, dst: usize, prob: f64, feedback: bool) {
        self.mesh_rules.push(MeshRule {
            src,
            dst,
            prob,
            feedback,
        });
    }

    // ---- port binding ----

    /// Bind a scalar input port to target layers.
    ///
    /// When a target is itself a 2D sensor layer it becomes the port edge
    /// and is wired to the remaining targets; otherwise a minimal scalar
    /// edge layer is created once per port and wired to every target.
    pub fn bind_input(&mut self, port: impl Into<String>, targets: &[usize]) -> Result<()> {
        let port = port.into();
        for &target in targets {
            self.check_layer(target)?;
        }
        let adopted = targets
            .iter()
            .copied()
            .find(|&index| matches!(self.layers[index].kind(), LayerKind::Input2D { .. }));
        let edge = match adopted {
            Some(edge) => edge,
            None => match self.input_edges.get(&port) {
                Some(&existing) => existing,
                None => self.add_input_layer_nd(&[1], 1.0, 0.01)?,
            },
        };
        for &target in targets {
            if target != edge {
                self.connect_layers(edge, target, 1.0, false)?;
            }
        }
        self.input_edges.insert(port.clone(), edge);
        self.input_ports.insert(port, targets.to_vec());
        Ok(())
    }

    /// Bind a 2D input port, lazily creating or reusing a shape-matching
    /// sensor edge, and wire it to the targets.
    pub fn bind_input_2d(
        &mut self,
        port: impl Into<String>,
        height: usize,
        width: usize,
        gain: f64,
        epsilon_fire: f64,
        targets: &[usize],
    ) -> Result<()> {
        let port = port.into();
        for &target in targets {
            self.check_layer(target)?;
        }
        let reusable = self.input_edges.get(&port).copied().filter(|&edge| {
            matches!(
                self.layers[edge].kind(),
                LayerKind::Input2D { height: h, width: w, .. } if *h == height && *w == width
            )
        });
        let edge = match reusable {
            Some(edge) => edge,
            None => self.add_input_layer_2d(height, width, gain, epsilon_fire)?,
        };
        for &target in targets {
            if target != edge {
                self.connect_layers(edge, target, 1.0, false)?;
            }
        }
        self.input_edges.insert(port.clone(), edge);
        self.input_ports.insert(port, targets.to_vec());
        Ok(())
    }

    /// Bind an ND input port, lazily creating or reusing a shape-matching
    /// sensor edge, and wire it to the targets.
    pub fn bind_input_nd(
        &mut self,
        port: impl Into<String>,
        shape: &[usize],
        gain: f64,
        epsilon_fire: f64,
        targets: &[usize],
    ) -> Result<()> {
        let port = port.into();
        for &target in targets {
            self.check_layer(target)?;
        }
        let reusable = self
            .input_edges
            .get(&port)
            .copied()
            .filter(|&edge| self.layers[edge].has_shape(shape));
        let edge = match reusable {
            Some(edge) => edge,
            None => self.add_input_layer_nd(shape, gain, epsilon_fire)?,
        };
        for &target in targets {
            if target != edge {
                self.connect_layers(edge, target, 1.0, false)?;
            }
        }
        self.input_edges.insert(port.clone(), edge);
        self.input_ports.insert(port, targets.to_vec());
        Ok(())
    }

    /// Bind an output port: a single-neuron sink edge is created and every
    /// bound layer is wired into it with probability 1.
    pub fn bind_output(&mut self, port: impl Into<String>, sources: &[usize]) -> Result<()> {
        let port = port.into();
        for &source in sources {
            self.check_layer(source)?;
        }
        let edge = match self.output_edges.get(&port) {
            Some(&existing) => existing,
            None => self.add_output_layer_2d(1, 1, 0.2)?,
        };
        for &source in sources {
            if source != edge {
                self.connect_layers(source, edge, 1.0, false)?;
            }
        }
        self.output_edges.insert(port.clone(), edge);
        self.output_ports.insert(port, sources.to_vec());
        Ok(())
    }

    // ---- pulses ----

    /// Set the inhibition factor on the region bus and every layer bus for
    /// this tick.
    pub fn pulse_inhibition(&mut self, factor: f64) {
        self.bus.set_inhibition(factor);
        for layer in &mut self.layers {
            layer.bus_mut().set_inhibition(factor);
        }
    }

    /// Set the modulation factor on the region bus and every layer bus for
    /// this tick.
    pub fn pulse_modulation(&mut self, factor: f64) {
        self.bus.set_modulation(factor);
        for layer in &mut self.layers {
            layer.bus_mut().set_modulation(factor);
        }
    }

    // ---- ticks ----

    /// Drive a scalar port for one tick.
    pub fn tick(&mut self, port: &str, value: f64) -> Result<RegionMetrics> {
        let edge = *self
            .input_edges
            .get(port)
            .ok_or_else(|| GrowNetError::missing_port(port))?;
        let mut metrics = RegionMetrics::new();
        let mut queue: VecDeque<FireEvent> = VecDeque::new();

        let fired = self.layers[edge].forward(value);
        Self::enqueue(&mut queue, edge, fired);
        // Scalar convenience: bound target layers are driven directly too.
        let bound = self.input_ports.get(port).cloned().unwrap_or_default();
        for index in bound.iter().copied().filter(|&index| index != edge) {
            let fired = self.layers[index].forward(value);
            Self::enqueue(&mut queue, index, fired);
        }
        self.drain_events(&mut queue);
        self.service_neuron_growth();
        metrics.inc_delivered_events(self.delivered_events_for(port));

        self.apply_proximity()?;
        self.finish_tick(&mut metrics);
        growth::maybe_grow(self);
        self.layer_grown_this_tick = false;
        Ok(metrics)
    }

    /// Drive a 2D port with a row-major frame for one tick.
    pub fn tick_2d(&mut self, port: &str, frame: &[Vec<f64>]) -> Result<RegionMetrics> {
        let edge = *self
            .input_edges
            .get(port)
            .ok_or_else(|| GrowNetError::missing_port(port))?;
        if !matches!(self.layers[edge].kind(), LayerKind::Input2D { .. }) {
            return Err(GrowNetError::bad_shape(
                "tick_2d requires the port to be bound to a 2D input edge",
            ));
        }
        let mut metrics = RegionMetrics::new();
        let mut queue: VecDeque<FireEvent> = VecDeque::new();

        let fired = self.layers[edge].forward_image(frame)?;
        Self::enqueue(&mut queue, edge, fired);
        self.drain_events(&mut queue);
        self.service_neuron_growth();
        metrics.inc_delivered_events(self.delivered_events_for(port));

        self.apply_proximity()?;
        self.finish_tick(&mut metrics);
        if spatial_metrics_enabled() {
            self.compute_spatial_metrics(frame, &mut metrics);
        }
        growth::maybe_grow(self);
        self.layer_grown_this_tick = false;
        Ok(metrics)
    }

    /// Drive an ND port with a flat tensor for one tick.
    pub fn tick_nd(&mut self, port: &str, flat: &[f64], shape: &[usize]) -> Result<RegionMetrics> {
        let edge = *self
            .input_edges
            .get(port)
            .ok_or_else(|| GrowNetError::missing_port(port))?;
        let mut metrics = RegionMetrics::new();
        let mut queue: VecDeque<FireEvent> = VecDeque::new();

        let fired = self.layers[edge].forward_nd(flat, shape)?;
        Self::enqueue(&mut queue, edge, fired);
        self.drain_events(&mut queue);
        self.service_neuron_growth();
        metrics.inc_delivered_events(self.delivered_events_for(port));

        self.apply_proximity()?;
        self.finish_tick(&mut metrics);
        growth::maybe_grow(self);
        self.layer_grown_this_tick = false;
        Ok(metrics)
    }

    fn enqueue(queue: &mut VecDeque<FireEvent>, layer: usize, fired: Vec<(usize, f64)>) {
        for (neuron, value) in fired {
            queue.push_back((layer, neuron, value));
        }
    }

    /// Drain the fire-event queue: synapse fan-out for propagating kinds,
    /// then tract hooks in subscription order. Deliveries that fire their
    /// targets re-enter the queue, so cascades run to completion within the
    /// tick in a deterministic breadth-first order.
    fn drain_events(&mut self, queue: &mut VecDeque<FireEvent>) {
        while let Some((layer_index, neuron_index, value)) = queue.pop_front() {
            if self.layers[layer_index].neurons()[neuron_index]
                .kind()
                .propagates()
            {
                let targets = self.layers[layer_index].collect_fanout(neuron_index, value);
                for (target_layer, target_neuron) in targets {
                    if target_layer >= self.layers.len() {
                        continue;
                    }
                    if let Some((fired_index, fired_value)) =
                        self.layers[target_layer].deliver(target_neuron, value)
                    {
                        queue.push_back((target_layer, fired_index, fired_value));
                    }
                }
            }
            let hooks: SmallVec<[TractId; 2]> = self.layers[layer_index].neurons()[neuron_index]
                .fire_hooks
                .clone();
            for tract_id in hooks {
                self.deliver_via_tract(tract_id, neuron_index, value, queue);
            }
        }
    }

    /// Route one source fire event through a tract.
    fn deliver_via_tract(
        &mut self,
        tract_id: TractId,
        source_index: usize,
        value: f64,
        queue: &mut VecDeque<FireEvent>,
    ) {
        let (dest, source_shape, sink_targets) = {
            let tract = &self.tracts[tract_id];
            if !tract.allows(source_index) {
                return;
            }
            (
                tract.dest,
                tract.source_shape(),
                tract
                    .sink_targets(source_index)
                    .map(|set| set.iter().copied().collect::<Vec<usize>>()),
            )
        };
        if let Some(targets) = sink_targets {
            // Center-mapped delivery: once per unique target, no fan-out.
            for target in targets {
                self.layers[dest].deliver_to_sink(target, value);
            }
            return;
        }
        let fired = match source_shape {
            Some((height, width)) if self.layers[dest].is_trainable() => {
                self.layers[dest].propagate_from_2d(source_index, value, height, width)
            }
            _ => self.layers[dest].propagate_from(source_index, value),
        };
        Self::enqueue(queue, dest, fired);
    }

    /// Service neuron growth requests latched during propagation, in
    /// deterministic layer-then-neuron order.
    fn service_neuron_growth(&mut self) {
        let layer_count = self.layers.len();
        for layer_index in 0..layer_count {
            let mut neuron_index = 0;
            while neuron_index < self.layers[layer_index].neuron_count() {
                if self.layers[layer_index].neurons_mut()[neuron_index].take_growth_request() {
                    self.grow_neuron(layer_index, neuron_index);
                }
                neuron_index += 1;
            }
        }
    }

    /// Grow one neuron in a layer from a seed, honoring the layer cap.
    ///
    /// At the cap, growth escalates to a spillover layer when the seed's
    /// config allows it; otherwise the request is dropped.
    pub fn grow_neuron(&mut self, layer_index: usize, seed_index: usize) -> Option<usize> {
        if layer_index >= self.layers.len()
            || seed_index >= self.layers[layer_index].neuron_count()
        {
            return None;
        }
        let limit = self.layers[layer_index].neuron_limit();
        if limit >= 0 && self.layers[layer_index].neuron_count() as i64 >= limit {
            let escalate = {
                let config = self.layers[layer_index].neurons()[seed_index].slot_config();
                config.growth_enabled && config.layer_growth_enabled
            };
            if escalate {
                let _ = self.request_layer_growth(layer_index);
            }
            return None;
        }
        let new_index = self.layers[layer_index].grow_from_seed(seed_index);
        log::debug!("layer {layer_index} grew neuron {new_index}");
        self.autowire_new_neuron(layer_index, new_index);
        Some(new_index)
    }

    /// Add a spillover layer fed by `source_layer`. At most one layer is
    /// grown per tick, whichever path requests it.
    pub fn request_layer_growth(&mut self, source_layer: usize) -> Option<usize> {
        if source_layer >= self.layers.len() {
            return None;
        }
        if self.layer_grown_this_tick {
            return None;
        }
        let now = self.layers.first()?.bus().current_step();
        let policy = self.growth_policy.clone().unwrap_or_default();
        if policy.max_total_layers > 0 && self.layers.len() as i64 >= policy.max_total_layers {
            return None;
        }
        let new_index = self.add_layer(policy.new_layer_excitatory_count.max(1), 0, 0);
        if let Err(err) =
            self.connect_layers(source_layer, new_index, policy.wire_probability, false)
        {
            log::warn!("spillover wiring failed: {err}");
        }
        self.last_layer_growth_step = Some(now);
        self.layer_grown_this_tick = true;
        log::debug!("layer growth: {source_layer} -> spillover {new_index} at step {now}");
        Some(new_index)
    }

    /// Wire a newly grown neuron according to the recorded mesh rules, and
    /// re-subscribe tracts sourced at its layer. Best effort: failures are
    /// logged, never propagated into the tick.
    pub fn autowire_new_neuron(&mut self, layer_index: usize, new_index: usize) {
        let rules = self.mesh_rules.clone();
        for rule in rules.iter().filter(|rule| rule.src == layer_index) {
            if rule.dst >= self.layers.len() {
                continue;
            }
            let dest_count = self.layers[rule.dst].neuron_count();
            for di in 0..dest_count {
                if rule.dst == layer_index && di == new_index {
                    continue;
                }
                if self.accept_probability(rule.prob) {
                    self.layers[layer_index].neurons_mut()[new_index].connect(
                        rule.dst,
                        di,
                        rule.feedback,
                    );
                }
            }
        }
        for rule in rules.iter().filter(|rule| rule.dst == layer_index) {
            if rule.src >= self.layers.len() {
                continue;
            }
            let source_count = self.layers[rule.src].neuron_count();
            for si in 0..source_count {
                if rule.src == layer_index && si == new_index {
                    continue;
                }
                if self.accept_probability(rule.prob) {
                    self.layers[rule.src].neurons_mut()[si].connect(
                        layer_index,
                        new_index,
                        rule.feedback,
                    );
                }
            }
        }
        for tract_id in 0..self.tracts.len() {
            if self.tracts[tract_id].source == layer_index {
                if let Err(err) = self.attach_source_neuron(tract_id, new_index) {
                    log::warn!("tract re-subscription failed: {err}");
                }
            }
        }
    }

    fn accept_probability(&mut self, probability: f64) -> bool {
        if probability >= 1.0 {
            return true;
        }
        match self.rng.as_mut() {
            Some(rng) => rng.gen::<f64>() < probability,
            None => {
                log::warn!("probabilistic autowiring without a region RNG; edge skipped");
                false
            }
        }
    }

    fn apply_proximity(&mut self) -> Result<usize> {
        match self.proximity_config.clone() {
            Some(config) => ProximityEngine::apply(self, &config),
            None => Ok(0),
        }
    }

    /// End-of-tick housekeeping, bus decay, and structural metric totals.
    fn finish_tick(&mut self, metrics: &mut RegionMetrics) {
        for layer in &mut self.layers {
            layer.end_tick();
        }
        self.bus.decay();

        let counts: Vec<usize> = self.layers.iter().map(Layer::neuron_count).collect();
        let tiles = grownet_pal::build_layer_neuron_tiles(&counts, grownet_pal::DEFAULT_TILE_SIZE);
        let layers = &self.layers;
        let (slots, synapses) = grownet_pal::parallel_map(
            &tiles,
            |tile| {
                let mut slots = 0u64;
                let mut synapses = 0u64;
                for neuron in &layers[tile.layer_index].neurons()[tile.start..tile.end] {
                    slots += neuron.slots().len() as u64;
                    synapses += neuron.outgoing().len() as u64;
                }
                (slots, synapses)
            },
            |partials| {
                partials
                    .into_iter()
                    .fold((0u64, 0u64), |acc, part| (acc.0 + part.0, acc.1 + part.1))
            },
            None,
        );
        metrics.add_slots(slots);
        metrics.add_synapses(synapses);
    }

    /// Spatial metrics prefer the furthest-downstream output frame and fall
    /// back to the input frame when every output is silent.
    fn compute_spatial_metrics(&self, input_frame: &[Vec<f64>], metrics: &mut RegionMetrics) {
        let downstream = self
            .layers
            .iter()
            .rev()
            .find_map(|layer| layer.output_frame());
        let stats = match downstream {
            Some(frame) => {
                let output_stats = frame_stats(&frame);
                if output_stats.total == 0.0 {
                    let input_stats = frame_stats(input_frame);
                    if input_stats.total > 0.0 {
                        input_stats
                    } else {
                        output_stats
                    }
                } else {
                    output_stats
                }
            }
            None => frame_stats(input_frame),
        };
        metrics.set_frame_stats(stats);
    }

    fn delivered_events_for(&self, port: &str) -> u64 {
        let compat = std::env::var(COMPAT_DELIVERED_COUNT_ENV)
            .map(|value| value.eq_ignore_ascii_case("bound"))
            .unwrap_or(false);
        if compat {
            self.input_ports
                .get(port)
                .map(|targets| targets.len() as u64)
                .unwrap_or(1)
                .max(1)
        } else {
            1
        }
    }

    // ---- maintenance ----

    /// Invoke every neuron's pruning hook and aggregate the result.
    pub fn prune(&mut self, stale_window: u64, min_strength: f64) -> PruneSummary {
        let mut summary = PruneSummary::default();
        for layer in &mut self.layers {
            let now = layer.bus().current_step();
            for neuron in layer.neurons_mut() {
                summary.pruned_synapses +=
                    neuron.prune_synapses(now, stale_window, min_strength) as u64;
            }
        }
        if summary.pruned_synapses > 0 {
            log::debug!("pruned {} synapses", summary.pruned_synapses);
        }
        // Tract-level pruning is reserved; pruned_edges stays zero.
        summary
    }

    // ---- policies ----

    /// Install the region growth policy.
    pub fn set_growth_policy(&mut self, policy: GrowthPolicy) -> Result<()> {
        policy.validate()?;
        self.growth_policy = Some(policy);
        Ok(())
    }

    /// The installed growth policy, if any.
    pub fn growth_policy(&self) -> Option<&GrowthPolicy> {
        self.growth_policy.as_ref()
    }

    /// Attach the proximity sidecar configuration.
    pub fn set_proximity_config(&mut self, config: ProximityConfig) -> Result<()> {
        config.validate()?;
        self.proximity_config = Some(config);
        Ok(())
    }

    /// The attached proximity configuration, if any.
    pub fn proximity_config(&self) -> Option<&ProximityConfig> {
        self.proximity_config.as_ref()
    }

    // ---- accessors ----

    /// The region name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All layers.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// One layer by index.
    pub fn layer(&self, index: usize) -> Result<&Layer> {
        self.check_layer(index)?;
        Ok(&self.layers[index])
    }

    /// One layer by index, mutably.
    pub fn layer_mut(&mut self, index: usize) -> Result<&mut Layer> {
        self.check_layer(index)?;
        Ok(&mut self.layers[index])
    }

    /// All tracts.
    pub fn tracts(&self) -> &[Tract] {
        &self.tracts
    }

    /// Recorded mesh rules.
    pub fn mesh_rules(&self) -> &[MeshRule] {
        &self.mesh_rules
    }

    /// The region-wide bus.
    pub fn bus(&self) -> &LateralBus {
        &self.bus
    }

    /// Whether a seeded RNG is installed.
    pub fn has_rng(&self) -> bool {
        self.rng.is_some()
    }

    pub(crate) fn rng_mut(&mut self) -> Option<&mut StdRng> {
        self.rng.as_mut()
    }

    /// Step at which the last spillover layer was grown.
    pub fn last_layer_growth_step(&self) -> Option<u64> {
        self.last_layer_growth_step
    }

    /// The input edge layer bound to a port, if any.
    pub fn input_edge(&self, port: &str) -> Option<usize> {
        self.input_edges.get(port).copied()
    }

    /// The target layers bound to an input port, if any.
    pub fn input_bindings(&self, port: &str) -> Option<&[usize]> {
        self.input_ports.get(port).map(Vec::as_slice)
    }

    /// The source layers bound to an output port, if any.
    pub fn output_bindings(&self, port: &str) -> Option<&[usize]> {
        self.output_ports.get(port).map(Vec::as_slice)
    }

    /// The output edge layer bound to a port, if any.
    pub fn output_edge(&self, port: &str) -> Option<usize> {
        self.output_edges.get(port).copied()
    }
}

fn spatial_metrics_enabled() -> bool {
    std::env::var(SPATIAL_METRICS_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_layers_edge_count() {
        let mut region = Region::new("edges");
        let src = region.add_layer(2, 0, 0);
        let dst = region.add_layer(3, 0, 0);
        let edges = region.connect_layers(src, dst, 1.0, false).unwrap();
        assert_eq!(edges, 6);
        assert_eq!(region.mesh_rules().len(), 1);
    }

    #[test]
    fn test_connect_layers_bad_index() {
        let mut region = Region::new("idx");
        let src = region.add_layer(1, 0, 0);
        assert!(matches!(
            region.connect_layers(src, 7, 1.0, false),
            Err(GrowNetError::BadIndex { .. })
        ));
    }

    #[test]
    fn test_probabilistic_wiring_requires_rng() {
        let mut region = Region::new("prob");
        let src = region.add_layer(1, 0, 0);
        let dst = region.add_layer(1, 0, 0);
        assert!(matches!(
            region.connect_layers(src, dst, 0.5, false),
            Err(GrowNetError::BadConfig { .. })
        ));

        let mut seeded = Region::with_seed("prob2", 1234);
        let src = seeded.add_layer(4, 0, 0);
        let dst = seeded.add_layer(4, 0, 0);
        let edges = seeded.connect_layers(src, dst, 0.5, false).unwrap();
        assert!(edges <= 16);
    }

    #[test]
    fn test_windowed_single_window_covers_all_pixels() {
        let mut region = Region::new("win");
        let input = region.add_input_layer_2d(4, 4, 1.0, 0.01).unwrap();
        let output = region.add_output_layer_2d(4, 4, 0.0).unwrap();
        let unique = region
            .connect_layers_windowed(input, output, 4, 4, 1, 1, "valid", false)
            .unwrap();
        assert_eq!(unique, 16);

        // Single valid window: center is (2, 2), every source maps there.
        let tract = &region.tracts()[0];
        for source in 0..16 {
            let targets = tract.sink_targets(source).unwrap();
            assert_eq!(targets.len(), 1);
            assert!(targets.contains(&10));
        }
    }

    #[test]
    fn test_windowed_rejects_non_2d_source() {
        let mut region = Region::new("win_bad");
        let src = region.add_layer(4, 0, 0);
        let dst = region.add_output_layer_2d(2, 2, 0.0).unwrap();
        assert!(matches!(
            region.connect_layers_windowed(src, dst, 2, 2, 1, 1, "valid", false),
            Err(GrowNetError::BadShape { .. })
        ));
    }

    #[test]
    fn test_windowed_rejects_bad_padding() {
        let mut region = Region::new("win_pad");
        let src = region.add_input_layer_2d(2, 2, 1.0, 0.01).unwrap();
        let dst = region.add_output_layer_2d(2, 2, 0.0).unwrap();
        assert!(matches!(
            region.connect_layers_windowed(src, dst, 2, 2, 1, 1, "full", false),
            Err(GrowNetError::BadConfig { .. })
        ));
    }

    #[test]
    fn test_windowed_wiring_is_idempotent() {
        let mut region = Region::new("win_idem");
        let input = region.add_input_layer_2d(4, 4, 1.0, 0.01).unwrap();
        let hidden = region.add_layer(4, 0, 0);
        let first = region
            .connect_layers_windowed(input, hidden, 2, 2, 2, 2, "valid", false)
            .unwrap();
        let second = region
            .connect_layers_windowed(input, hidden, 2, 2, 2, 2, "valid", false)
            .unwrap();
        assert_eq!(first, second);
        let a = &region.tracts()[0];
        let b = &region.tracts()[1];
        assert_eq!(a.allowed, b.allowed);
        assert_eq!(a.sink_map, b.sink_map);
    }

    #[test]
    fn test_missing_port_error() {
        let mut region = Region::new("noport");
        assert!(matches!(
            region.tick("ghost", 1.0),
            Err(GrowNetError::MissingPort { .. })
        ));
    }

    #[test]
    fn test_tick_2d_requires_2d_edge() {
        let mut region = Region::new("bad2d");
        let layer = region.add_layer(1, 0, 0);
        region.bind_input("x", &[layer]).unwrap();
        let frame = vec![vec![0.0; 2]; 2];
        assert!(matches!(
            region.tick_2d("x", &frame),
            Err(GrowNetError::BadShape { .. })
        ));
    }

    #[test]
    fn test_scalar_tick_metrics() {
        let mut region = Region::new("t");
        let layer = region.add_layer(1, 0, 0);
        region.bind_input("x", &[layer]).unwrap();
        let metrics = region.tick("x", 0.42).unwrap();
        assert_eq!(metrics.delivered_events, 1);
        assert!(metrics.total_slots >= 1);
        // The scalar edge is wired into the bound layer.
        assert!(metrics.total_synapses >= 1);
    }

    #[test]
    fn test_pulses_touch_every_bus() {
        let mut region = Region::new("pulse");
        region.add_layer(1, 0, 0);
        region.add_layer(1, 0, 0);
        region.pulse_modulation(2.5);
        assert_eq!(region.bus().modulation_factor(), 2.5);
        for layer in region.layers() {
            assert_eq!(layer.bus().modulation_factor(), 2.5);
        }
        region.pulse_inhibition(1.0);
        assert_eq!(region.bus().inhibition_factor(), 1.0);
    }

    #[test]
    fn test_bind_input_adopts_2d_layer_as_edge() {
        let mut region = Region::new("adopt");
        let input = region.add_input_layer_2d(2, 2, 1.0, 0.01).unwrap();
        let hidden = region.add_layer(2, 0, 0);
        region.bind_input("img", &[input, hidden]).unwrap();
        assert_eq!(region.input_edge("img"), Some(input));
        // The adopted edge was wired to the other target.
        assert!(region.layers()[input]
            .neurons()
            .iter()
            .all(|n| n.outgoing().len() == 2));
    }

    #[test]
    fn test_bind_input_nd_shape_reuse() {
        let mut region = Region::new("nd");
        let hidden = region.add_layer(1, 0, 0);
        region
            .bind_input_nd("t", &[2, 2], 1.0, 0.01, &[hidden])
            .unwrap();
        let edge = region.input_edge("t").unwrap();
        // Rebinding with the same shape reuses the edge.
        region
            .bind_input_nd("t", &[2, 2], 1.0, 0.01, &[hidden])
            .unwrap();
        assert_eq!(region.input_edge("t"), Some(edge));
        // A different shape makes a new edge.
        region
            .bind_input_nd("t", &[4], 1.0, 0.01, &[hidden])
            .unwrap();
        assert_ne!(region.input_edge("t"), Some(edge));
    }

    #[test]
    fn test_tick_nd_shape_mismatch() {
        let mut region = Region::new("ndtick");
        let hidden = region.add_layer(1, 0, 0);
        region
            .bind_input_nd("t", &[2, 3], 1.0, 0.01, &[hidden])
            .unwrap();
        assert!(region.tick_nd("t", &[0.1; 6], &[2, 3]).is_ok());
        assert!(matches!(
            region.tick_nd("t", &[0.1; 6], &[3, 2]),
            Err(GrowNetError::BadShape { .. })
        ));
        assert!(matches!(
            region.tick_nd("t", &[0.1; 5], &[2, 3]),
            Err(GrowNetError::BadShape { .. })
        ));
    }

    #[test]
    fn test_prune_reports_zero_edge_prunes() {
        let mut region = Region::new("prune");
        let a = region.add_layer(2, 0, 0);
        let b = region.add_layer(2, 0, 0);
        region.connect_layers(a, b, 1.0, false).unwrap();
        let summary = region.prune(10_000, 0.05);
        assert_eq!(summary.pruned_edges, 0);
    }
}
