//! GrowNet: an event-driven, slot-structured spiking compute engine
//!
//! Neurons partition their input domain into slots — bins that each carry
//! an independent weight and adaptive threshold. Layers share a lateral
//! bus of one-tick inhibition/modulation signals, tracts route fire events
//! between layers, and a region orchestrates the whole per-tick pipeline.
//! Structural growth (slots, neurons, spillover layers, proximity edges)
//! happens during execution, driven by measured pressure and gated by
//! cooldowns, with everything deterministic end-to-end.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod error;
pub mod growth;
pub mod layer;
pub mod math;
pub mod metrics;
pub mod neuron;
pub mod presets;
pub mod proximity;
pub mod region;
pub mod slot_config;
pub mod slot_engine;
pub mod tract;
pub mod weight;

pub use bus::{LateralBus, DEFAULT_INHIBITION_DECAY};
pub use error::{GrowNetError, Result};
pub use growth::GrowthPolicy;
pub use layer::{Layer, LayerKind};
pub use metrics::{PruneSummary, RegionMetrics, EMPTY_BBOX};
pub use neuron::{Neuron, NeuronKind, Synapse, ValueMode};
pub use presets::{connect_layers_topographic, TopographicConfig, TopographicWiring};
pub use proximity::{DeterministicLayout, ProximityConfig, ProximityEngine, ProximityFunction};
pub use region::{MeshRule, Region, COMPAT_DELIVERED_COUNT_ENV, SPATIAL_METRICS_ENV};
pub use slot_config::{AnchorMode, SlotConfig, SlotPolicy};
pub use slot_engine::{SlotEngine, SlotKey};
pub use tract::{Tract, TractId};
pub use weight::Weight;
