//! Temporal focus: anchor modes and binning policies through the region API

use grownet_core::{AnchorMode, Region, SlotConfig, SlotKey, SlotPolicy};

fn region_with_config(cfg: SlotConfig) -> (Region, usize) {
    let mut region = Region::new("focus");
    region.set_default_slot_config(cfg).unwrap();
    let hidden = region.add_layer(1, 0, 0);
    region.bind_input("x", &[hidden]).unwrap();
    (region, hidden)
}

#[test]
fn nonuniform_edges_bin_by_first_edge_at_or_above_delta() {
    let mut cfg = SlotConfig::default();
    cfg.policy = SlotPolicy::NonUniform;
    cfg.nonuniform_edges = vec![10.0, 25.0, 50.0];
    let (mut region, hidden) = region_with_config(cfg);

    region.tick("x", 2.0).unwrap(); // anchor, bin 0
    region.tick("x", 2.5).unwrap(); // 25% → still bin 1 (edge equality)
    region.tick("x", 3.0).unwrap(); // 50% → bin 2
    region.tick("x", 8.0).unwrap(); // 300% → past the last edge, bin 3

    let slots = region.layer(hidden).unwrap().neurons()[0].slots();
    let keys: Vec<SlotKey> = slots.keys().copied().collect();
    assert_eq!(
        keys,
        vec![
            SlotKey::Scalar(0),
            SlotKey::Scalar(1),
            SlotKey::Scalar(2),
            SlotKey::Scalar(3),
        ]
    );
}

#[test]
fn origin_anchor_measures_from_zero() {
    let mut cfg = SlotConfig::default();
    cfg.anchor_mode = AnchorMode::Origin;
    // With an origin anchor the denominator is the epsilon floor, so use
    // wide bins to keep indices in domain.
    cfg.fixed_delta_percent = 1e9;
    let (mut region, hidden) = region_with_config(cfg);

    region.tick("x", 0.0).unwrap();
    let neuron = &region.layer(hidden).unwrap().neurons()[0];
    // ORIGIN never imprints a first-observation anchor.
    assert_eq!(neuron.slots().len(), 1);
    assert!(neuron.slots().contains_key(&SlotKey::Scalar(0)));
}

#[test]
fn reserved_anchor_modes_behave_like_first() {
    for mode in [AnchorMode::Ema, AnchorMode::Window, AnchorMode::Last] {
        let mut cfg = SlotConfig::default();
        cfg.anchor_mode = mode;
        let (mut region, hidden) = region_with_config(cfg);

        region.tick("x", 1.0).unwrap();
        region.tick("x", 1.5).unwrap(); // 50% from the first observation

        let slots = region.layer(hidden).unwrap().neurons()[0].slots();
        assert!(
            slots.contains_key(&SlotKey::Scalar(5)),
            "mode {mode:?} should bin like FIRST"
        );
    }
}

#[test]
fn adaptive_policy_falls_back_to_fixed() {
    let mut cfg = SlotConfig::default();
    cfg.policy = SlotPolicy::Adaptive;
    let (mut region, hidden) = region_with_config(cfg);

    region.tick("x", 1.0).unwrap();
    region.tick("x", 1.3).unwrap(); // 30% → bin 3 under 10% fixed bins

    let slots = region.layer(hidden).unwrap().neurons()[0].slots();
    assert!(slots.contains_key(&SlotKey::Scalar(3)));
}

#[test]
fn slot_limit_override_beats_config_default() {
    let mut cfg = SlotConfig::default();
    cfg.slot_limit = 4;
    let (mut region, hidden) = region_with_config(cfg);
    region.layer_mut(hidden).unwrap().neurons_mut()[0].set_slot_limit(2);

    for value in [1.0, 1.1, 1.2, 1.3, 1.4, 1.5] {
        region.tick("x", value).unwrap();
    }
    let neuron = &region.layer(hidden).unwrap().neurons()[0];
    assert_eq!(neuron.slots().len(), 2);
    assert!(neuron.last_slot_used_fallback());
}
