//! Structural growth: neuron growth, spillover layers, one-per-tick cap

use grownet_core::{GrowthPolicy, Region, SlotConfig};

fn pressured_region() -> (Region, usize, usize) {
    let mut region = Region::new("growth");
    let input = region.add_input_layer_2d(4, 4, 1.0, 0.01).unwrap();
    let hidden = region.add_layer(6, 0, 0);
    for neuron in region.layer_mut(hidden).unwrap().neurons_mut() {
        *neuron.slot_config_mut() = SlotConfig::spatial(10.0, 10.0);
        neuron.set_slot_limit(1);
    }
    region
        .connect_layers_windowed(input, hidden, 2, 2, 2, 2, "valid", false)
        .unwrap();
    region.bind_input("img", &[input]).unwrap();
    (region, input, hidden)
}

fn frame_with_bright_pixel(row: usize, col: usize) -> Vec<Vec<f64>> {
    let mut frame = vec![vec![0.0; 4]; 4];
    frame[row][col] = 1.0;
    frame
}

#[test]
fn region_adds_spillover_layer_under_pressure() {
    let (mut region, _input, _hidden) = pressured_region();
    region
        .set_growth_policy(GrowthPolicy {
            enable_layer_growth: true,
            max_total_layers: 32,
            avg_slots_threshold: 1.0,
            percent_neurons_at_cap_threshold: 0.0,
            layer_cooldown_ticks: 0,
            new_layer_excitatory_count: 3,
            wire_probability: 1.0,
        })
        .unwrap();
    let base_layers = region.layers().len();

    for (row, col) in [(0, 1), (0, 2), (0, 3)] {
        region.tick_2d("img", &frame_with_bright_pixel(row, col)).unwrap();
    }
    assert!(region.layers().len() > base_layers);

    // The spillover is excitatory-only and wired from its source.
    let grown = region.layers().len() - 1;
    assert_eq!(region.layer(grown).unwrap().neuron_count(), 3);
}

#[test]
fn at_most_one_layer_growth_per_tick() {
    let (mut region, _input, _hidden) = pressured_region();
    region
        .set_growth_policy(GrowthPolicy {
            enable_layer_growth: true,
            max_total_layers: -1,
            avg_slots_threshold: 0.0,
            percent_neurons_at_cap_threshold: 0.0,
            layer_cooldown_ticks: 0,
            new_layer_excitatory_count: 4,
            wire_probability: 1.0,
        })
        .unwrap();

    let mut previous = region.layers().len();
    for step in 0..5 {
        region
            .tick_2d("img", &frame_with_bright_pixel(0, 1 + step % 3))
            .unwrap();
        let current = region.layers().len();
        assert!(current - previous <= 1, "more than one growth in a tick");
        if current > previous {
            let step_now = region.layers()[0].bus().current_step();
            assert_eq!(region.last_layer_growth_step(), Some(step_now));
        }
        previous = current;
    }
}

#[test]
fn growth_cooldown_blocks_consecutive_ticks() {
    let (mut region, _input, _hidden) = pressured_region();
    region
        .set_growth_policy(GrowthPolicy {
            enable_layer_growth: true,
            max_total_layers: -1,
            avg_slots_threshold: 0.0,
            percent_neurons_at_cap_threshold: 0.0,
            layer_cooldown_ticks: 3,
            new_layer_excitatory_count: 2,
            wire_probability: 1.0,
        })
        .unwrap();

    let base = region.layers().len();
    for step in 0..6 {
        region
            .tick_2d("img", &frame_with_bright_pixel(0, 1 + step % 3))
            .unwrap();
    }
    // Six ticks with a cooldown of three allow at most two growths.
    assert!(region.layers().len() <= base + 2);
    assert!(region.layers().len() > base);
}

#[test]
fn max_total_layers_caps_growth() {
    let (mut region, _input, _hidden) = pressured_region();
    let base = region.layers().len() as i64;
    region
        .set_growth_policy(GrowthPolicy {
            enable_layer_growth: true,
            max_total_layers: base + 1,
            avg_slots_threshold: 0.0,
            percent_neurons_at_cap_threshold: 0.0,
            layer_cooldown_ticks: 0,
            new_layer_excitatory_count: 2,
            wire_probability: 1.0,
        })
        .unwrap();

    for step in 0..5 {
        region
            .tick_2d("img", &frame_with_bright_pixel(0, 1 + step % 3))
            .unwrap();
    }
    assert_eq!(region.layers().len() as i64, base + 1);
}

#[test]
fn neuron_growth_adds_a_neuron_and_autowires_it() {
    let mut region = Region::new("neuron_growth");
    let hidden = region.add_layer(1, 0, 0);
    region.layer_mut(hidden).unwrap().neurons_mut()[0].set_slot_limit(1);
    region.bind_input("x", &[hidden]).unwrap();
    let edge = region.input_edge("x").unwrap();

    // Anchor at 0.5, then three far-away inputs fall back each tick.
    for value in [0.5, 1.5, 2.5, 3.5] {
        region.tick("x", value).unwrap();
    }

    let layer = region.layer(hidden).unwrap();
    assert_eq!(layer.neuron_count(), 2, "fallback streak should grow a neuron");
    // The mesh rule edge → hidden was replayed for the newcomer.
    assert!(region.layer(edge).unwrap().neurons()[0].has_edge_to(hidden, 1));
}

#[test]
fn neuron_limit_blocks_growth_without_escalation() {
    let mut region = Region::new("capped");
    let hidden = region.add_layer(1, 0, 0);
    {
        let layer = region.layer_mut(hidden).unwrap();
        layer.set_neuron_limit(1);
        layer.neurons_mut()[0].set_slot_limit(1);
        // layer_growth_enabled stays false: a blocked request is dropped.
    }
    region.bind_input("x", &[hidden]).unwrap();

    let base_layers = region.layers().len();
    for value in [0.5, 1.5, 2.5, 3.5, 4.5, 5.5] {
        region.tick("x", value).unwrap();
    }
    assert_eq!(region.layer(hidden).unwrap().neuron_count(), 1);
    assert_eq!(region.layers().len(), base_layers);
}

#[test]
fn neuron_limit_escalates_to_layer_growth_when_enabled() {
    let mut region = Region::new("escalate");
    let hidden = region.add_layer(1, 0, 0);
    {
        let layer = region.layer_mut(hidden).unwrap();
        layer.set_neuron_limit(1);
        let neuron = &mut layer.neurons_mut()[0];
        neuron.set_slot_limit(1);
        neuron.slot_config_mut().layer_growth_enabled = true;
    }
    region.bind_input("x", &[hidden]).unwrap();

    let base_layers = region.layers().len();
    for value in [0.5, 1.5, 2.5, 3.5] {
        region.tick("x", value).unwrap();
    }
    assert!(region.layers().len() > base_layers);
}

#[test]
fn growth_disabled_config_never_grows() {
    let mut region = Region::new("disabled");
    let hidden = region.add_layer(1, 0, 0);
    {
        let neuron = &mut region.layer_mut(hidden).unwrap().neurons_mut()[0];
        neuron.set_slot_limit(1);
        neuron.slot_config_mut().growth_enabled = false;
    }
    region.bind_input("x", &[hidden]).unwrap();

    for value in [0.5, 1.5, 2.5, 3.5, 4.5] {
        region.tick("x", value).unwrap();
    }
    assert_eq!(region.layer(hidden).unwrap().neuron_count(), 1);
}
