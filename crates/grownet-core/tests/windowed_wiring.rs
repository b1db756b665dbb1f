//! Windowed wiring semantics: origins, centers, sink maps, spatial slotting

use grownet_core::{Region, SlotConfig, SlotKey};

#[test]
fn full_image_valid_window_returns_all_pixels() {
    let mut region = Region::new("win");
    let input = region.add_input_layer_2d(4, 4, 1.0, 0.01).unwrap();
    let output = region.add_output_layer_2d(4, 4, 0.0).unwrap();
    let unique = region
        .connect_layers_windowed(input, output, 4, 4, 1, 1, "valid", false)
        .unwrap();
    assert_eq!(unique, 16);
}

#[test]
fn same_padding_covers_every_source_once() {
    let mut region = Region::new("same");
    let input = region.add_input_layer_2d(4, 4, 1.0, 0.01).unwrap();
    let output = region.add_output_layer_2d(4, 4, 0.0).unwrap();
    // 3x3 kernel, stride 1, same padding: 25 windows, but the unique
    // source count is still the 16 participating pixels.
    let unique = region
        .connect_layers_windowed(input, output, 3, 3, 1, 1, "same", false)
        .unwrap();
    assert_eq!(unique, 16);
}

#[test]
fn center_rule_clamps_at_the_border() {
    let mut region = Region::new("center");
    let input = region.add_input_layer_2d(4, 4, 1.0, 0.01).unwrap();
    let output = region.add_output_layer_2d(4, 4, 0.0).unwrap();
    region
        .connect_layers_windowed(input, output, 3, 3, 1, 1, "same", false)
        .unwrap();

    let tract = &region.tracts()[0];
    // The (-1, -1) window clips to rows/cols {0, 1} and its center clamps
    // to (0, 0); pixel (0, 0) therefore maps to center 0 among others.
    let targets = tract.sink_targets(0).unwrap();
    assert!(targets.contains(&0));
    // Interior pixel (1, 1) is the center of the window at origin (0, 0).
    let targets = tract.sink_targets(5).unwrap();
    assert!(targets.contains(&5));
}

#[test]
fn sink_delivery_reaches_only_window_centers() {
    let mut region = Region::new("deliver");
    let input = region.add_input_layer_2d(4, 4, 1.0, 0.01).unwrap();
    let output = region.add_output_layer_2d(4, 4, 0.5).unwrap();
    region
        .connect_layers_windowed(input, output, 4, 4, 1, 1, "valid", false)
        .unwrap();
    region.bind_input("img", &[input]).unwrap();

    // A faint pixel: the sensor fires, and the sink's first threshold
    // imprint sits below the reinforcement step, so the center fires too.
    let mut frame = vec![vec![0.0; 4]; 4];
    frame[1][1] = 0.01;
    region.tick_2d("img", &frame).unwrap();

    let frame_out = region.layer(output).unwrap().output_frame().unwrap();
    // Single valid window: everything maps to center (2, 2).
    for (row, cells) in frame_out.iter().enumerate() {
        for (col, &value) in cells.iter().enumerate() {
            if (row, col) == (2, 2) {
                assert!(value > 0.0);
            } else {
                assert_eq!(value, 0.0);
            }
        }
    }
}

#[test]
fn windowed_into_hidden_layer_drives_spatial_slots() {
    let mut region = Region::new("spatial");
    let input = region.add_input_layer_2d(4, 4, 1.0, 0.01).unwrap();
    let hidden = region.add_layer(8, 0, 0);
    for neuron in region.layer_mut(hidden).unwrap().neurons_mut() {
        *neuron.slot_config_mut() = SlotConfig::spatial(50.0, 50.0);
    }
    region
        .connect_layers_windowed(input, hidden, 2, 2, 2, 2, "valid", false)
        .unwrap();
    region.bind_input("img", &[input]).unwrap();

    let mut frame = vec![vec![0.0; 4]; 4];
    frame[1][1] = 1.0;
    region.tick_2d("img", &frame).unwrap();

    let mut frame = vec![vec![0.0; 4]; 4];
    frame[1][2] = 1.0;
    let metrics = region.tick_2d("img", &frame).unwrap();
    assert!(metrics.total_slots >= 1);

    // Spatial anchoring: the first bright pixel set the anchor, the second
    // landed in a different column bin.
    let neuron = &region.layer(hidden).unwrap().neurons()[0];
    assert!(neuron.slots().keys().all(|k| matches!(k, SlotKey::Spatial { .. })));
    assert_eq!(neuron.slots().len(), 2);
}

#[test]
fn rewiring_with_identical_parameters_is_pure() {
    let mut region = Region::new("pure");
    let input = region.add_input_layer_2d(5, 5, 1.0, 0.01).unwrap();
    let output = region.add_output_layer_2d(5, 5, 0.0).unwrap();
    let first = region
        .connect_layers_windowed(input, output, 3, 3, 2, 2, "same", false)
        .unwrap();
    let second = region
        .connect_layers_windowed(input, output, 3, 3, 2, 2, "same", false)
        .unwrap();
    assert_eq!(first, second);

    let a = &region.tracts()[0];
    let b = &region.tracts()[1];
    for source in 0..25 {
        assert_eq!(a.sink_targets(source), b.sink_targets(source));
        assert_eq!(a.allows(source), b.allows(source));
    }
}
