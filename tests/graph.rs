//! Fields driven through stimuli, projections, and probes.

use dynfield::io::{Probe, Stimulus};
use dynfield::{ConnectError, DynamicField, FieldParams, Graph, Projection, Weight};
use ndarray::{ArrayD, IxDyn};

fn quiet_field(sizes: &[usize]) -> DynamicField {
    DynamicField::with_params(
        sizes,
        FieldParams {
            noise_strength: 0.0,
            ..FieldParams::default()
        },
    )
}

#[test]
fn stimulus_drives_a_field_read_by_a_probe() {
    let mut g = Graph::with_seed(1);
    let stim = g.add_external(Stimulus::new("camera", &[10]));
    let field = g.add_field(quiet_field(&[10]).with_label("scene"));
    let probe = g.add_external(Probe::with_capacity("max", &[], 5));

    g.connect(stim, field, vec![Weight::new(8.0).into()]).unwrap();
    g.connect(field, probe, vec![Projection::to_scalar(1).into()]).unwrap();

    let mut input = ArrayD::zeros(IxDyn(&[10]));
    input[[3]] = 1.0;
    g.external_mut::<Stimulus>(stim).unwrap().set(input).unwrap();
    g.run(300);

    let u = g.field(field).unwrap().activation();
    assert!((u[[3]] - 3.0).abs() < 1e-3);
    assert!((u[[0]] + 5.0).abs() < 1e-9);

    let probe = g.external::<Probe>(probe).unwrap();
    assert_eq!(probe.history().count(), 5);
    assert!(probe.latest().unwrap().sum() > 0.99);
}

#[test]
fn plane_is_compressed_onto_a_line() {
    let mut g = Graph::with_seed(1);
    let stim = g.add_external(Stimulus::new("plane", &[5, 4]));
    let line = g.add_field(quiet_field(&[5]));
    g.connect(
        stim,
        line,
        vec![
            Projection::new(2, 1, [0], [0]).unwrap().into(),
            Weight::new(8.0).into(),
        ],
    )
    .unwrap();

    let mut input = ArrayD::zeros(IxDyn(&[5, 4]));
    input[[2, 3]] = 1.0;
    g.external_mut::<Stimulus>(stim).unwrap().set(input).unwrap();
    g.run(300);

    let out = g.output(line).unwrap();
    assert!(out[[2]] > 0.99);
    assert!(out[[0]] < 0.01 && out[[4]] < 0.01);
}

#[test]
fn scalar_is_spread_over_a_line() {
    let mut g = Graph::with_seed(1);
    let node = g.add_external(Stimulus::new("level", &[]));
    let line = g.add_field(quiet_field(&[6]));
    g.connect(
        node,
        line,
        vec![
            Projection::from_scalar(1).unwrap().into(),
            Weight::new(ArrayD::from_shape_vec(IxDyn(&[6]), vec![0.0, 0.0, 8.0, 8.0, 0.0, 0.0]).unwrap())
                .into(),
        ],
    )
    .unwrap();

    g.external_mut::<Stimulus>(node).unwrap().fill(1.0);
    g.run(300);

    let out = g.output(line).unwrap();
    assert!(out[[2]] > 0.99 && out[[3]] > 0.99);
    assert!(out[[0]] < 0.01 && out[[5]] < 0.01);
}

#[test]
fn mismatched_wiring_is_rejected_without_side_effects() {
    let mut g = Graph::new();
    let plane = g.add_field(DynamicField::new(&[5, 4]));
    let line = g.add_field(DynamicField::new(&[5]));
    let before = g.len();

    let err = g.connect(plane, line, vec![]).unwrap_err();
    assert!(matches!(err, ConnectError::DimensionalityMismatch { .. }));
    assert_eq!(g.len(), before);
    assert!(g.connections().is_empty());
    assert!(g.incoming(line).is_empty());
}
