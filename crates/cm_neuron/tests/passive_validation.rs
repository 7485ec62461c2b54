mod common;

use approx::assert_relative_eq;
use cm_core::CompartmentId;
use cm_receptors::{ReceptorKind, ReceptorParams, RiseDecay};
use common::{
    dense_solve, negate, run_quiet, ONE_DEND_ONE_COMP, TWO_FORKED_DENDS, ALL, UNIFORM_LEAK,
};

#[test]
fn one_step_matches_dense_inversion() {
    let dt = 0.1;
    for topology in &UNIFORM_LEAK {
        let mut neuron = topology.neuron(dt);
        run_quiet(&mut neuron, 2);

        let n = topology.len();
        let currents: Vec<f64> = (0..n).map(|i| 0.1 * (i + 1) as f64).collect();
        neuron.step(&currents).expect("driven step");

        let mut bb = topology.reference_rhs(dt);
        for (b, current) in bb.iter_mut().zip(&currents) {
            *b += current;
        }
        let expected = dense_solve(&topology.reference_matrix(dt), &bb);
        for (got, want) in neuron.voltages().iter().zip(&expected) {
            assert_relative_eq!(*got, *want, max_relative = 1e-9);
        }
    }
}

#[test]
fn assembled_system_reproduces_reference_matrix() {
    let dt = 0.1;
    for topology in &ALL {
        let mut neuron = topology.neuron(dt);
        neuron.step(&[]).expect("first step");
        let system = neuron.last_system();
        let dense = system.to_dense(neuron.tree());
        let reference = topology.reference_matrix(dt);
        for (row, want_row) in dense.iter().zip(&reference) {
            for (got, want) in row.iter().zip(want_row) {
                assert_relative_eq!(*got, *want, max_relative = 1e-12, epsilon = 1e-15);
            }
        }
        for (got, want) in system.rhs.iter().zip(topology.reference_rhs(dt)) {
            assert_relative_eq!(*got, want, max_relative = 1e-12);
        }
    }
}

#[test]
fn first_step_with_non_uniform_leak_matches_reference() {
    let dt = 0.1;
    let topology = TWO_FORKED_DENDS;
    let mut neuron = topology.neuron(dt);
    neuron.step(&vec![0.0; topology.len()]).expect("step");

    let expected = dense_solve(
        &topology.reference_matrix(dt),
        &topology.reference_rhs(dt),
    );
    for (got, want) in neuron.voltages().iter().zip(&expected) {
        assert_relative_eq!(*got, *want, max_relative = 1e-9);
    }
}

#[test]
fn driven_step_away_from_rest_matches_dense_inversion() {
    let dt = 0.1;
    let topology = TWO_FORKED_DENDS;
    let n = topology.len();
    let mut neuron = topology.neuron(dt);
    let warmup: Vec<f64> = (0..n).map(|i| if i % 3 == 0 { 0.4 } else { -0.05 }).collect();
    for _ in 0..15 {
        neuron.step(&warmup).expect("warmup");
    }
    let start = neuron.voltages().to_vec();
    for (v, params) in start.iter().zip(topology.params()) {
        assert!((v - params.e_l).abs() > 1e-3, "compartment still at rest");
    }

    let currents: Vec<f64> = (0..n).map(|i| 0.1 * (i + 1) as f64).collect();
    let bb = topology.reference_rhs_at(dt, &start, &currents);
    let expected = dense_solve(&topology.reference_matrix(dt), &bb);
    neuron.step(&currents).expect("driven step");

    for (got, want) in neuron.last_system().rhs.iter().zip(&bb) {
        assert_relative_eq!(*got, *want, max_relative = 1e-12);
    }
    for (got, want) in neuron.voltages().iter().zip(&expected) {
        assert_relative_eq!(*got, *want, max_relative = 1e-9);
    }
}

#[test]
fn uniform_leak_is_a_fixed_point() {
    for topology in &UNIFORM_LEAK {
        let mut neuron = topology.neuron(0.1);
        run_quiet(&mut neuron, 500);
        for v in neuron.voltages() {
            assert_relative_eq!(*v, -70.0, max_relative = 1e-12);
        }
    }
}

#[test]
fn non_uniform_leak_converges_to_equilibrium() {
    let topology = TWO_FORKED_DENDS;
    let mut neuron = topology.neuron(0.1);
    run_quiet(&mut neuron, 3_000);

    let expected = dense_solve(&negate(&topology.conductance_matrix()), &topology.leak_drive());
    for (got, want) in neuron.voltages().iter().zip(&expected) {
        assert_relative_eq!(*got, *want, max_relative = 1e-6);
    }
}

#[test]
fn attenuation_follows_the_impedance_matrix() {
    let dt = 0.1;
    let i_amp = 1.0;
    for topology in &ALL {
        let n = topology.len();
        let minus_g = negate(&topology.conductance_matrix());
        for site in 0..n {
            let mut unit = vec![0.0; n];
            unit[site] = 1.0;
            let z_row = dense_solve(&minus_g, &unit);

            let mut neuron = topology.neuron(dt);
            run_quiet(&mut neuron, 3_000);
            let baseline = neuron.voltages().to_vec();

            let mut currents = vec![0.0; n];
            currents[site] = i_amp;
            for _ in 0..3_000 {
                neuron.step(&currents).expect("driven step");
            }

            let delta: Vec<f64> = neuron
                .voltages()
                .iter()
                .zip(&baseline)
                .map(|(v, v0)| v - v0)
                .collect();
            for i in 0..n {
                assert_relative_eq!(
                    delta[i] / delta[site],
                    z_row[i] / z_row[site],
                    max_relative = 1e-6
                );
            }
        }
    }
}

#[test]
fn steady_conductance_input_shifts_equilibrium() {
    let dt = 0.01;
    let weight = 0.001;
    let surface = RiseDecay::new(0.2, 3.0, dt).expect("ampa").surface();
    for topology in &ALL {
        let n = topology.len();
        let mut neuron = topology.neuron(dt);
        let receptors: Vec<_> = (0..n)
            .map(|i| {
                neuron
                    .add_receptor(
                        CompartmentId(i as u32),
                        ReceptorKind::Ampa,
                        ReceptorParams::default(),
                    )
                    .expect("ampa")
            })
            .collect();
        let weights: Vec<f64> = (0..n).map(|i| weight * (i + 1) as f64).collect();

        for _ in 0..30_000 {
            let step = neuron.step_count();
            for (receptor, w) in receptors.iter().zip(&weights) {
                neuron
                    .deliver_spike(*receptor, step, w * dt)
                    .expect("spike");
            }
            neuron.step(&[]).expect("step");
        }

        let mut matrix = negate(&topology.conductance_matrix());
        for (i, w) in weights.iter().enumerate() {
            matrix[i][i] += w * surface;
        }
        let expected = dense_solve(&matrix, &topology.leak_drive());
        for (got, want) in neuron.voltages().iter().zip(&expected) {
            assert_relative_eq!(*got, *want, max_relative = 1e-4);
        }
    }
}

#[test]
fn spike_only_affects_steps_starting_at_its_arrival() {
    let topology = ONE_DEND_ONE_COMP;
    let mut control = topology.neuron(0.1);
    let mut driven = topology.neuron(0.1);
    control
        .add_receptor(CompartmentId(1), ReceptorKind::Ampa, ReceptorParams::default())
        .expect("control receptor");
    let receptor = driven
        .add_receptor(CompartmentId(1), ReceptorKind::Ampa, ReceptorParams::default())
        .expect("receptor");
    driven.deliver_spike_at(receptor, 0.5, 1.0).expect("spike");

    for _ in 0..5 {
        control.step(&[]).expect("control");
        driven.step(&[]).expect("driven");
        assert_eq!(control.voltages(), driven.voltages());
    }
    control.step(&[]).expect("control");
    driven.step(&[]).expect("driven");
    assert!(driven.voltages()[1] > control.voltages()[1]);
    assert!(driven.voltages()[0] > control.voltages()[0]);
}

#[test]
fn soma_dendrite_scenario_matches_direct_solve() {
    let dt = 0.1;
    let topology = ONE_DEND_ONE_COMP;
    let mut neuron = topology.neuron(dt);
    run_quiet(&mut neuron, 2);
    let currents = [0.1, 0.2];
    neuron.step(&currents).expect("third step");

    let aa = topology.reference_matrix(dt);
    let bb = topology.reference_rhs(dt);
    let b0 = bb[0] + currents[0];
    let b1 = bb[1] + currents[1];
    let det = aa[0][0] * aa[1][1] - aa[0][1] * aa[1][0];
    let v0 = (b0 * aa[1][1] - aa[0][1] * b1) / det;
    let v1 = (aa[0][0] * b1 - aa[1][0] * b0) / det;

    assert_relative_eq!(neuron.voltages()[0], v0, max_relative = 1e-9);
    assert_relative_eq!(neuron.voltages()[1], v1, max_relative = 1e-9);
    assert_relative_eq!(neuron.time_ms(), 0.3, max_relative = 1e-12);
}
