use std::sync::Arc;

use approx::assert_relative_eq;
use nalgebra::DVector;

use vfvm_flow::config::PkConfig;
use vfvm_flow::discretization::comm::SerialComm;
use vfvm_flow::discretization::generator::create_column_mesh;
use vfvm_flow::models::energy::{EnergyParams, EnergyPk, DIFFUSIVE_FLUX};
use vfvm_flow::numerics::transient::TransientSolver;
use vfvm_flow::physics::bc::BoundarySelector;
use vfvm_flow::physics::preconditioner::AssemblyMode;
use vfvm_flow::physics::BdfFunctional;
use vfvm_flow::state::composite::{CompositeVector, Entity};

fn setup_column(n: usize, depth: f64, config: PkConfig) -> EnergyPk {
    let mesh = Arc::new(create_column_mesh(n, depth));
    EnergyPk::new(mesh, config, EnergyParams::default(), None, Arc::new(SerialComm)).unwrap()
}

/// Temperature linear in depth, `t_top` at the surface and `t_bottom` at `-depth`.
fn linear_profile(pk: &EnergyPk, depth: f64, t_top: f64, t_bottom: f64) -> CompositeVector {
    let mesh = pk.core().mesh();
    let t = |z: f64| t_top + (t_top - t_bottom) * z / depth;
    let mut u = CompositeVector::cells_and_faces(mesh);
    for (c, cell) in mesh.cells.iter().enumerate() {
        u.component_mut(Entity::Cell)[c] = t(cell.centroid[2]);
    }
    for (f, face) in mesh.faces.iter().enumerate() {
        u.component_mut(Entity::Face)[f] = t(face.centroid[2]);
    }
    u
}

#[test]
fn verify_steady_conduction() {
    println!("Test: linear temperature profile between fixed temperatures");
    let depth = 4.0;
    let mut pk = setup_column(4, depth, PkConfig::default());
    let composer = pk.boundary_conditions_mut();
    composer.dirichlet.add(BoundarySelector::label("surface"), 290.0);
    composer.dirichlet.add(BoundarySelector::label("bottom"), 280.0);

    let u = linear_profile(&pk, depth, 290.0, 280.0);
    pk.initialize(0.0, &u);
    let g = pk.residual(0.0, 3600.0, &u, &u);
    println!("residual {:.3e}", g.norm_inf());
    assert!(g.norm_inf() < 1e-9);

    // conductivity 0.25 * 0.6 + 0.75 * 2.0, gradient 2.5 K/m upward
    let mesh = pk.core().mesh().clone();
    let top = mesh.faces_with_label("surface").next().unwrap();
    let bottom = mesh.faces_with_label("bottom").next().unwrap();
    let flux = pk.core().new.field(DIFFUSIVE_FLUX).component(Entity::Face);
    assert_relative_eq!(flux[top], -1.65 * 2.5, max_relative = 1e-12);
    assert_relative_eq!(flux[bottom], 1.65 * 2.5, max_relative = 1e-12);
}

#[test]
fn verify_accumulation_vanishes_for_long_steps() {
    let depth = 4.0;
    let mut pk = setup_column(4, depth, PkConfig::default());
    let composer = pk.boundary_conditions_mut();
    composer.dirichlet.add(BoundarySelector::label("surface"), 290.0);
    composer.dirichlet.add(BoundarySelector::label("bottom"), 280.0);

    let mut u_old = CompositeVector::cells_and_faces(pk.core().mesh());
    u_old.put_scalar(285.0);
    let u_new = linear_profile(&pk, depth, 290.0, 280.0);
    pk.initialize(0.0, &u_old);

    let short = pk.residual(0.0, 1.0, &u_old, &u_new).norm_inf();
    let long = pk.residual(0.0, 1e12, &u_old, &u_new).norm_inf();
    println!("residual with h = 1: {short:.3e}, with h = 1e12: {long:.3e}");
    assert!(short > 1.0);
    assert!(long < 1e-4);
}

#[test]
fn verify_isothermal_column_is_steady() {
    let mut pk = setup_column(3, 3.0, PkConfig::default());
    let mut u = CompositeVector::cells_and_faces(pk.core().mesh());
    u.put_scalar(285.0);
    pk.initialize(0.0, &u);

    let solver = TransientSolver {
        t_end: 2.0 * 86400.0,
        dt: 86400.0,
        ..Default::default()
    };
    let result = solver.solve(&mut pk, u.clone(), |_, _| {}).unwrap();
    assert_eq!(result.history.len(), 2);
    assert!(result.history.iter().all(|r| r.iterations == 1));
    assert_relative_eq!(result.solution.norm_inf(), 285.0, max_relative = 1e-12);
}

#[test]
fn verify_surface_heating() {
    println!("Test: warm surface heats a cold column");
    let config = PkConfig {
        assemble_preconditioner: true,
        ..Default::default()
    };
    let mut pk = setup_column(5, 1.0, config);
    pk.boundary_conditions_mut()
        .dirichlet
        .add(BoundarySelector::label("surface"), 285.0);
    let mut u = CompositeVector::cells_and_faces(pk.core().mesh());
    u.put_scalar(275.0);
    pk.initialize(0.0, &u);
    let e0: f64 = pk.energy().sum();

    let solver = TransientSolver {
        t_end: 3.0 * 3600.0,
        dt: 3600.0,
        max_iterations: 50,
        ..Default::default()
    };
    let result = solver.solve(&mut pk, u, |_, _| {}).unwrap();
    let cells = result.solution.component(Entity::Cell);
    println!("cell temperatures {cells:?}");

    assert!(pk.energy().sum() > e0);
    // temperatures stay between the initial and the surface value and
    // decrease with depth; cell 0 is the deepest
    for c in 0..cells.len() {
        assert!(cells[c] > 275.0 && cells[c] < 285.0);
    }
    for c in 1..cells.len() {
        assert!(cells[c] > cells[c - 1]);
    }
}

#[test]
fn verify_out_of_range_temperature_is_inadmissible() {
    let mut pk = setup_column(2, 2.0, PkConfig::default());
    let mut u = CompositeVector::cells_and_faces(pk.core().mesh());
    u.put_scalar(280.0);
    pk.initialize(0.0, &u);
    assert!(pk.is_admissible(&u).admissible);

    u.component_mut(Entity::Cell)[1] = 350.0;
    let report = pk.is_admissible(&u);
    assert!(!report.admissible);
    assert_eq!(report.max_location, (Entity::Cell, 1));
}

#[test]
fn verify_coupled_energy_assembles_globally() {
    let config = PkConfig {
        coupled_to_surface_via_head: true,
        ..Default::default()
    };
    let mut pk = setup_column(3, 3.0, config);
    assert_eq!(pk.core().preconditioner().mode(), AssemblyMode::Global);

    let mut u = CompositeVector::cells_and_faces(pk.core().mesh());
    u.put_scalar(280.0);
    pk.initialize(0.0, &u);
    // the middle cell is dry and loses its accumulation term
    let mut ponded = DVector::from_element(3, 101325.0);
    ponded[1] = 101325.0 - 500.0;
    pk.set_surface_pressure(&ponded);
    let top = pk.core().coupled_faces()[0];
    pk.core_mut().push_coupling_values(&[(top, 280.0)]);

    let r = pk.residual(0.0, 60.0, &u, &u);
    assert!(r.norm_inf() < 1e-9);
    pk.update_preconditioner(60.0, &u, 60.0);
    let du = pk.apply_preconditioner(&r).unwrap();
    assert!(du.norm_inf() < 1e-6);
}
