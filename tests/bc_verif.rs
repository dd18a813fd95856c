use std::sync::Arc;

use approx::assert_relative_eq;
use nalgebra::{DVector, Matrix3};

use vfvm_flow::config::PkConfig;
use vfvm_flow::discretization::comm::SerialComm;
use vfvm_flow::discretization::generator::{create_column_mesh, create_line_mesh};
use vfvm_flow::error::ConfigError;
use vfvm_flow::models::richards::{hydrostatic_pressure, RichardsParams, RichardsPk};
use vfvm_flow::operators::diffusion::DiffusionOperator;
use vfvm_flow::operators::NumericalTolerances;
use vfvm_flow::physics::bc::{BoundarySelector, Normal, Point};
use vfvm_flow::physics::composer::{BcKind, BoundaryConditionComposer, BoundaryData, CouplingMode};
use vfvm_flow::physics::BdfFunctional;
use vfvm_flow::state::composite::{CompositeVector, Entity};

const RHO: f64 = 1000.0;
const G: f64 = 9.80665;
const P_ATM: f64 = 101325.0;

fn face_with_label(mesh: &vfvm_flow::discretization::mesh::Mesh, label: &str) -> usize {
    mesh.faces_with_label(label).next().unwrap()
}

#[test]
fn verify_dirichlet_single_cell() {
    println!("Test: single cell between Dirichlet faces 100 and 0");
    let mesh = Arc::new(create_line_mesh(1, 1.0));
    let k = 3.0;
    let mut op = DiffusionOperator::new(
        mesh.clone(),
        &[Matrix3::identity() * k],
        [0.0; 3],
        NumericalTolerances::default(),
    );
    op.symbolic_assemble();

    let mut composer = BoundaryConditionComposer::new(CouplingMode::None);
    composer.dirichlet.add(BoundarySelector::label("xmin"), 100.0);
    composer.dirichlet.add(BoundarySelector::label("xmax"), 0.0);
    let bc = composer.compose(0.0, &mesh, &BoundaryData::default());

    op.init();
    op.setup(&DVector::from_element(mesh.num_faces(), 1.0), None);
    op.apply_bcs(&bc);

    let (left, right) = (face_with_label(&mesh, "xmin"), face_with_label(&mesh, "xmax"));
    let mut u = CompositeVector::cells_and_faces(&mesh);
    u.put_scalar(50.0);
    u.component_mut(Entity::Face)[left] = 100.0;
    u.component_mut(Entity::Face)[right] = 0.0;

    let r = op.residual(&u);
    println!("residual {:.3e}", r.norm_inf());
    assert!(r.norm_inf() < 1e-12);

    // K (100 - 0) / distance, out of the cell through xmax and into it through xmin
    let flux = op.fluxes(&u);
    assert_relative_eq!(flux[right], k * 100.0, max_relative = 1e-12);
    assert_relative_eq!(flux[left], -k * 100.0, max_relative = 1e-12);
}

#[test]
fn verify_neumann_row_shift() {
    println!("Test: prescribed outflow shifts the boundary face row");
    let mesh = Arc::new(create_line_mesh(2, 2.0));
    let mut op = DiffusionOperator::new(
        mesh.clone(),
        &[Matrix3::identity(); 2],
        [0.0; 3],
        NumericalTolerances::default(),
    );
    op.symbolic_assemble();

    let q = 0.25;
    let mut composer = BoundaryConditionComposer::new(CouplingMode::None);
    composer.flux.add(BoundarySelector::label("xmax"), q);
    let bc = composer.compose(0.0, &mesh, &BoundaryData::default());
    op.init();
    op.setup(&DVector::from_element(mesh.num_faces(), 1.0), None);
    op.apply_bcs(&bc);

    let u = {
        let mut u = CompositeVector::cells_and_faces(&mesh);
        u.put_scalar(1.0);
        u
    };
    let r = op.residual(&u);
    let right = face_with_label(&mesh, "xmax");
    assert_relative_eq!(r.component(Entity::Face)[right], q * mesh.faces[right].area);
    assert!(r.component(Entity::Cell).amax() < 1e-14);
}

fn column_pk(config: PkConfig) -> Result<RichardsPk, ConfigError> {
    let mesh = Arc::new(create_column_mesh(3, 3.0));
    RichardsPk::new(
        mesh,
        config,
        RichardsParams::default(),
        &[Matrix3::identity() * 1e-12; 3],
        None,
        Arc::new(SerialComm),
    )
}

#[test]
fn verify_seepage_face() {
    println!("Test: seepage face switches with the surface pressure");
    for (excess, expected) in [(5.0, BcKind::Dirichlet), (-5.0, BcKind::Neumann)] {
        let mut pk = column_pk(PkConfig::default()).unwrap();
        pk.boundary_conditions_mut()
            .seepage
            .add(BoundarySelector::label("surface"), P_ATM);
        // water table above or below the surface by `excess` Pa of head
        let u = hydrostatic_pressure(pk.core().mesh(), excess / (RHO * G), RHO, G, P_ATM);
        pk.initialize(0.0, &u);
        pk.residual(0.0, 1.0, &u, &u);

        let top = face_with_label(pk.core().mesh(), "surface");
        let (kind, value) = pk.core().bc().get(top);
        println!("excess {excess:+} Pa -> {kind:?} {value}");
        assert_eq!(kind, expected);
        let expected_value = if expected == BcKind::Dirichlet { P_ATM } else { 0.0 };
        assert_eq!(value, expected_value);
    }
}

#[test]
fn verify_prescribed_value_beats_default() {
    let mut pk = column_pk(PkConfig::default()).unwrap();
    pk.boundary_conditions_mut()
        .dirichlet
        .add(BoundarySelector::label("bottom"), 120000.0);
    pk.boundary_conditions_mut()
        .dirichlet
        .add(BoundarySelector::label("surface"), |t: f64, _: Point, _: Normal| P_ATM + t);
    let u = hydrostatic_pressure(pk.core().mesh(), -1.0, RHO, G, P_ATM);
    pk.initialize(0.0, &u);
    pk.residual(0.0, 7.0, &u, &u);

    let mesh = pk.core().mesh().clone();
    let bc = pk.core().bc();
    assert_eq!(bc.get(face_with_label(&mesh, "bottom")), (BcKind::Dirichlet, 120000.0));
    // time-dependent data is evaluated at the new time
    assert_eq!(bc.get(face_with_label(&mesh, "surface")), (BcKind::Dirichlet, P_ATM + 7.0));
    // side faces keep zero flux
    assert_eq!(bc.count(BcKind::Dirichlet), 2);
    assert_eq!(bc.count(BcKind::Neumann), mesh.num_boundary_faces() - 2);
}

#[test]
fn verify_conflicting_coupling_is_rejected() {
    let config = PkConfig::from_json_str(
        r#"{ "coupled_to_surface_via_head": true, "coupled_to_surface_via_flux": true }"#,
    );
    assert!(matches!(config, Err(ConfigError::ConflictingCoupling { .. })));

    let config = PkConfig {
        coupled_to_surface_via_head: true,
        coupled_to_surface_via_flux: true,
        ..Default::default()
    };
    assert!(matches!(
        column_pk(config),
        Err(ConfigError::ConflictingCoupling { .. })
    ));
}

#[test]
fn verify_unknown_surface_label() {
    let config = PkConfig {
        coupled_to_surface_via_flux: true,
        surface_label: "no such label".into(),
        ..Default::default()
    };
    let err = column_pk(config).err().unwrap();
    assert!(err.to_string().contains("surface_label"));
}
