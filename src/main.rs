//! Infiltration into a partially saturated soil column.
//!
//! Usage: `vfvm-flow [config.json]`. Without a configuration file the kernel
//! runs with default settings. Profiles and the step history are written to
//! `output/`.

use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use nalgebra::Matrix3;

use vfvm_flow::config::PkConfig;
use vfvm_flow::discretization::comm::SerialComm;
use vfvm_flow::discretization::generator::create_column_mesh;
use vfvm_flow::models::richards::{hydrostatic_pressure, RichardsParams, RichardsPk};
use vfvm_flow::numerics::transient::TransientSolver;
use vfvm_flow::physics::bc::BoundarySelector;
use vfvm_flow::processing::csv_writer::{write_cell_profile, write_history};
use vfvm_flow::state::composite::Entity;

const N_CELLS: usize = 40;
const DEPTH: f64 = 2.0;
const WATER_TABLE: f64 = -1.5;
/// Rainfall, moles per square meter per second; negative is into the domain.
const INFILTRATION: f64 = -2e-3;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let output = Path::new("output");
    fs::create_dir_all(output)?;

    let config = match std::env::args().nth(1) {
        Some(path) => {
            log::info!("reading configuration from {path}");
            PkConfig::from_file(path)?
        }
        None => PkConfig {
            modify_predictor_for_flux_bcs: true,
            assemble_preconditioner: true,
            ..Default::default()
        },
    };

    let params = RichardsParams::default();
    let density = params.eos.reference_density;
    let gravity = -config.gravity[2];
    let p_atm = config.atmospheric_pressure;

    let mesh = Arc::new(create_column_mesh(N_CELLS, DEPTH));
    let permeability = vec![Matrix3::identity() * 5e-12; N_CELLS];
    let mut pk = RichardsPk::new(
        mesh.clone(),
        config,
        params,
        &permeability,
        None,
        Arc::new(SerialComm),
    )?;

    let composer = pk.boundary_conditions_mut();
    composer
        .flux
        .add(BoundarySelector::label("surface"), INFILTRATION);
    composer.dirichlet.add(
        BoundarySelector::label("bottom"),
        p_atm + density * gravity * (WATER_TABLE + DEPTH),
    );

    let u0 = hydrostatic_pressure(&mesh, WATER_TABLE, density, gravity, p_atm);
    pk.initialize(0.0, &u0);
    write_cell_profile(
        output.join("profile_initial.csv"),
        &mesh,
        &[
            ("pressure", u0.component(Entity::Cell)),
            ("saturation", &pk.saturation()),
        ],
    )?;

    let solver = TransientSolver {
        t_end: 86400.0,
        dt: 600.0,
        min_dt: 1e-2,
        max_iterations: 30,
        ..Default::default()
    };
    let result = solver.solve(&mut pk, u0, |t, u| {
        log::debug!("t = {t:.1} s, max pressure {:.6e}", u.norm_inf());
    })?;

    write_cell_profile(
        output.join("profile_final.csv"),
        &mesh,
        &[
            ("pressure", result.solution.component(Entity::Cell)),
            ("saturation", &pk.saturation()),
            ("water_content", &pk.water_content()),
        ],
    )?;
    write_history(output.join("history.csv"), &result.history)?;

    log::info!(
        "finished {} steps ({} rejected); profiles written to {}",
        result.history.len(),
        result.failures,
        output.display()
    );
    Ok(())
}
