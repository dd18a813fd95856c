//! Implicit finite-volume process kernels for variably saturated subsurface
//! flow and energy transport.
//!
//! The crate assembles nonlinear residuals and approximate Jacobians on a
//! hybrid cell/face two-point discretization and exposes them through the
//! [`physics::BdfFunctional`] callbacks of an implicit time integrator.

pub mod closure;
pub mod config;
pub mod discretization;
pub mod error;
pub mod models;
pub mod numerics;
pub mod operators;
pub mod physics;
pub mod processing;
pub mod state;
