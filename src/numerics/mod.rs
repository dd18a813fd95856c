//! Time integration and run instrumentation.

pub mod timing;
pub mod transient;
