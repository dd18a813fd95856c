pub mod comm;
pub mod generator;
pub mod mesh;
