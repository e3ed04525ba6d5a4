pub mod bounds;
pub mod dataset;
