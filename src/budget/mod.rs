pub mod accountant;
pub mod pure_dp_filter;
pub mod traits;
