pub mod descriptor;
pub mod parser;
pub mod sensitivity;
pub mod statistics;
