pub mod check;
pub mod start;
mod target;
