// Canonical in-memory shapes produced by the normalizer and consumed by the dashboard
pub mod account;
pub mod forecast;

pub use account::*;
pub use forecast::*;
