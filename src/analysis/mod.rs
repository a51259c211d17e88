pub mod anomaly;
pub mod dora;
pub mod rules;
pub mod stats;
