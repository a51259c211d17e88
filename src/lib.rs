pub mod alerts;
pub mod analysis;
pub mod error;
pub mod insights;
pub mod models;
