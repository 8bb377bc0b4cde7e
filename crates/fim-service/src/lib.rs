//! Single-file integrity monitor with automatic restore.

pub mod alerts;
pub mod enforcement;
pub mod integrity;
pub mod monitor;
