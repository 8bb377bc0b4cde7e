pub mod clock;
pub mod engine;
pub mod scheduler;
