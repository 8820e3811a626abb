pub mod config;
pub mod retry;
pub mod shutdown;
pub mod usage;
