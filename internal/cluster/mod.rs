pub mod spec;
pub mod topology;
