pub mod bootstrap;
pub mod cluster;
pub mod error;
pub mod meta;
pub mod util;

#[cfg(test)]
pub mod test_support;
