pub mod backend;
pub mod catalog;
pub mod config;
pub mod executor;
pub mod job;
pub mod models;
pub mod modes;
pub mod optimizer;
pub mod progress;
pub mod queue;
pub mod reporter;

#[cfg(test)]
pub(crate) mod testing;
