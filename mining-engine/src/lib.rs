//! Bitcoin mining economics calculator and live network data service.

pub mod api;
pub mod assumptions;
pub mod cache;
pub mod calc;
pub mod catalog;
pub mod config;
pub mod error;
pub mod live;
pub mod tracing;
pub mod upstream;

#[cfg(test)]
mod testing;
