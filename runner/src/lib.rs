// RIDE runner library
// Exposes internal modules for the binary and for integration tests

#[macro_use]
extern crate log;

pub mod config;
pub mod core;
pub mod evaluator;
pub mod node;
pub mod rpc;
