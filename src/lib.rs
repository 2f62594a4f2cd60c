//! PADDOCK: horse-race betting assistant
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod data;
pub mod llm;
pub mod strategy;
pub mod wizard;
pub mod engine;
pub mod server;
pub mod storage;
