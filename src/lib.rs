//! Transfer detection and recovery analysis for a fund-holding "jar"
//! contract.
//!
//! Tokens can reach the jar two ways: through its own deposit function, or
//! by calling the token contract directly, which bypasses the jar's internal
//! accounting. This crate scans historical transfer logs, watches for new
//! ones in real time (push subscription plus a polling catch-up), classifies
//! each movement, flags anomalies, and plans the on-chain actions that bring
//! the contract's bookkeeping back in line with reality.
//!
//! The binary in `main.rs` wires a monitoring session to a read-only HTTP
//! query API; everything else is usable as a library.

pub mod analysis;
pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod parser;
pub mod recovery;
pub mod scanner;
pub mod session;
pub mod store;
pub mod watcher;

pub use client::JarClient;
pub use config::Config;
pub use error::MonitorError;
