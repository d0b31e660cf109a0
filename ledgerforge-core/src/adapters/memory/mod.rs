//! In-memory CA and ledger network
//!
//! Drives the whole bootstrap without a live network. Behavior is
//! deterministic; faults are scripted per call site (unreachable CA, rejected
//! peer join, unverified endorsement, unreachable orderers, delays).

mod ca;
pub mod fixtures;
mod network;

pub use ca::{MemoryCa, MemoryCaConnector};
pub use network::{MemoryNetwork, NetworkCall, NetworkOperation};
