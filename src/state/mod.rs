//! Contract state inspection
//!
//! Handles:
//! - Raw key/value snapshots of contract storage
//! - Borsh-typed decoding of stored values
//! - Re-encoding values for sandbox state patches

mod contract;

pub use contract::ContractState;
