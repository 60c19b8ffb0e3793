//! Staged BLS12-381 signature verification: signal layouts, native stage contracts,
//! chain extraction and verification, and the orchestrator that drives circom/snarkjs.

pub mod chain;
pub mod host;
pub mod layout;
pub mod r1cs;
pub mod stages;
pub mod utils;
pub mod witness;
