//! FreshChain sensor oracle.
//!
//! Polls temperature sensors for a set of monitored assets and, when a
//! reading breaches the policy threshold, writes a new freshness score to
//! the FreshChain NFT contract.

pub mod types;
pub mod oracle;

// Re-export main types for convenience
pub use oracle::{OracleBuilder, OracleConfig, SensorOracle};
pub use types::{AssetId, Decision, OracleEvent, Reading};
