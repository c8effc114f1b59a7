//! Credential Issuance - payment-gated credential minting with multi-ledger anchoring
//!
//! # Modules
//!
//! - [`issuance`] - Issuance FSM, anchoring fan-out, reconciliation sweeper
//! - [`config`] - YAML application config with environment overrides
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod issuance;
pub mod logging;

// Convenient re-exports at crate root
pub use config::{AppConfig, ConfigError};
pub use issuance::{
    AnchoringCoordinator, IssuanceCoordinator, IssuanceError, ReconciliationSweeper,
    TransactionStatus, TransactionStore,
};
