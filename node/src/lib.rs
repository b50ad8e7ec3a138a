//! The service-node subsystem assembled into one value.
//!
//! [`Subsystem`] bundles the registry, payment election, staged sync, and
//! the local node's activation machine, dispatches incoming wire messages,
//! and drives the periodic tick. The daemon owns exactly one; tests build
//! their own.

pub mod commands;
pub mod config;
pub mod local;
pub mod logging;
pub mod subsystem;
pub mod wallet;

mod error;

pub use config::{NodeConfig, ServiceNodeAlias};
pub use error::NodeError;
pub use local::{LocalNode, NodeKind};
pub use subsystem::Subsystem;
pub use wallet::{CollateralOutput, NullWallet, Wallet};
