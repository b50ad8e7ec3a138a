//! Operator commands, shared by the CLI and RPC surfaces.

use crate::local::build_announce;
use crate::wallet::Wallet;
use crate::{ServiceNodeAlias, Subsystem};
use onyx_chain::ChainView;
use onyx_crypto::keypair_from_seed;
use onyx_messages::{Inv, InvKind};
use onyx_net::Transport;
use onyx_types::{LifecycleState, NetworkId, Outpoint};
use std::net::SocketAddr;
use thiserror::Error;

/// Why an operator command could not run at all. Each maps to a distinct
/// process exit code.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("service node sync is not complete; try again later")]
    SyncIncomplete,

    #[error("wallet is locked; unlock it first")]
    WalletLocked,

    #[error("no service node alias named '{0}' in the config")]
    NoSuchAlias(String),
}

impl CommandError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SyncIncomplete => 1,
            Self::WalletLocked => 2,
            Self::NoSuchAlias(_) => 3,
        }
    }
}

/// Outcome of starting one alias.
#[derive(Debug)]
pub struct StartResult {
    pub alias: String,
    pub ok: bool,
    pub error: Option<String>,
}

/// `start-alias <alias>`: broadcast a fresh announce for one configured
/// remote node.
pub fn start_alias(
    subsystem: &Subsystem,
    chain: &dyn ChainView,
    transport: &mut dyn Transport,
    wallet: &mut dyn Wallet,
    alias: &str,
    now: i64,
) -> Result<StartResult, CommandError> {
    ensure_ready(subsystem, wallet)?;
    let Some(entry) = subsystem.config.alias(alias) else {
        return Err(CommandError::NoSuchAlias(alias.to_string()));
    };
    Ok(start_one(subsystem, chain, transport, wallet, entry, now))
}

/// `start-all`: broadcast announces for every configured alias.
pub fn start_all(
    subsystem: &Subsystem,
    chain: &dyn ChainView,
    transport: &mut dyn Transport,
    wallet: &mut dyn Wallet,
    now: i64,
) -> Result<Vec<StartResult>, CommandError> {
    ensure_ready(subsystem, wallet)?;
    let aliases = subsystem.config.aliases.clone();
    Ok(aliases
        .iter()
        .map(|entry| start_one(subsystem, chain, transport, wallet, entry, now))
        .collect())
}

/// `start-missing`: like `start-all`, skipping aliases whose node is
/// already running.
pub fn start_missing(
    subsystem: &Subsystem,
    chain: &dyn ChainView,
    transport: &mut dyn Transport,
    wallet: &mut dyn Wallet,
    now: i64,
) -> Result<Vec<StartResult>, CommandError> {
    ensure_ready(subsystem, wallet)?;
    let aliases = subsystem.config.aliases.clone();
    let mut results = Vec::new();
    for entry in &aliases {
        let running = entry
            .collateral
            .parse::<Outpoint>()
            .ok()
            .and_then(|outpoint| subsystem.registry.lock().node_info(&outpoint))
            .map(|info| {
                matches!(
                    info.state,
                    LifecycleState::Enabled | LifecycleState::PreEnabled
                )
            })
            .unwrap_or(false);
        if running {
            tracing::info!(alias = %entry.alias, "already running; skipping");
            continue;
        }
        results.push(start_one(subsystem, chain, transport, wallet, entry, now));
    }
    Ok(results)
}

/// `list`: one line per registered node.
pub fn list(subsystem: &Subsystem) -> Vec<String> {
    subsystem
        .registry
        .lock()
        .enumerate()
        .into_iter()
        .map(|info| {
            format!(
                "{} {} {} {} last_ping={} last_paid={}",
                info.outpoint.to_short_string(),
                info.addr,
                info.protocol_version,
                info.state.as_str(),
                info.last_ping_time,
                info.last_paid_height,
            )
        })
        .collect()
}

/// `count`: number of registered nodes.
pub fn count(subsystem: &Subsystem) -> usize {
    subsystem.registry.lock().size()
}

/// `status`: the local node's activation status line.
pub fn status(subsystem: &Subsystem) -> String {
    format!("{} | {}", subsystem.status(), subsystem.sync.status())
}

fn ensure_ready(subsystem: &Subsystem, wallet: &dyn Wallet) -> Result<(), CommandError> {
    if !subsystem.sync.is_list_synced() {
        return Err(CommandError::SyncIncomplete);
    }
    if wallet.is_locked() {
        return Err(CommandError::WalletLocked);
    }
    Ok(())
}

fn start_one(
    subsystem: &Subsystem,
    chain: &dyn ChainView,
    transport: &mut dyn Transport,
    wallet: &mut dyn Wallet,
    entry: &ServiceNodeAlias,
    now: i64,
) -> StartResult {
    match build_alias_announce(entry, subsystem.config.network, wallet, chain, now) {
        Err(error) => {
            tracing::warn!(alias = %entry.alias, error = %error, "failed to start alias");
            StartResult {
                alias: entry.alias.clone(),
                ok: false,
                error: Some(error),
            }
        }
        Ok(announce) => {
            subsystem
                .registry
                .lock()
                .register_local_announce(&announce, now, &subsystem.sync);
            transport.relay(Inv::new(InvKind::Announce, announce.hash()));
            tracing::info!(alias = %entry.alias, node = %announce.outpoint.to_short_string(), "alias started");
            StartResult {
                alias: entry.alias.clone(),
                ok: true,
                error: None,
            }
        }
    }
}

fn build_alias_announce(
    entry: &ServiceNodeAlias,
    network: NetworkId,
    wallet: &mut dyn Wallet,
    chain: &dyn ChainView,
    now: i64,
) -> Result<onyx_messages::Announce, String> {
    let addr: SocketAddr = entry
        .address
        .parse()
        .map_err(|_| format!("invalid address {}", entry.address))?;
    if !network.valid_node_port(addr.port()) {
        return Err(format!(
            "invalid port {} for the {} network",
            addr.port(),
            network.as_str()
        ));
    }

    let raw = hex::decode(&entry.privkey).map_err(|_| "invalid service key".to_string())?;
    let seed: [u8; 32] = raw
        .try_into()
        .map_err(|_| "service key must be 32 bytes".to_string())?;
    let service = keypair_from_seed(&seed);

    let outpoint: Outpoint = entry
        .collateral
        .parse()
        .map_err(|_| format!("invalid collateral {}", entry.collateral))?;
    let collateral = wallet
        .collateral_output(Some(outpoint))
        .ok_or_else(|| format!("collateral {} not found in wallet", entry.collateral))?;

    wallet.lock_coin(outpoint);

    build_announce(outpoint, addr, &collateral.keypair, &service, chain, now)
        .ok_or_else(|| "chain not ready to build an announce".to_string())
}
