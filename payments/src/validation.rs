//! Block-level payment validation and coinbase filling.

use crate::Payments;
use onyx_chain::{service_node_payment, ChainView, Tx, TxOut};
use onyx_net::SporkFlags;
use onyx_registry::{GossipContext, Registry};
use onyx_sync::SyncState;
use onyx_types::Script;

impl Payments {
    /// Whether `coinbase` at `height` pays the elected service node.
    ///
    /// Returns `true` when no height entry or quorum exists (longest-chain
    /// fallback) and when the exact payment is present.
    pub fn is_transaction_valid(&self, coinbase: &Tx, height: u32) -> bool {
        let blocks = self.blocks.read();
        let Some(payees) = blocks.get(&height) else {
            return true;
        };
        let required = service_node_payment(height, coinbase.total_out());
        payees.is_transaction_valid(coinbase, required)
    }
}

/// Validate a block's coinbase payee against the election results.
///
/// Before the vote history is synced there is nothing to check against, so
/// the longest chain is accepted. With enforcement disabled by spork, a
/// wrong payee is logged but accepted.
pub fn is_block_payee_valid(
    payments: &Payments,
    coinbase: &Tx,
    height: u32,
    sync: &SyncState,
    sporks: &SporkFlags,
) -> bool {
    if !sync.is_synced() {
        tracing::debug!(height, "not synced; skipping payee checks");
        return true;
    }

    if payments.is_transaction_valid(coinbase, height) {
        tracing::debug!(height, "valid service-node payment");
        return true;
    }

    if sporks.payment_enforcement {
        false
    } else {
        tracing::warn!(height, "payment enforcement disabled; accepting block");
        true
    }
}

/// Append the service-node output when producing a block locally.
///
/// Uses the voted winner when one exists; otherwise falls back to the
/// locally computed queue head and hopes the network agrees.
pub fn fill_block_payments(
    payments: &Payments,
    registry: &mut Registry,
    chain: &dyn ChainView,
    ctx: &GossipContext,
    coinbase: &mut Tx,
    height: u32,
    payment: onyx_types::Amount,
) -> Option<TxOut> {
    let payee: Option<Script> = payments.block_payee(height).or_else(|| {
        // No winner on record; compute one ourselves.
        let (winner, _) =
            registry.next_in_queue_for_payment(height, true, chain, payments, ctx.now, ctx.min_payment_proto);
        winner.map(|info| Script::p2pkh(&info.collateral_pubkey))
    });

    let Some(payee) = payee else {
        tracing::warn!(height, "failed to detect a service node to pay");
        return None;
    };

    let txout = TxOut {
        value: payment,
        script: payee,
    };
    coinbase.outputs.push(txout.clone());
    tracing::info!(height, amount = %payment, "service-node payment filled");
    Some(txout)
}
