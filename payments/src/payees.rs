//! Per-height payee buckets.

use onyx_chain::Tx;
use onyx_messages::{MsgHash, PaymentVote};
use onyx_types::params::SIGNATURES_REQUIRED;
use onyx_types::{Amount, Script};
use serde::{Deserialize, Serialize};

/// Votes accumulated for one payee script at one height.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayeeBucket {
    payee: Script,
    vote_hashes: Vec<MsgHash>,
}

impl PayeeBucket {
    pub fn new(payee: Script, first_vote: MsgHash) -> Self {
        Self {
            payee,
            vote_hashes: vec![first_vote],
        }
    }

    pub fn payee(&self) -> &Script {
        &self.payee
    }

    pub fn vote_count(&self) -> usize {
        self.vote_hashes.len()
    }

    pub fn vote_hashes(&self) -> &[MsgHash] {
        &self.vote_hashes
    }
}

/// The ordered payee buckets for one voted-on block height.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockPayees {
    pub block_height: u32,
    payees: Vec<PayeeBucket>,
}

impl BlockPayees {
    pub fn new(block_height: u32) -> Self {
        Self {
            block_height,
            payees: Vec::new(),
        }
    }

    /// File a vote under its payee's bucket, creating the bucket on first
    /// sight.
    pub fn add_vote(&mut self, vote: &PaymentVote) {
        for bucket in &mut self.payees {
            if bucket.payee == vote.payee {
                bucket.vote_hashes.push(vote.hash());
                return;
            }
        }
        self.payees.push(PayeeBucket::new(vote.payee.clone(), vote.hash()));
    }

    pub fn buckets(&self) -> &[PayeeBucket] {
        &self.payees
    }

    /// The payee with the most votes, if any votes exist.
    pub fn best_payee(&self) -> Option<Script> {
        self.payees
            .iter()
            .max_by_key(|bucket| bucket.vote_count())
            .map(|bucket| bucket.payee.clone())
    }

    pub fn has_payee_with_votes(&self, payee: &Script, min_votes: usize) -> bool {
        self.payees
            .iter()
            .any(|bucket| bucket.vote_count() >= min_votes && &bucket.payee == payee)
    }

    pub fn max_signatures(&self) -> usize {
        self.payees
            .iter()
            .map(|bucket| bucket.vote_count())
            .max()
            .unwrap_or(0)
    }

    pub fn total_votes(&self) -> usize {
        self.payees.iter().map(|bucket| bucket.vote_count()).sum()
    }

    /// Whether `coinbase` satisfies this height's election.
    ///
    /// Only enforced once some bucket reaches the signature quorum; below
    /// that, any coinbase is acceptable (longest-chain fallback). With a
    /// quorum, the coinbase must pay `required_payment` exactly to a
    /// quorum-holding payee.
    pub fn is_transaction_valid(&self, coinbase: &Tx, required_payment: Amount) -> bool {
        if self.max_signatures() < SIGNATURES_REQUIRED {
            return true;
        }

        for bucket in &self.payees {
            if bucket.vote_count() < SIGNATURES_REQUIRED {
                continue;
            }
            let paid = coinbase
                .outputs
                .iter()
                .any(|out| out.script == bucket.payee && out.value == required_payment);
            if paid {
                return true;
            }
        }

        tracing::warn!(
            height = self.block_height,
            amount = %required_payment,
            "coinbase is missing the required service-node payment"
        );
        false
    }
}
