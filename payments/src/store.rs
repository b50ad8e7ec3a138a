//! Payment history persistence: votes and payee blocks in one versioned
//! snapshot, reset on version mismatch.

use crate::payees::BlockPayees;
use crate::payments::{Payments, StoredVote, VoteStore};
use crate::PaymentsError;
use onyx_messages::MsgHash;
use onyx_types::Outpoint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const MAGIC: &str = "OnyxPaymentCache";
const FORMAT_VERSION: &str = "payments-store-2";

#[derive(Serialize, Deserialize)]
struct Snapshot {
    magic: String,
    version: String,
    votes: HashMap<MsgHash, StoredVote>,
    last_votes: HashMap<Outpoint, u32>,
    blocks: BTreeMap<u32, BlockPayees>,
}

pub fn save_payments(payments: &Payments, path: &Path) -> Result<(), PaymentsError> {
    let snapshot = {
        let blocks = payments.blocks.read();
        let store = payments.votes.read();
        Snapshot {
            magic: MAGIC.to_string(),
            version: FORMAT_VERSION.to_string(),
            votes: store.votes.clone(),
            last_votes: store.last_votes.clone(),
            blocks: blocks.clone(),
        }
    };
    let bytes =
        bincode::serialize(&snapshot).map_err(|e| PaymentsError::Corrupt(e.to_string()))?;
    std::fs::write(path, bytes)?;
    tracing::debug!(path = %path.display(), votes = snapshot.votes.len(), "payment data saved");
    Ok(())
}

pub fn load_payments(path: &Path) -> Result<Payments, PaymentsError> {
    let bytes = std::fs::read(path)?;
    let snapshot: Snapshot =
        bincode::deserialize(&bytes).map_err(|e| PaymentsError::Corrupt(e.to_string()))?;
    if snapshot.magic != MAGIC || snapshot.version != FORMAT_VERSION {
        return Err(PaymentsError::IncompatibleVersion(format!(
            "{}/{}",
            snapshot.magic, snapshot.version
        )));
    }

    let payments = Payments::new();
    *payments.votes.write() = VoteStore {
        votes: snapshot.votes,
        last_votes: snapshot.last_votes,
    };
    *payments.blocks.write() = snapshot.blocks;
    tracing::info!(
        path = %path.display(),
        votes = payments.vote_count(),
        blocks = payments.block_count(),
        "payment data loaded"
    );
    Ok(payments)
}
