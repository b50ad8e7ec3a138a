//! Payment schedule and block-value sanity check.

use crate::Tx;
use onyx_types::params::PAYMENT_PERCENT;
use onyx_types::Amount;

/// The service-node share of a block's coinbase value.
///
/// A flat percentage of the total coinbase output; the height parameter is
/// part of the seam so a future halving schedule doesn't change callers.
pub fn service_node_payment(_height: u32, block_value: Amount) -> Amount {
    block_value.percent(PAYMENT_PERCENT)
}

/// Whether a coinbase creates no more money than the block reward allows.
///
/// Treasury "superblocks" are permanently disabled on Onyx, so the only
/// rule is the plain reward ceiling.
pub fn is_block_value_valid(coinbase: &Tx, block_reward: Amount) -> Result<(), String> {
    let value_out = coinbase.total_out();
    if value_out <= block_reward {
        Ok(())
    } else {
        Err(format!(
            "coinbase pays too much (actual={} vs limit={})",
            value_out, block_reward
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TxOut;
    use onyx_types::Script;

    fn coinbase(value: Amount) -> Tx {
        Tx {
            outputs: vec![TxOut {
                value,
                script: Script::from_bytes(vec![0x51]),
            }],
        }
    }

    #[test]
    fn payment_is_thirty_percent() {
        let payment = service_node_payment(100, Amount::from_onx(10));
        assert_eq!(payment, Amount::from_onx(3));
    }

    #[test]
    fn block_value_at_limit_is_valid() {
        let reward = Amount::from_onx(10);
        assert!(is_block_value_valid(&coinbase(reward), reward).is_ok());
    }

    #[test]
    fn block_value_over_limit_is_invalid() {
        let reward = Amount::from_onx(10);
        let over = Amount::from_raw(reward.raw() + 1);
        assert!(is_block_value_valid(&coinbase(over), reward).is_err());
    }
}
