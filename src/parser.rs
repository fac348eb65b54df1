// src/parser.rs
use alloy::primitives::{b256, Address, B256, U256};
use alloy::rpc::types::Log;

/// ERC20 Transfer event topic keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// A decoded ERC20 Transfer, before enrichment.
#[derive(Debug, Clone)]
pub struct RawTransfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

fn topic_to_address(topic: &B256) -> Address {
    // topics[1] and topics[2] are 32-byte padded words; address is the last 20 bytes
    Address::from_slice(&topic.as_slice()[12..])
}

/// Decode a single log into `RawTransfer`. Logs that are not well-formed
/// Transfer events, or that lack inclusion context, yield `None`.
pub fn decode_transfer(log: &Log) -> Option<RawTransfer> {
    let topics = log.topics();
    if topics.len() < 3 || topics[0] != TRANSFER_TOPIC {
        return None;
    }

    let value = U256::try_from_be_slice(log.data().data.as_ref())?;

    Some(RawTransfer {
        token: log.address(),
        from: topic_to_address(&topics[1]),
        to: topic_to_address(&topics[2]),
        value,
        block_number: log.block_number?,
        tx_hash: log.transaction_hash?,
        log_index: log.log_index?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, LogData};

    fn transfer_log(token: Address, from: Address, to: Address, value: U256) -> Log {
        let topics = vec![TRANSFER_TOPIC, from.into_word(), to.into_word()];
        let data = Bytes::from(value.to_be_bytes::<32>().to_vec());
        Log {
            inner: alloy::primitives::Log {
                address: token,
                data: LogData::new_unchecked(topics, data),
            },
            block_number: Some(100),
            transaction_hash: Some(B256::repeat_byte(0x11)),
            log_index: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_a_transfer_log() {
        let token = Address::repeat_byte(0xaa);
        let from = Address::repeat_byte(0xbb);
        let to = Address::repeat_byte(0xcc);
        let transfer = decode_transfer(&transfer_log(token, from, to, U256::from(42u64)))
            .expect("well-formed log decodes");

        assert_eq!(transfer.token, token);
        assert_eq!(transfer.from, from);
        assert_eq!(transfer.to, to);
        assert_eq!(transfer.value, U256::from(42u64));
        assert_eq!(transfer.block_number, 100);
        assert_eq!(transfer.log_index, 3);
    }

    #[test]
    fn rejects_logs_with_missing_topics() {
        let mut log = transfer_log(
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0xbb),
            Address::repeat_byte(0xcc),
            U256::from(1u64),
        );
        log.inner.data = LogData::new_unchecked(vec![TRANSFER_TOPIC], Bytes::new());
        assert!(decode_transfer(&log).is_none());
    }

    #[test]
    fn rejects_non_transfer_topics() {
        let mut log = transfer_log(
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0xbb),
            Address::repeat_byte(0xcc),
            U256::from(1u64),
        );
        let mut topics = log.topics().to_vec();
        topics[0] = B256::repeat_byte(0xff);
        log.inner.data = LogData::new_unchecked(topics, log.data().data.clone());
        assert!(decode_transfer(&log).is_none());
    }

    #[test]
    fn rejects_pending_logs_without_block_context() {
        let mut log = transfer_log(
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0xbb),
            Address::repeat_byte(0xcc),
            U256::from(1u64),
        );
        log.block_number = None;
        assert!(decode_transfer(&log).is_none());
    }
}
