//! ERC-20 `Transfer` log normalizer.
//!
//! A `Transfer(address indexed from, address indexed to, uint256 value)` log
//! carries three topics:
//!
//! ```text
//! topics[0] = keccak256("Transfer(address,address,uint256)")
//! topics[1] = from, left-padded to 32 bytes
//! topics[2] = to,   left-padded to 32 bytes
//! data      = value, big-endian uint256
//! ```
//!
//! [`normalize`] is the only place raw payloads are decoded.

use alloy_primitives::U256;
use tiny_keccak::{Hasher, Keccak};

use crate::error::NormalizeError;
use crate::types::{RawLog, Transfer};

/// Canonical ABI signature of the ERC-20 transfer event.
pub const TRANSFER_EVENT_SIGNATURE: &str = "Transfer(address,address,uint256)";

/// `keccak256(TRANSFER_EVENT_SIGNATURE)`.
pub const TRANSFER_EVENT_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Compute the topic0 hash of an event signature string.
pub fn event_topic(signature: &str) -> String {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(signature.as_bytes());
    hasher.finalize(&mut output);
    format!("0x{}", hex::encode(output))
}

/// Turn a raw `Transfer` log plus its block timestamp into a [`Transfer`].
pub fn normalize(log: &RawLog, block_timestamp: u64) -> Result<Transfer, NormalizeError> {
    if log.topics.len() != 3 {
        return Err(NormalizeError::TopicCount(log.topics.len()));
    }

    let topic0 = decode_fixed(&log.topics[0], "topics[0]", 32)?;
    if format!("0x{}", hex::encode(topic0)) != TRANSFER_EVENT_TOPIC {
        return Err(NormalizeError::UnexpectedSignature(log.topics[0].clone()));
    }

    let from = topic_address(&log.topics[1], "topics[1]")?;
    let to = topic_address(&log.topics[2], "topics[2]")?;
    let value = decode_amount(&log.data)?;
    let transaction_hash = canonical_hex(&log.transaction_hash, "transaction_hash", 32)?;
    let token_address = canonical_hex(&log.address, "address", 20)?;

    Ok(Transfer {
        transaction_hash,
        block_number: log.block_number,
        block_timestamp,
        from,
        to,
        value,
        token_address,
        log_index: log.log_index,
        transaction_index: log.transaction_index,
    })
}

/// Lower-case and validate a 20-byte address.
pub fn canonical_address(address: &str) -> Result<String, NormalizeError> {
    canonical_hex(address, "address", 20)
}

/// Returns `true` for `0x` followed by exactly 40 hex digits (any case).
pub fn is_valid_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .map(|h| h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

/// The address sits in the low-order 20 bytes of a 32-byte topic.
fn topic_address(topic: &str, field: &'static str) -> Result<String, NormalizeError> {
    let bytes = decode_fixed(topic, field, 32)?;
    Ok(format!("0x{}", hex::encode(&bytes[12..])))
}

fn decode_amount(data: &str) -> Result<String, NormalizeError> {
    let bytes = decode_hex(data, "data")?;
    if bytes.is_empty() {
        return Err(NormalizeError::EmptyData);
    }
    if bytes.len() > 32 {
        return Err(NormalizeError::InvalidLength {
            field: "data",
            expected: 32,
            actual: bytes.len(),
        });
    }
    let value = U256::from_be_slice(&bytes);
    Ok(value.to_string())
}

fn canonical_hex(
    value: &str,
    field: &'static str,
    len: usize,
) -> Result<String, NormalizeError> {
    let bytes = decode_fixed(value, field, len)?;
    Ok(format!("0x{}", hex::encode(bytes)))
}

fn decode_fixed(
    value: &str,
    field: &'static str,
    len: usize,
) -> Result<Vec<u8>, NormalizeError> {
    let bytes = decode_hex(value, field)?;
    if bytes.len() != len {
        return Err(NormalizeError::InvalidLength {
            field,
            expected: len,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

fn decode_hex(value: &str, field: &'static str) -> Result<Vec<u8>, NormalizeError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    hex::decode(digits).map_err(|_| NormalizeError::InvalidHex { field })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FROM: &str = "0xAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAa";
    const TO: &str = "0xBbBbBbBbBbBbBbBbBbBbBbBbBbBbBbBbBbBbBbBb";

    fn pad_topic(address: &str) -> String {
        format!("0x{:0>64}", address.trim_start_matches("0x"))
    }

    fn transfer_log(value_hex: &str) -> RawLog {
        RawLog {
            address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".into(),
            topics: vec![
                TRANSFER_EVENT_TOPIC.into(),
                pad_topic(FROM),
                pad_topic(TO),
            ],
            data: value_hex.into(),
            block_number: 5,
            transaction_hash: format!("0x{}", "AB".repeat(32)),
            transaction_index: 2,
            log_index: 7,
            removed: false,
        }
    }

    #[test]
    fn transfer_topic_matches_keccak() {
        assert_eq!(event_topic(TRANSFER_EVENT_SIGNATURE), TRANSFER_EVENT_TOPIC);
    }

    #[test]
    fn normalizes_addresses_and_value() {
        // 10^18
        let log = transfer_log("0x0000000000000000000000000000000000000000000000000de0b6b3a7640000");
        let t = normalize(&log, 1_700_000_000).unwrap();

        assert_eq!(t.from, "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(t.to, "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        assert_eq!(t.value, "1000000000000000000");
        assert_eq!(t.token_address, "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
        assert_eq!(t.transaction_hash, format!("0x{}", "ab".repeat(32)));
        assert_eq!(t.block_timestamp, 1_700_000_000);
        assert_eq!((t.block_number, t.transaction_index, t.log_index), (5, 2, 7));
    }

    #[test]
    fn preserves_full_256_bit_values() {
        let log = transfer_log(&format!("0x{}", "ff".repeat(32)));
        let t = normalize(&log, 0).unwrap();
        assert_eq!(
            t.value,
            "115792089237316195423570985008687907853269984665640564039457584007913129639935"
        );
    }

    #[test]
    fn address_taken_from_low_order_bytes() {
        let mut log = transfer_log("0x01");
        // garbage in the padding must not leak into the address
        log.topics[1] = format!("0x{}{}", "11".repeat(12), "22".repeat(20));
        let t = normalize(&log, 0).unwrap();
        assert_eq!(t.from, format!("0x{}", "22".repeat(20)));
        assert_eq!(t.value, "1");
    }

    #[test]
    fn rejects_wrong_topic_count() {
        let mut log = transfer_log("0x01");
        log.topics.push(pad_topic("0x01")); // ERC-721 shape
        assert_eq!(normalize(&log, 0), Err(NormalizeError::TopicCount(4)));
    }

    #[test]
    fn rejects_other_events() {
        let mut log = transfer_log("0x01");
        log.topics[0] = event_topic("Approval(address,address,uint256)");
        assert!(matches!(
            normalize(&log, 0),
            Err(NormalizeError::UnexpectedSignature(_))
        ));
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert_eq!(normalize(&transfer_log("0x"), 0), Err(NormalizeError::EmptyData));
        assert_eq!(
            normalize(&transfer_log("0xzz"), 0),
            Err(NormalizeError::InvalidHex { field: "data" })
        );
        assert!(matches!(
            normalize(&transfer_log(&format!("0x{}", "00".repeat(33))), 0),
            Err(NormalizeError::InvalidLength { field: "data", .. })
        ));

        let mut short_topic = transfer_log("0x01");
        short_topic.topics[2] = "0x1234".into();
        assert!(matches!(
            normalize(&short_topic, 0),
            Err(NormalizeError::InvalidLength { field: "topics[2]", .. })
        ));
    }

    #[test]
    fn address_helpers() {
        assert!(is_valid_address(FROM));
        assert!(!is_valid_address("0x1234"));
        assert!(!is_valid_address("AaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAa"));
        assert_eq!(
            canonical_address(FROM).unwrap(),
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
        assert!(canonical_address("0xnothex").is_err());
    }
}
