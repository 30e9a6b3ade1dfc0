//! Frame header codec.
//!
//! The header travels between the RS and US bytes of a framed record and is
//! msgpack-encoded with named fields. It carries the payload length and,
//! for signed records, the HMAC parameters.

use crate::types::{Error, Result};
use serde::{Deserialize, Serialize};

use super::MAX_HEADER_SIZE;

/// HMAC hash functions accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashFunction {
    Md5,
    Sha1,
}

/// Serialized frame header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub message_length: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac_hash_function: Option<HashFunction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac_signer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac_key_version: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<Vec<u8>>,
}

impl FrameHeader {
    /// Header for an unsigned record.
    pub fn unsigned(message_length: u32) -> Self {
        Self {
            message_length,
            hmac_hash_function: None,
            hmac_signer: None,
            hmac_key_version: None,
            hmac: None,
        }
    }

    /// Whether the header carries HMAC parameters.
    pub fn is_signed(&self) -> bool {
        self.hmac.is_some()
    }
}

/// Encode a header, enforcing the one-byte length prefix limit.
pub fn encode_header(header: &FrameHeader) -> Result<Vec<u8>> {
    let encoded = rmp_serde::to_vec_named(header)?;
    if encoded.len() > MAX_HEADER_SIZE {
        return Err(Error::framing(format!(
            "header too large: {} bytes (max {})",
            encoded.len(),
            MAX_HEADER_SIZE
        )));
    }
    Ok(encoded)
}

/// Decode a header slice.
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_header_round_trips() {
        let header = FrameHeader::unsigned(512);
        let encoded = encode_header(&header).unwrap();
        assert!(encoded.len() <= MAX_HEADER_SIZE);
        assert_eq!(decode_header(&encoded).unwrap(), header);
    }

    #[test]
    fn signed_header_round_trips() {
        let header = FrameHeader {
            message_length: 77,
            hmac_hash_function: Some(HashFunction::Md5),
            hmac_signer: Some("test".to_string()),
            hmac_key_version: Some(1),
            hmac: Some(vec![0xDE, 0xAD, 0xBE, 0xEF]),
        };
        let encoded = encode_header(&header).unwrap();
        let decoded = decode_header(&encoded).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_signed());
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(decode_header(&[0xC1, 0xC1, 0xC1]).is_err());
    }
}
