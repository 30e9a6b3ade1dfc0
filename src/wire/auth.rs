//! Frame authentication.
//!
//! Signed records carry an HMAC over the payload; keys are looked up by
//! `"{signer}_{key_version}"` in the configured signer table. Verification
//! is constant-time. Records without HMAC parameters are accepted as
//! unsigned.

use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use std::collections::HashMap;

use super::header::{FrameHeader, HashFunction};
use crate::types::SignerKeyConfig;

/// Accepted HMAC keys.
#[derive(Debug, Clone, Default)]
pub struct SignerTable {
    keys: HashMap<String, Vec<u8>>,
}

impl SignerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(entries: &[SignerKeyConfig]) -> Self {
        let mut table = Self::new();
        for entry in entries {
            table.add_key(&entry.signer, entry.key_version, entry.key.as_bytes());
        }
        table
    }

    pub fn add_key(&mut self, signer: &str, key_version: u32, key: &[u8]) {
        self.keys
            .insert(format!("{signer}_{key_version}"), key.to_vec());
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn lookup(&self, signer: &str, key_version: u32) -> Option<&[u8]> {
        self.keys
            .get(&format!("{signer}_{key_version}"))
            .map(Vec::as_slice)
    }
}

/// Outcome of authenticating one framed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// No HMAC parameters present.
    Unsigned,
    /// HMAC verified; carries the signer identity.
    Verified(String),
    /// Unknown key or HMAC mismatch; the record must be dropped.
    Rejected,
}

/// Verify a header's HMAC against the payload.
pub fn authenticate(header: &FrameHeader, payload: &[u8], table: &SignerTable) -> AuthResult {
    let Some(tag) = header.hmac.as_deref() else {
        return AuthResult::Unsigned;
    };
    let (Some(hash), Some(signer), Some(version)) = (
        header.hmac_hash_function,
        header.hmac_signer.as_deref(),
        header.hmac_key_version,
    ) else {
        return AuthResult::Rejected;
    };
    let Some(key) = table.lookup(signer, version) else {
        return AuthResult::Rejected;
    };

    if verify(hash, key, payload, tag) {
        AuthResult::Verified(signer.to_string())
    } else {
        AuthResult::Rejected
    }
}

fn verify(hash: HashFunction, key: &[u8], payload: &[u8], tag: &[u8]) -> bool {
    match hash {
        HashFunction::Md5 => {
            let Ok(mut mac) = Hmac::<Md5>::new_from_slice(key) else {
                return false;
            };
            mac.update(payload);
            mac.verify_slice(tag).is_ok()
        }
        HashFunction::Sha1 => {
            let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(key) else {
                return false;
            };
            mac.update(payload);
            mac.verify_slice(tag).is_ok()
        }
    }
}

/// Compute the HMAC tag for an outgoing signed frame.
pub fn sign(hash: HashFunction, key: &[u8], payload: &[u8]) -> Vec<u8> {
    match hash {
        HashFunction::Md5 => Hmac::<Md5>::new_from_slice(key)
            .map(|mut mac| {
                mac.update(payload);
                mac.finalize().into_bytes().to_vec()
            })
            .unwrap_or_default(),
        HashFunction::Sha1 => Hmac::<Sha1>::new_from_slice(key)
            .map(|mut mac| {
                mac.update(payload);
                mac.finalize().into_bytes().to_vec()
            })
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SignerTable {
        let mut t = SignerTable::new();
        t.add_key("test", 1, b"testkey");
        t
    }

    fn signed_header(hash: HashFunction, signer: &str, version: u32, tag: Vec<u8>) -> FrameHeader {
        FrameHeader {
            message_length: 0,
            hmac_hash_function: Some(hash),
            hmac_signer: Some(signer.to_string()),
            hmac_key_version: Some(version),
            hmac: Some(tag),
        }
    }

    #[test]
    fn md5_sign_verify_round_trip() {
        let payload = b"the payload";
        let tag = sign(HashFunction::Md5, b"testkey", payload);
        let header = signed_header(HashFunction::Md5, "test", 1, tag);
        assert_eq!(
            authenticate(&header, payload, &table()),
            AuthResult::Verified("test".to_string())
        );
    }

    #[test]
    fn sha1_sign_verify_round_trip() {
        let payload = b"another payload";
        let tag = sign(HashFunction::Sha1, b"testkey", payload);
        let header = signed_header(HashFunction::Sha1, "test", 1, tag);
        assert_eq!(
            authenticate(&header, payload, &table()),
            AuthResult::Verified("test".to_string())
        );
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let tag = sign(HashFunction::Md5, b"testkey", b"original");
        let header = signed_header(HashFunction::Md5, "test", 1, tag);
        assert_eq!(
            authenticate(&header, b"tampered", &table()),
            AuthResult::Rejected
        );
    }

    #[test]
    fn unknown_key_version_is_rejected() {
        let tag = sign(HashFunction::Md5, b"testkey", b"payload");
        let header = signed_header(HashFunction::Md5, "test", 11, tag);
        assert_eq!(
            authenticate(&header, b"payload", &table()),
            AuthResult::Rejected
        );
    }

    #[test]
    fn missing_hmac_is_unsigned() {
        let header = FrameHeader::unsigned(5);
        assert_eq!(
            authenticate(&header, b"bytes", &table()),
            AuthResult::Unsigned
        );
    }

    #[test]
    fn partial_hmac_parameters_are_rejected() {
        let mut header = FrameHeader::unsigned(5);
        header.hmac = Some(vec![1, 2, 3]);
        assert_eq!(
            authenticate(&header, b"bytes", &table()),
            AuthResult::Rejected
        );
    }
}
