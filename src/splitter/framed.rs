//! Framed-stream splitter with HMAC authentication.
//!
//! Consumes the RS/HLEN/header/US/payload wire format (see [`crate::wire`]).
//! Each call is stateless: a frame that is not yet complete leaves the
//! buffer untouched apart from garbage discarded during resynchronization.

use super::{Split, Splitter};
use crate::types::{Error, Result};
use crate::wire::{
    authenticate, decode_header, AuthResult, SignerTable, MAX_MESSAGE_SIZE, RECORD_SEPARATOR,
    UNIT_SEPARATOR,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Splitter for framed record streams.
#[derive(Debug, Default)]
pub struct FramedSplitter {
    signers: Arc<SignerTable>,
    auth_failures: AtomicU64,
}

impl FramedSplitter {
    pub fn new(signers: Arc<SignerTable>) -> Self {
        Self {
            signers,
            auth_failures: AtomicU64::new(0),
        }
    }

    /// Count of records dropped for failing authentication.
    pub fn auth_failures(&self) -> u64 {
        self.auth_failures.load(Ordering::Acquire)
    }

    /// Strip the framing from one complete frame, without authentication.
    /// Used by readers of trusted local spools.
    pub fn unframe<'a>(&self, framed: &'a [u8]) -> Result<&'a [u8]> {
        let split = self.find_record(framed)?;
        split
            .payload
            .ok_or_else(|| Error::framing("buffer does not hold one complete frame"))
    }
}

impl Splitter for FramedSplitter {
    fn find_record<'a>(&self, buf: &'a [u8]) -> Result<Split<'a>> {
        // Resynchronize: bytes before the record separator are garbage.
        let Some(rs) = buf.iter().position(|&b| b == RECORD_SEPARATOR) else {
            return Ok(Split::skip(buf.len()));
        };

        let frame = &buf[rs..];
        if frame.len() < 2 {
            return Ok(Split::need_more(rs));
        }
        let header_len = frame[1] as usize;

        // RS + HLEN + header + US
        let payload_start = 2 + header_len + 1;
        if frame.len() < payload_start {
            return Ok(Split::need_more(rs));
        }

        let header = match decode_header(&frame[2..2 + header_len]) {
            Ok(header) => header,
            // Invalid candidate; resume the scan one byte past this RS.
            Err(_) => return Ok(Split::skip(rs + 1)),
        };
        if header.message_length > MAX_MESSAGE_SIZE {
            return Ok(Split::skip(rs + 1));
        }
        if frame[2 + header_len] != UNIT_SEPARATOR {
            return Ok(Split::skip(rs + 1));
        }

        let message_len = header.message_length as usize;
        if frame.len() < payload_start + message_len {
            return Ok(Split::need_more(rs));
        }
        let payload = &frame[payload_start..payload_start + message_len];
        let consumed = rs + payload_start + message_len;

        match authenticate(&header, payload, &self.signers) {
            AuthResult::Unsigned => Ok(Split::record(consumed, payload)),
            AuthResult::Verified(signer) => Ok(Split {
                consumed,
                payload: Some(payload),
                signer: Some(signer),
            }),
            AuthResult::Rejected => {
                self.auth_failures.fetch_add(1, Ordering::AcqRel);
                Ok(Split::skip(consumed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{frame_record, FrameSigner, HashFunction};

    fn table() -> Arc<SignerTable> {
        let mut t = SignerTable::new();
        t.add_key("test", 1, b"testkey");
        Arc::new(t)
    }

    fn signer(key_version: u32) -> FrameSigner {
        FrameSigner {
            signer: "test".to_string(),
            key_version,
            hash_function: HashFunction::Md5,
            key: b"testkey".to_vec(),
        }
    }

    #[test]
    fn parses_consecutive_frames() {
        let mut wire = Vec::new();
        frame_record(b"first", None, &mut wire).unwrap();
        frame_record(b"second", None, &mut wire).unwrap();

        let splitter = FramedSplitter::new(table());
        let split = splitter.find_record(&wire).unwrap();
        assert_eq!(split.payload, Some(&b"first"[..]));
        let rest = &wire[split.consumed..];
        let split = splitter.find_record(rest).unwrap();
        assert_eq!(split.payload, Some(&b"second"[..]));
        assert_eq!(split.consumed, rest.len());
    }

    #[test]
    fn resyncs_past_garbage() {
        let mut wire = b"BOGUS".to_vec();
        frame_record(b"real", None, &mut wire).unwrap();

        let splitter = FramedSplitter::new(table());
        // The garbage prefix is skipped and the frame parsed in one call.
        let split = splitter.find_record(&wire).unwrap();
        assert_eq!(split.payload, Some(&b"real"[..]));
        assert_eq!(split.consumed, wire.len());
    }

    #[test]
    fn incomplete_frame_preserves_bytes() {
        let mut wire = Vec::new();
        frame_record(b"payload", None, &mut wire).unwrap();

        let splitter = FramedSplitter::new(table());
        let split = splitter.find_record(&wire[..wire.len() - 3]).unwrap();
        assert_eq!(split.consumed, 0);
        assert!(split.payload.is_none());
    }

    #[test]
    fn corrupt_unit_separator_resyncs_at_next_byte() {
        let mut wire = Vec::new();
        frame_record(b"data", None, &mut wire).unwrap();
        let header_len = wire[1] as usize;
        wire[2 + header_len] = 0x00; // clobber the US byte

        let splitter = FramedSplitter::new(table());
        let split = splitter.find_record(&wire).unwrap();
        assert_eq!(split.consumed, 1);
        assert!(split.payload.is_none());
    }

    #[test]
    fn verified_frame_carries_signer() {
        let mut wire = Vec::new();
        frame_record(b"signed payload", Some(&signer(1)), &mut wire).unwrap();

        let splitter = FramedSplitter::new(table());
        let split = splitter.find_record(&wire).unwrap();
        assert_eq!(split.payload, Some(&b"signed payload"[..]));
        assert_eq!(split.signer.as_deref(), Some("test"));
        assert_eq!(splitter.auth_failures(), 0);
    }

    #[test]
    fn unknown_key_version_drops_frame() {
        let mut wire = Vec::new();
        frame_record(b"signed payload", Some(&signer(11)), &mut wire).unwrap();

        let splitter = FramedSplitter::new(table());
        let split = splitter.find_record(&wire).unwrap();
        assert!(split.payload.is_none());
        assert_eq!(split.consumed, wire.len());
        assert_eq!(splitter.auth_failures(), 1);
    }

    #[test]
    fn unframe_strips_framing() {
        let mut wire = Vec::new();
        frame_record(b"spooled", None, &mut wire).unwrap();
        let splitter = FramedSplitter::default();
        assert_eq!(splitter.unframe(&wire).unwrap(), b"spooled");
        assert!(splitter.unframe(&wire[..4]).is_err());
    }
}
