//! Wire framing for record streams.
//!
//! Frame format:
//! ```text
//! ┌─────────┬──────────┬────────────────┬─────────┬──────────────────────┐
//! │ RS 0x1E │ HLEN(1B) │ header (HLEN)  │ US 0x1F │ payload (msg_length) │
//! └─────────┴──────────┴────────────────┴─────────┴──────────────────────┘
//! ```
//! The header is msgpack with named fields (see [`header::FrameHeader`]) and
//! carries the payload length plus optional HMAC parameters. The framed
//! splitter consumes this format; the framing encoder wrapper and the disk
//! spool produce it.

pub mod auth;
pub mod header;

pub use auth::{authenticate, sign, AuthResult, SignerTable};
pub use header::{decode_header, encode_header, FrameHeader, HashFunction};

use crate::types::{Error, Result};

/// Record separator: starts every frame.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Unit separator: ends the header section.
pub const UNIT_SEPARATOR: u8 = 0x1F;

/// One length byte bounds the serialized header.
pub const MAX_HEADER_SIZE: usize = 255;

/// Maximum framed payload size.
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024;

/// HMAC signing parameters for an output that produces signed frames.
#[derive(Debug, Clone)]
pub struct FrameSigner {
    pub signer: String,
    pub key_version: u32,
    pub hash_function: HashFunction,
    pub key: Vec<u8>,
}

/// Append one framed record to `out`. Signs the payload when a signer is
/// provided.
pub fn frame_record(payload: &[u8], signer: Option<&FrameSigner>, out: &mut Vec<u8>) -> Result<()> {
    if payload.len() > MAX_MESSAGE_SIZE as usize {
        return Err(Error::framing(format!(
            "payload of {} bytes exceeds maximum of {}",
            payload.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    let header = match signer {
        None => FrameHeader::unsigned(payload.len() as u32),
        Some(s) => FrameHeader {
            message_length: payload.len() as u32,
            hmac_hash_function: Some(s.hash_function),
            hmac_signer: Some(s.signer.clone()),
            hmac_key_version: Some(s.key_version),
            hmac: Some(sign(s.hash_function, &s.key, payload)),
        },
    };
    let encoded = encode_header(&header)?;

    out.reserve(3 + encoded.len() + payload.len());
    out.push(RECORD_SEPARATOR);
    out.push(encoded.len() as u8);
    out.extend_from_slice(&encoded);
    out.push(UNIT_SEPARATOR);
    out.extend_from_slice(payload);
    Ok(())
}
