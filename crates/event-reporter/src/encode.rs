// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire encoding of packets.
//!
//! Small payloads are sent as plain JSON. Anything larger than
//! [`COMPRESSION_THRESHOLD`] bytes is zlib-compressed at the best ratio and
//! wrapped in standard base64.

use crate::packet::Packet;
use base64::Engine;
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use std::io::{Read, Write};

/// Largest JSON payload, in bytes, that is sent uncompressed.
pub const COMPRESSION_THRESHOLD: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to serialize packet: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to compress packet: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    OctetStream,
}

impl ContentType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::OctetStream => "application/octet-stream",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body ready to be posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub body: Vec<u8>,
    pub content_type: ContentType,
}

pub fn encode(packet: &Packet) -> Result<EncodedPacket, EncodeError> {
    encode_json(packet.to_json()?)
}

/// Chooses the wire form for an already serialized packet.
pub fn encode_json(json: Vec<u8>) -> Result<EncodedPacket, EncodeError> {
    if json.len() <= COMPRESSION_THRESHOLD {
        return Ok(EncodedPacket {
            body: json,
            content_type: ContentType::Json,
        });
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    Ok(EncodedPacket {
        body: base64::engine::general_purpose::STANDARD
            .encode(compressed)
            .into_bytes(),
        content_type: ContentType::OctetStream,
    })
}

/// Recovers the JSON payload from either wire form.
pub fn decode_json(body: &[u8], content_type: ContentType) -> Result<Vec<u8>, EncodeError> {
    match content_type {
        ContentType::Json => Ok(body.to_vec()),
        ContentType::OctetStream => {
            let compressed = base64::engine::general_purpose::STANDARD.decode(body)?;
            let mut json = Vec::new();
            ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut json)?;
            Ok(json)
        }
    }
}

pub fn decode(body: &[u8], content_type: ContentType) -> Result<Packet, EncodeError> {
    Ok(Packet::from_json(&decode_json(body, content_type)?)?)
}
