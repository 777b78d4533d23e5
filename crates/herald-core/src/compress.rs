//! Payload compression preprocessor.
//!
//! Payloads below a size threshold pass through untouched; above it the
//! algorithm tier follows the message's priority class (urgent messages
//! prefer speed, background traffic prefers ratio), and a result is only
//! accepted when it actually saves enough to justify the CPU spent.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{HeraldError, Result};
use crate::route::Priority;

/// zstd level for the max tier.
const ZSTD_MAX_LEVEL: i32 = 19;

/// Compression algorithm tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Pass-through.
    None,
    /// Deflate, fastest setting.
    Fast,
    /// Deflate, default setting.
    Balanced,
    /// zstd at a high level, best ratio.
    Max,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::None => "none",
            Algorithm::Fast => "fast",
            Algorithm::Balanced => "balanced",
            Algorithm::Max => "max",
        }
    }

    /// Stable wire tag. Values are part of the schema and never reused.
    pub fn wire_tag(self) -> u8 {
        match self {
            Algorithm::None => 0,
            Algorithm::Fast => 1,
            Algorithm::Balanced => 2,
            Algorithm::Max => 3,
        }
    }

    pub fn from_wire_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Algorithm::None),
            1 => Ok(Algorithm::Fast),
            2 => Ok(Algorithm::Balanced),
            3 => Ok(Algorithm::Max),
            other => Err(HeraldError::Decode(format!(
                "unknown compression tag: {other}"
            ))),
        }
    }

    /// Tier used for a priority class: urgent traffic gets the cheap
    /// encoder, background traffic gets the expensive one.
    pub fn for_priority(priority: Priority) -> Self {
        match priority {
            Priority::Critical | Priority::High => Algorithm::Fast,
            Priority::Normal => Algorithm::Balanced,
            Priority::Low => Algorithm::Max,
        }
    }
}

/// Size/ratio policy for the preprocessor.
#[derive(Debug, Clone, Copy)]
pub struct CompressionPolicy {
    /// Payloads smaller than this are never compressed.
    pub min_size: usize,
    /// Accept compression only below this fraction of the original size.
    pub max_ratio: f64,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            min_size: 1024,
            max_ratio: 0.8,
        }
    }
}

/// Outcome of one compression decision, kept for statistics.
#[derive(Debug, Clone, Copy)]
pub struct CompressionDecision {
    pub original_size: usize,
    pub algorithm: Algorithm,
    pub compressed_size: usize,
    pub ratio: f64,
    /// False when the chosen tier's cost was judged to outweigh the saving
    /// and the payload fell back to pass-through.
    pub cpu_acceptable: bool,
}

impl CompressionDecision {
    fn passthrough(size: usize) -> Self {
        Self {
            original_size: size,
            algorithm: Algorithm::None,
            compressed_size: size,
            ratio: 1.0,
            cpu_acceptable: true,
        }
    }
}

fn encode(data: &[u8], algo: Algorithm) -> std::io::Result<Vec<u8>> {
    match algo {
        Algorithm::None => Ok(data.to_vec()),
        Algorithm::Fast => {
            let mut enc = DeflateEncoder::new(Vec::new(), Compression::fast());
            enc.write_all(data)?;
            enc.finish()
        }
        Algorithm::Balanced => {
            let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
            enc.write_all(data)?;
            enc.finish()
        }
        Algorithm::Max => zstd::stream::encode_all(data, ZSTD_MAX_LEVEL),
    }
}

fn decode(data: &[u8], algo: Algorithm) -> std::io::Result<Vec<u8>> {
    match algo {
        Algorithm::None => Ok(data.to_vec()),
        Algorithm::Fast | Algorithm::Balanced => {
            let mut out = Vec::new();
            DeflateDecoder::new(data).read_to_end(&mut out)?;
            Ok(out)
        }
        Algorithm::Max => zstd::stream::decode_all(data),
    }
}

/// Conditionally compress a payload. Returns the bytes to put on the wire
/// and the decision record. Never fails: an encoder error or an unprofitable
/// result both fall back to pass-through.
pub fn compress(payload: Bytes, priority: Priority, policy: &CompressionPolicy) -> (Bytes, CompressionDecision) {
    let original_size = payload.len();
    if original_size < policy.min_size {
        return (payload, CompressionDecision::passthrough(original_size));
    }

    let algo = Algorithm::for_priority(priority);
    match encode(&payload, algo) {
        Ok(compressed) => {
            let ratio = compressed.len() as f64 / original_size as f64;
            if ratio < policy.max_ratio {
                let decision = CompressionDecision {
                    original_size,
                    algorithm: algo,
                    compressed_size: compressed.len(),
                    ratio,
                    cpu_acceptable: true,
                };
                (Bytes::from(compressed), decision)
            } else {
                // Saving too small for the cycles spent.
                let mut decision = CompressionDecision::passthrough(original_size);
                decision.cpu_acceptable = false;
                (payload, decision)
            }
        }
        Err(e) => {
            tracing::debug!(algo = algo.as_str(), error = %e, "compression failed, passing through");
            (payload, CompressionDecision::passthrough(original_size))
        }
    }
}

/// Exact inverse of `compress`. Tolerates input that was never compressed:
/// a decode failure is recoverable and yields the original bytes.
pub fn decompress(payload: Bytes, algo: Algorithm) -> Bytes {
    if algo == Algorithm::None {
        return payload;
    }
    match decode(&payload, algo) {
        Ok(out) => Bytes::from(out),
        Err(e) => {
            tracing::debug!(algo = algo.as_str(), error = %e, "decompression failed, returning input");
            payload
        }
    }
}
