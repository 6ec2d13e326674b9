//! Binary wire form of parsed expressions.
//!
//! A compiled filter keeps its source expression so it can be shipped to
//! another process and recompiled there. The format is a single version
//! byte followed by the bincode payload of the [`Expression`] tree.

use super::expr::Expression;
use thiserror::Error;

/// Current wire format version
pub const WIRE_VERSION: u8 = 1;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Empty expression payload")]
    Empty,

    #[error("Unsupported expression wire version: {0}")]
    UnsupportedVersion(u8),

    #[error("Expression codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Encode an expression. Literals holding live objects cannot be encoded.
pub fn encode(expr: &Expression) -> Result<Vec<u8>, WireError> {
    let payload = bincode::serialize(expr)?;
    let mut buf = Vec::with_capacity(payload.len() + 1);
    buf.push(WIRE_VERSION);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

pub fn decode(data: &[u8]) -> Result<Expression, WireError> {
    let (version, payload) = data.split_first().ok_or(WireError::Empty)?;
    if *version != WIRE_VERSION {
        return Err(WireError::UnsupportedVersion(*version));
    }
    Ok(bincode::deserialize(payload)?)
}
