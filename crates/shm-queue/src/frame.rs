//! Slot framing.
//!
//! Every slot carries exactly one message:
//!
//! ```text
//! slot := length:u32 (little-endian) || payload:[u8; slot_size - 4]
//! ```
//!
//! Payload bytes past `length` are not zeroed; readers trust only the first
//! `length` bytes.

/// Size of the length prefix at the start of every slot.
pub const LEN_PREFIX: usize = 4;

/// Outcome of decoding a slot into a caller buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    /// Bytes written into the destination buffer.
    pub len: usize,
    /// The stored message was longer than the destination buffer.
    pub truncated: bool,
}

/// Payload capacity of a slot of `slot_len` bytes.
#[inline]
pub fn payload_capacity(slot_len: usize) -> usize {
    slot_len.saturating_sub(LEN_PREFIX)
}

/// Write `payload` into `slot`, returning the number of payload bytes stored.
///
/// Payloads longer than the slot's capacity are silently cut to fit; the
/// producer has no channel to report that to whoever sent it. A slot shorter
/// than the length prefix is left untouched and stores nothing.
pub fn encode(slot: &mut [u8], payload: &[u8]) -> usize {
    if slot.len() < LEN_PREFIX {
        return 0;
    }
    let stored = payload.len().min(payload_capacity(slot.len()));
    let (prefix, body) = slot.split_at_mut(LEN_PREFIX);
    // stored <= slot payload capacity, which config validation caps at u32::MAX.
    prefix.copy_from_slice(&(stored as u32).to_le_bytes());
    body[..stored].copy_from_slice(&payload[..stored]);
    stored
}

/// The length recorded in the slot's prefix, as written (possibly corrupt).
///
/// A slot too short to hold the prefix declares nothing.
#[inline]
pub fn declared_len(slot: &[u8]) -> u32 {
    match slot.first_chunk::<LEN_PREFIX>() {
        Some(prefix) => u32::from_le_bytes(*prefix),
        None => 0,
    }
}

/// Copy the message stored in `slot` into `dest`.
///
/// Never reads past the end of the slot, whatever the length prefix claims.
pub fn decode(slot: &[u8], dest: &mut [u8]) -> Decoded {
    let declared = declared_len(slot) as usize;
    let body = slot.get(LEN_PREFIX..).unwrap_or_default();
    let len = declared.min(dest.len()).min(body.len());
    dest[..len].copy_from_slice(&body[..len]);
    Decoded {
        len,
        truncated: dest.len() < declared,
    }
}
