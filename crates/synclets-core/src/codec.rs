//! Sortable string encoding and content hashing.
//!
//! Numbers are written big-endian, six bits per character, using an alphabet
//! listed in ASCII order. Two encodings of the same length therefore compare
//! byte-for-byte exactly as the numbers they encode.
//!
//! HLC layout (16 characters):
//!
//! ```text
//! | logical time (42 bits) | counter (24 bits) | client id (30 bits) |
//! |        7 chars         |      4 chars      |       5 chars       |
//! ```

use rand::Rng;

use crate::error::{CoreError, Result};
use crate::types::{Hash, Timestamp};

/// The 64 encoding symbols, in ascending ASCII order.
pub const ALPHABET: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

pub const LOGICAL_TIME_CHARS: usize = 7;
pub const COUNTER_CHARS: usize = 4;
pub const CLIENT_ID_CHARS: usize = 5;
pub const HLC_LENGTH: usize = LOGICAL_TIME_CHARS + COUNTER_CHARS + CLIENT_ID_CHARS;

/// Largest logical time representable in an HLC (42 bits).
pub const MAX_LOGICAL_TIME: u64 = (1 << 42) - 1;
/// Largest counter representable in an HLC (24 bits).
pub const MAX_COUNTER: u32 = (1 << 24) - 1;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Encode the low `6 * length` bits of `value`.
pub fn encode(value: u64, length: usize) -> String {
    (0..length)
        .rev()
        .map(|position| {
            let shift = 6 * position;
            let index = if shift >= 64 { 0 } else { (value >> shift) & 0x3f };
            ALPHABET[index as usize] as char
        })
        .collect()
}

/// Decode a string produced by [`encode`].
pub fn decode(encoded: &str) -> Result<u64> {
    if encoded.len() > 10 {
        return Err(CoreError::InvalidEncoding(format!(
            "{} characters exceed 60 bits",
            encoded.len()
        )));
    }
    encoded.bytes().try_fold(0u64, |acc, byte| {
        let digit = symbol_value(byte).ok_or_else(|| {
            CoreError::InvalidEncoding(format!("symbol {:?} is not in the alphabet", byte as char))
        })?;
        Ok((acc << 6) | digit)
    })
}

fn symbol_value(byte: u8) -> Option<u64> {
    let value = match byte {
        b'-' => 0,
        b'0'..=b'9' => 1 + (byte - b'0'),
        b'A'..=b'Z' => 11 + (byte - b'A'),
        b'_' => 37,
        b'a'..=b'z' => 38 + (byte - b'a'),
        _ => return None,
    };
    Some(u64::from(value))
}

/// 32-bit FNV-1a hash of a string's UTF-8 bytes.
pub fn content_hash(s: &str) -> Hash {
    s.bytes()
        .fold(FNV_OFFSET_BASIS, |hash, byte| (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME))
}

/// Derive the fixed-width client id for a replica from its unique id.
pub fn client_id_from_unique_id(unique_id: &str) -> String {
    let digest = blake3::hash(unique_id.as_bytes());
    let bytes = digest.as_bytes();
    let bits = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) >> 2;
    encode(u64::from(bits), CLIENT_ID_CHARS)
}

/// A random id of `length` alphabet symbols. Never contains a space.
pub fn random_id(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Pack the three HLC fields into a sortable timestamp.
pub fn encode_hlc(logical_time: u64, counter: u32, client_id: &str) -> Timestamp {
    let mut encoded = String::with_capacity(HLC_LENGTH);
    encoded.push_str(&encode(logical_time, LOGICAL_TIME_CHARS));
    encoded.push_str(&encode(u64::from(counter), COUNTER_CHARS));
    encoded.push_str(client_id);
    Timestamp::from_encoded(encoded)
}

/// The three fields of an HLC timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHlc {
    pub logical_time: u64,
    pub counter: u32,
    pub client_id: String,
}

/// Unpack a timestamp produced by [`encode_hlc`].
pub fn decode_hlc(timestamp: &Timestamp) -> Result<DecodedHlc> {
    let s = timestamp.as_str();
    if s.len() != HLC_LENGTH || !s.is_ascii() {
        return Err(CoreError::MalformedTimestamp(s.to_owned()));
    }
    let malformed = |_| CoreError::MalformedTimestamp(s.to_owned());
    let (time, rest) = s.split_at(LOGICAL_TIME_CHARS);
    let (counter, client_id) = rest.split_at(COUNTER_CHARS);
    decode(client_id).map_err(malformed)?;
    Ok(DecodedHlc {
        logical_time: decode(time).map_err(malformed)?,
        counter: decode(counter).map_err(malformed)? as u32,
        client_id: client_id.to_owned(),
    })
}
