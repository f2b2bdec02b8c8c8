//! Golden test vectors for deterministic verification.
//!
//! Timestamps travel between replicas as strings and their hashes are XORed
//! into every ancestor, so every implementation must encode and hash them
//! identically.

use synclets_core::codec::{content_hash, encode, encode_hlc};

/// A sortable-encoding vector.
#[derive(Debug, Clone)]
pub struct EncodingVector {
    pub value: u64,
    pub length: usize,
    pub expected: &'static str,
}

/// An HLC vector: fields in, timestamp and its hash out.
#[derive(Debug, Clone)]
pub struct HlcVector {
    pub name: &'static str,
    pub logical_time: u64,
    pub counter: u32,
    pub client_id: &'static str,
    pub expected: &'static str,
    pub expected_hash: u32,
}

/// A content-hash vector.
#[derive(Debug, Clone)]
pub struct HashVector {
    pub input: &'static str,
    pub expected: u32,
}

pub fn encoding_vectors() -> Vec<EncodingVector> {
    vec![
        EncodingVector { value: 0, length: 3, expected: "---" },
        EncodingVector { value: 1, length: 3, expected: "--0" },
        EncodingVector { value: 63, length: 2, expected: "-z" },
        EncodingVector { value: 64, length: 2, expected: "0-" },
        EncodingVector { value: 1_700_000_000_000, length: 7, expected: "NjEtLV-" },
        EncodingVector { value: (1 << 42) - 1, length: 7, expected: "zzzzzzz" },
    ]
}

pub fn hlc_vectors() -> Vec<HlcVector> {
    vec![
        HlcVector {
            name: "all zero",
            logical_time: 0,
            counter: 0,
            client_id: "-----",
            expected: "----------------",
            expected_hash: 0xca0e_6055,
        },
        HlcVector {
            name: "plain write",
            logical_time: 1_700_000_000_000,
            counter: 0,
            client_id: "abcde",
            expected: "NjEtLV-----abcde",
            expected_hash: 0x2d83_1388,
        },
        HlcVector {
            name: "same millisecond",
            logical_time: 1_700_000_000_000,
            counter: 5,
            client_id: "zzzzz",
            expected: "NjEtLV----4zzzzz",
            expected_hash: 0x62b2_90b8,
        },
        HlcVector {
            name: "saturated fields",
            logical_time: (1 << 42) - 1,
            counter: (1 << 24) - 1,
            client_id: "-0-0-",
            expected: "zzzzzzzzzzz-0-0-",
            expected_hash: 0x2f7d_3838,
        },
        HlcVector {
            name: "mixed",
            logical_time: 1_234_567_890,
            counter: 42,
            client_id: "Q_q9x",
            expected: "-08_VAH---eQ_q9x",
            expected_hash: 0xc4cd_49ca,
        },
    ]
}

pub fn hash_vectors() -> Vec<HashVector> {
    vec![
        HashVector { input: "", expected: 0x811c_9dc5 },
        HashVector { input: "a", expected: 0xe40c_292c },
        HashVector { input: "foobar", expected: 0xbf9c_f968 },
        HashVector { input: "hello", expected: 0x4f9f_2cab },
        HashVector { input: "\u{FFFC}", expected: 0x0447_9ddd },
    ]
}

/// Check every vector. Returns a description of each failure.
pub fn verify_all_vectors() -> Vec<String> {
    let mut failures = Vec::new();
    for v in encoding_vectors() {
        let actual = encode(v.value, v.length);
        if actual != v.expected {
            failures.push(format!("encode({}, {}) = {:?}, want {:?}", v.value, v.length, actual, v.expected));
        }
    }
    for v in hlc_vectors() {
        let ts = encode_hlc(v.logical_time, v.counter, v.client_id);
        if ts.as_str() != v.expected {
            failures.push(format!("{}: {:?}, want {:?}", v.name, ts.as_str(), v.expected));
        }
        if ts.content_hash() != v.expected_hash {
            failures.push(format!("{}: hash {:#010x}, want {:#010x}", v.name, ts.content_hash(), v.expected_hash));
        }
    }
    for v in hash_vectors() {
        let actual = content_hash(v.input);
        if actual != v.expected {
            failures.push(format!("hash({:?}) = {:#010x}, want {:#010x}", v.input, actual, v.expected));
        }
    }
    failures
}
