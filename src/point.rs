//! The data model shared by every codec and worker: origins, source dicts,
//! addresses and the points that flow between the wire and disk codecs.

use std::collections::BTreeMap;

use siphasher::sip::SipHasher13;
use std::hash::{Hash, Hasher};

/// A fixed key so `Address` is stable across process restarts. Matches no
/// external system; it only needs to be consistent within this daemon.
const ADDRESS_HASH_KEY: (u64, u64) = (0x7661_756c_7461_6972, 0x6565_5f61_6464_7273);

/// Opaque tenant/namespace identifier, prefixing every object key.
pub type Origin = Vec<u8>;

/// The tag set identifying a metric series. Canonical order is
/// lexicographic by key; the `Address` derived from it MUST NOT depend on
/// insertion order (invariant 3, testable property 2).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceDict {
    tags: BTreeMap<String, String>,
}

impl SourceDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(field.into(), value.into());
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut dict = Self::new();
        for (k, v) in pairs {
            dict.insert(k, v);
        }
        dict
    }

    /// Lexicographic-by-key iteration order, the canonical order used for
    /// both hashing and wire encoding.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.tags.get(field).map(|s| s.as_str())
    }

    /// The 64-bit fingerprint of this source dict. Order-invariant: the
    /// `BTreeMap` already canonicalizes key order before hashing, so two
    /// dicts built from the same key/value pairs in any order produce the
    /// same `Address` (testable property 2 / scenario S2).
    pub fn address(&self) -> Address {
        let mut hasher = SipHasher13::new_with_keys(ADDRESS_HASH_KEY.0, ADDRESS_HASH_KEY.1);
        for (k, v) in self.iter() {
            k.hash(&mut hasher);
            0u8.hash(&mut hasher); // separator so ("ab","c") != ("a","bc")
            v.hash(&mut hasher);
            1u8.hash(&mut hasher);
        }
        Address(hasher.finish())
    }
}

/// A 64-bit stable fingerprint of a `SourceDict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub u64);

impl Address {
    /// `address mod bucket_count`, used to place a point into a bucket.
    pub fn bucket_index(&self, bucket_count: u64) -> u64 {
        if bucket_count == 0 {
            0
        } else {
            self.0 % bucket_count
        }
    }
}

/// The tagged union carried by a point's payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Numeric(i64),
    Measurement(f64),
    Textual(String),
    Blob(Vec<u8>),
}

impl Payload {
    /// Whether this payload needs the extended (variable-width) day map
    /// and bucket object, vs. the simple (fixed-width numeric) one.
    pub fn is_extended(&self) -> bool {
        matches!(self, Payload::Textual(_) | Payload::Blob(_))
    }
}

/// A single metric sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub origin: Origin,
    pub source: SourceDict,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: u64,
    pub payload: Payload,
}

impl Point {
    pub fn address(&self) -> Address {
        self.source.address()
    }
}
