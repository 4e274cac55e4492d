//! Vaultaire reader daemon: answers point and contents queries against a
//! compressed, bucketed time-series point store backed by a distributed
//! object store (spec.md §1-2).

/// Object key derivation: time-marks, bucket/day-map/contents object IDs
/// (spec.md §4.3).
pub mod addressing;
/// Command-line interface (spec.md §6).
pub mod cli;
/// Configuration loading (spec.md §6, SPEC_FULL.md A.3).
pub mod config;
/// Contents worker: single-threaded source-dict enumeration (spec.md §4.7).
pub mod contents;
/// Per-origin day-map cache (spec.md §4.4).
pub mod daymap;
/// The `BENHUR` synthetic-data path, gated behind the `demo-origin`
/// feature (spec.md §9, scenario S3).
#[cfg(feature = "demo-origin")]
pub mod demo;
/// The in-memory per-origin contents directory (spec.md §3, §4.7).
pub mod directory;
/// On-disk bucket codec: the bit-packed prefix and LZ4-compressed,
/// length-framed point records (spec.md §4.2).
pub mod disk;
/// The crate-wide error type.
pub mod error;
/// Logging setup (SPEC_FULL.md A.1).
pub mod logging;
/// The shared data model: origins, source dicts, addresses and points
/// (spec.md §3).
pub mod point;
/// Router I/O: the linked tasks owning the query/contents/telemetry
/// sockets (spec.md §4.8).
pub mod router;
/// Thread-safe object-store façade (spec.md §4.5).
pub mod store;
/// Process lifecycle and linked-task supervision (spec.md §4.8, §9).
pub mod supervisor;
/// The client-facing wire codec (spec.md §4.1).
pub mod wire;
/// Reader workers: the point-query request handlers (spec.md §4.6).
pub mod workers;

#[cfg(test)]
mod tests;
