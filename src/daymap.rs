//! Per-origin day-map cache (spec.md §4.4): an in-memory mirror of the
//! simple/extended day files that governs which epoch a timestamp belongs
//! to and how many buckets that epoch has.

use std::collections::HashMap;

use tracing::{error, instrument};

use crate::addressing::{extended_day_oid, simple_day_oid};
use crate::error::VaultaireError;
use crate::point::Origin;
use crate::store::ObjectStore;

/// One `(epoch start, bucket count)` entry. Entries are ordered by
/// ascending `start`; the epoch for a timestamp `t` is the entry with the
/// greatest `start <= t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayMapEntry {
    pub start: u64,
    pub bucket_count: u64,
}

/// An ordered day-map plus the byte length it was loaded at — the length
/// doubles as the cache-validity token (invariant 1).
#[derive(Debug, Clone, Default)]
pub struct DayMap {
    pub size: u64,
    pub entries: Vec<DayMapEntry>,
}

impl DayMap {
    /// The bucket count governing timestamp `t`, or `None` if `t` precedes
    /// every entry in the map.
    pub fn bucket_count_for(&self, t: u64) -> Option<u64> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.start <= t)
            .map(|e| e.bucket_count)
    }

    fn decode(bytes: &[u8]) -> Result<Self, VaultaireError> {
        if bytes.len() % 16 != 0 {
            return Err(VaultaireError::CacheInconsistent(format!(
                "day map of {} bytes is not a multiple of 16",
                bytes.len()
            )));
        }
        let entries = bytes
            .chunks_exact(16)
            .map(|chunk| DayMapEntry {
                start: u64::from_le_bytes(chunk[0..8].try_into().unwrap()),
                bucket_count: u64::from_le_bytes(chunk[8..16].try_into().unwrap()),
            })
            .collect();
        Ok(DayMap {
            size: bytes.len() as u64,
            entries,
        })
    }
}

/// Both day maps cached for one origin.
#[derive(Debug, Clone, Default)]
pub struct OriginDays {
    pub simple: DayMap,
    pub extended: DayMap,
}

/// The per-worker cache (spec.md §5: "day_map_cache: per-worker state, no
/// cross-worker sharing required"). Each reader worker owns one of these.
#[derive(Debug, Default)]
pub struct DayMapCache {
    origins: HashMap<Origin, OriginDays>,
}

impl DayMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only access to the cached simple day map, if present.
    pub fn with_simple_day_map<R>(&self, origin: &Origin, f: impl FnOnce(&DayMap) -> R) -> Option<R> {
        self.origins.get(origin).map(|days| f(&days.simple))
    }

    /// Read-only access to the cached extended day map, if present.
    pub fn with_extended_day_map<R>(
        &self,
        origin: &Origin,
        f: impl FnOnce(&DayMap) -> R,
    ) -> Option<R> {
        self.origins.get(origin).map(|days| f(&days.extended))
    }

    /// Refreshes the cache entry for `origin` if absent or expired. On a
    /// transient load failure the cache is left unchanged and the failure
    /// is logged (spec.md §4.4).
    #[instrument(skip(self, store))]
    pub async fn refresh_origin_days<S: ObjectStore>(
        &mut self,
        origin: &Origin,
        store: &S,
    ) -> Result<(), VaultaireError> {
        if self.origins.contains_key(origin) && !self.cache_expired(origin, store).await? {
            return Ok(());
        }
        match load_origin_days(origin, store).await {
            Ok(days) => {
                self.origins.insert(origin.clone(), days);
                Ok(())
            }
            Err(error) => {
                error!(?error, "failed to load day maps, leaving cache unchanged");
                Ok(())
            }
        }
    }

    /// Stats the simple then extended day file against the cached sizes.
    /// Any `stat` error on an *existing* cache entry is fatal — the cache
    /// cannot be trusted if the store is inconsistent (spec.md §4.4, §7).
    pub async fn cache_expired<S: ObjectStore>(
        &self,
        origin: &Origin,
        store: &S,
    ) -> Result<bool, VaultaireError> {
        let Some(days) = self.origins.get(origin) else {
            return Ok(true);
        };

        let simple_stat = store.stat(&simple_day_oid(origin)).await.map_err(|e| {
            VaultaireError::CacheInconsistent(format!(
                "stat of simple day file failed for a cached origin: {e}"
            ))
        })?;
        if simple_stat.size != days.simple.size {
            return Ok(true);
        }

        let extended_stat = store.stat(&extended_day_oid(origin)).await.map_err(|e| {
            VaultaireError::CacheInconsistent(format!(
                "stat of extended day file failed for a cached origin: {e}"
            ))
        })?;
        Ok(extended_stat.size != days.extended.size)
    }
}

async fn load_origin_days<S: ObjectStore>(
    origin: &Origin,
    store: &S,
) -> Result<OriginDays, VaultaireError> {
    let simple_bytes = store.read_full(&simple_day_oid(origin)).await?;
    let extended_bytes = store.read_full(&extended_day_oid(origin)).await?;
    Ok(OriginDays {
        simple: DayMap::decode(&simple_bytes)?,
        extended: DayMap::decode(&extended_bytes)?,
    })
}
