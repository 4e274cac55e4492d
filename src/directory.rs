//! The per-origin contents directory (spec.md §3, §4.7): a cache of which
//! source dicts exist for an origin, refreshed on demand from the
//! `02_<origin>_contents` object and consulted only by the contents
//! worker, which is why it needs no internal locking of its own — the
//! worker is single-threaded and the spec-level exclusive lock guards the
//! store-side object, not this in-memory mirror.

use std::collections::{HashMap, HashSet};

use crate::addressing::contents_oid;
use crate::error::VaultaireError;
use crate::point::{Origin, SourceDict};
use crate::store::ObjectStore;

/// The source dicts known for one origin.
#[derive(Debug, Clone, Default)]
pub struct OriginContents {
    sources: HashSet<Vec<u8>>,
    dicts: Vec<SourceDict>,
}

/// The in-memory directory: one `OriginContents` per origin, the single
/// shared state the contents worker mutates (spec.md §5).
#[derive(Debug, Default)]
pub struct Directory {
    origins: HashMap<Origin, OriginContents>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `02_<origin>_contents`, merges newly-seen source dicts into
    /// the cache, and returns every dict currently known for `origin`.
    pub async fn refresh_and_list<S: ObjectStore>(
        &mut self,
        origin: &Origin,
        store: &S,
    ) -> Result<Vec<SourceDict>, VaultaireError> {
        let bytes = store.read_full(&contents_oid(origin)).await?;
        let dicts = crate::wire::decode_source_response_burst(&bytes)?;

        let entry = self.origins.entry(origin.clone()).or_default();
        for dict in dicts {
            let key = fingerprint_key(&dict);
            if entry.sources.insert(key) {
                entry.dicts.push(dict);
            }
        }
        Ok(entry.dicts.clone())
    }

    /// Directly seeds the directory with a synthetic entry, bypassing the
    /// store — used for the demo origin (spec.md §4.7, §9).
    pub fn seed(&mut self, origin: &Origin, dicts: Vec<SourceDict>) -> Vec<SourceDict> {
        let entry = self.origins.entry(origin.clone()).or_default();
        for dict in dicts {
            let key = fingerprint_key(&dict);
            if entry.sources.insert(key) {
                entry.dicts.push(dict);
            }
        }
        entry.dicts.clone()
    }
}

fn fingerprint_key(dict: &SourceDict) -> Vec<u8> {
    dict.address().0.to_le_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake::FakeStore;

    #[tokio::test]
    async fn refresh_merges_new_sources_without_duplicating() {
        let origin: Origin = b"arithmetic".to_vec();
        let dicts = vec![
            SourceDict::from_pairs([("wave", "sine")]),
            SourceDict::from_pairs([("wave", "cosine")]),
        ];
        let store = FakeStore::new();
        store.put(
            contents_oid(&origin),
            crate::wire::encode_source_response_burst(&dicts).to_vec(),
        );

        let mut directory = Directory::new();
        let first = directory.refresh_and_list(&origin, &store).await.unwrap();
        assert_eq!(first.len(), 2);

        let second = directory.refresh_and_list(&origin, &store).await.unwrap();
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn seed_deduplicates_against_existing_entries() {
        let origin: Origin = b"BENHUR".to_vec();
        let mut directory = Directory::new();
        let first = directory.seed(&origin, vec![SourceDict::from_pairs([("wave", "sine")])]);
        assert_eq!(first.len(), 1);
        let second = directory.seed(&origin, vec![SourceDict::from_pairs([("wave", "sine")])]);
        assert_eq!(second.len(), 1);
    }
}
