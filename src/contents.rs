//! The contents worker (spec.md §4.7): a single long-running task
//! answering "what source dicts exist for this origin" queries against
//! the shared directory cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::instrument;

#[cfg(feature = "demo-origin")]
use crate::demo;
use crate::directory::Directory;
use crate::error::VaultaireError;
use crate::point::Origin;
use crate::store::ObjectStore;
use crate::wire;

/// The raw 4-tuple a contents message arrives as; frame 3 is ignored,
/// frame 4 carries the origin (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct ContentsInboundMessage {
    pub broker_env: Vec<u8>,
    pub client_env: Vec<u8>,
    pub origin: Origin,
}

/// `[broker_env, client_env, "", payload]` (spec.md §4.7, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentsReply {
    pub broker_env: Vec<u8>,
    pub client_env: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Runs the contents worker to completion. Single-threaded by design: the
/// directory map has one writer, so there is nothing to gain from
/// concurrency here (spec.md §4.7 rationale). `lock_timeout` bounds how
/// long a real-origin directory refresh may hold the store's exclusive
/// lock before the watchdog in `store::with_exclusive_lock` fires.
pub async fn run<S: ObjectStore>(
    store: Arc<S>,
    directory: Arc<Mutex<Directory>>,
    mut inbound: mpsc::Receiver<ContentsInboundMessage>,
    outbound: mpsc::UnboundedSender<ContentsReply>,
    lock_timeout: Duration,
) -> Result<(), VaultaireError> {
    while let Some(message) = inbound.recv().await {
        handle_message(&store, &directory, message, &outbound, lock_timeout).await?;
    }
    Ok(())
}

#[instrument(skip(store, directory, outbound, message), fields(origin = %String::from_utf8_lossy(&message.origin)))]
async fn handle_message<S: ObjectStore>(
    store: &S,
    directory: &Arc<Mutex<Directory>>,
    message: ContentsInboundMessage,
    outbound: &mpsc::UnboundedSender<ContentsReply>,
    lock_timeout: Duration,
) -> Result<(), VaultaireError> {
    let mut directory = directory.lock().await;
    let sources = list_sources(&mut directory, &message.origin, store, lock_timeout).await?;
    drop(directory);

    let payload = wire::encode_source_response_burst(&sources).to_vec();
    outbound.send(ContentsReply {
        broker_env: message.broker_env,
        client_env: message.client_env,
        payload,
    })?;
    Ok(())
}

/// Looks up the source dicts known for `origin`: the `BENHUR` short-circuit
/// when the `demo-origin` feature is on (spec.md §4.7, §9), otherwise a
/// store-backed refresh-and-list under the directory's exclusive lock
/// (spec.md §4.5: the contents object has a single writer).
#[cfg(feature = "demo-origin")]
async fn list_sources<S: ObjectStore>(
    directory: &mut Directory,
    origin: &Origin,
    store: &S,
    lock_timeout: Duration,
) -> Result<Vec<crate::point::SourceDict>, VaultaireError> {
    if demo::is_demo_origin(origin) {
        return Ok(directory.seed(origin, demo::contents()));
    }
    refresh_under_lock(directory, origin, store, lock_timeout).await
}

#[cfg(not(feature = "demo-origin"))]
async fn list_sources<S: ObjectStore>(
    directory: &mut Directory,
    origin: &Origin,
    store: &S,
    lock_timeout: Duration,
) -> Result<Vec<crate::point::SourceDict>, VaultaireError> {
    refresh_under_lock(directory, origin, store, lock_timeout).await
}

async fn refresh_under_lock<S: ObjectStore>(
    directory: &mut Directory,
    origin: &Origin,
    store: &S,
    lock_timeout: Duration,
) -> Result<Vec<crate::point::SourceDict>, VaultaireError> {
    let oid = crate::addressing::contents_oid(origin);
    crate::store::with_exclusive_lock(store, &oid, lock_timeout, || async {
        directory.refresh_and_list(origin, store).await
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake::FakeStore;

    #[tokio::test]
    #[cfg(feature = "demo-origin")]
    async fn demo_origin_returns_the_single_sine_entry() {
        let store = Arc::new(FakeStore::new());
        let directory = Arc::new(Mutex::new(Directory::new()));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

        handle_message(
            &*store,
            &directory,
            ContentsInboundMessage {
                broker_env: b"broker".to_vec(),
                client_env: b"client".to_vec(),
                origin: demo::DEMO_ORIGIN.to_vec(),
            },
            &outbound_tx,
            crate::store::LOCK_TIMEOUT,
        )
        .await
        .unwrap();

        let reply = outbound_rx.try_recv().unwrap();
        let sources = wire::decode_source_response_burst(&reply.payload).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].get("wave"), Some("sine"));
    }

    #[tokio::test]
    async fn real_origin_reads_and_merges_the_contents_object() {
        let origin: Origin = b"arithmetic".to_vec();
        let dicts = vec![crate::point::SourceDict::from_pairs([("wave", "cosine")])];
        let store = Arc::new(FakeStore::new());
        store.put(
            crate::addressing::contents_oid(&origin),
            wire::encode_source_response_burst(&dicts).to_vec(),
        );
        let directory = Arc::new(Mutex::new(Directory::new()));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

        handle_message(
            &*store,
            &directory,
            ContentsInboundMessage {
                broker_env: b"broker".to_vec(),
                client_env: b"client".to_vec(),
                origin,
            },
            &outbound_tx,
            crate::store::LOCK_TIMEOUT,
        )
        .await
        .unwrap();

        let reply = outbound_rx.try_recv().unwrap();
        let sources = wire::decode_source_response_burst(&reply.payload).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].get("wave"), Some("cosine"));
    }
}
