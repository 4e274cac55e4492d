//! Reader workers (spec.md §4.6): the `W` concurrent handlers that answer
//! point queries by walking the bucket addressing scheme against the
//! object store.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{instrument, warn};

use crate::addressing::{self, BucketKind};
use crate::daymap::DayMapCache;
#[cfg(feature = "demo-origin")]
use crate::demo;
use crate::disk;
use crate::error::VaultaireError;
use crate::point::{Address, Origin};
use crate::store::ObjectStore;
use crate::wire::{self, Request};

/// The raw 4-tuple the router hands to a reader worker. Frame-count
/// validation already happened at ingress (spec.md §4.6 step 1).
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub broker_env: Vec<u8>,
    pub client_env: Vec<u8>,
    pub origin: Origin,
    pub request_bytes: Vec<u8>,
}

/// A reply destined for the outbound pump: `[broker_env, client_env, payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub broker_env: Vec<u8>,
    pub client_env: Vec<u8>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryEvent {
    pub key: String,
    pub value: String,
    pub unit: String,
}

impl TelemetryEvent {
    fn error(message: impl Into<String>) -> Self {
        TelemetryEvent {
            key: "error".into(),
            value: message.into(),
            unit: String::new(),
        }
    }

    fn duration(seconds: f64) -> Self {
        TelemetryEvent {
            key: "duration".into(),
            value: format!("{seconds:9.3}"),
            unit: "seconds".into(),
        }
    }
}

/// Runs one reader worker to completion: consumes `inbound` until the
/// channel closes (the supervisor's shutdown signal), fetching, filtering
/// and replying to each message as it arrives. Returns on the first
/// unrecoverable error — the caller links this into the failure-
/// containment boundary (spec.md §4.8).
pub async fn run<S: ObjectStore>(
    store: Arc<S>,
    mut inbound: mpsc::Receiver<InboundMessage>,
    outbound: mpsc::UnboundedSender<Reply>,
    telemetry: mpsc::UnboundedSender<TelemetryEvent>,
) -> Result<(), VaultaireError> {
    let mut day_cache = DayMapCache::new();
    while let Some(message) = inbound.recv().await {
        handle_message(&store, &mut day_cache, message, &outbound, &telemetry).await?;
    }
    Ok(())
}

/// As `run`, but for the `W`-worker pool sharing a single inbound queue
/// (spec.md §5: `inbound` is a single-slot hand-off channel with one
/// producer and *a* consumer — tokio's mpsc only allows one receiver, so
/// the pool wraps it in a mutex and each worker takes the lock only long
/// enough to pull the next message).
pub async fn run_shared<S: ObjectStore>(
    store: Arc<S>,
    inbound: Arc<tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>>,
    outbound: mpsc::UnboundedSender<Reply>,
    telemetry: mpsc::UnboundedSender<TelemetryEvent>,
) -> Result<(), VaultaireError> {
    let mut day_cache = DayMapCache::new();
    loop {
        let message = {
            let mut guard = inbound.lock().await;
            guard.recv().await
        };
        let Some(message) = message else {
            return Ok(());
        };
        handle_message(&store, &mut day_cache, message, &outbound, &telemetry).await?;
    }
}

#[instrument(skip(store, day_cache, outbound, telemetry, message), fields(origin = %String::from_utf8_lossy(&message.origin)))]
async fn handle_message<S: ObjectStore>(
    store: &S,
    day_cache: &mut DayMapCache,
    message: InboundMessage,
    outbound: &mpsc::UnboundedSender<Reply>,
    telemetry: &mpsc::UnboundedSender<TelemetryEvent>,
) -> Result<(), VaultaireError> {
    let start = Instant::now();

    match wire::decode_request_multi(&message.origin, &message.request_bytes) {
        Err(error) => {
            telemetry.send(TelemetryEvent::error(error.to_string()))?;
            outbound.send(Reply {
                broker_env: message.broker_env.clone(),
                client_env: message.client_env.clone(),
                payload: Vec::new(),
            })?;
        }
        Ok(requests) => {
            for request in requests {
                process_one_request(
                    store,
                    day_cache,
                    &message.origin,
                    &request,
                    &message.broker_env,
                    &message.client_env,
                    outbound,
                )
                .await?;
            }
            // end-of-burst: exactly one empty-payload reply closes the request
            outbound.send(Reply {
                broker_env: message.broker_env.clone(),
                client_env: message.client_env.clone(),
                payload: Vec::new(),
            })?;
        }
    }

    // Preserves the original's per-message (not per-request) duration
    // telemetry placement — see the open question in DESIGN.md.
    telemetry.send(TelemetryEvent::duration(start.elapsed().as_secs_f64()))?;
    Ok(())
}

async fn process_one_request<S: ObjectStore>(
    store: &S,
    day_cache: &mut DayMapCache,
    origin: &Origin,
    request: &Request,
    broker_env: &[u8],
    client_env: &[u8],
    outbound: &mpsc::UnboundedSender<Reply>,
) -> Result<(), VaultaireError> {
    #[cfg(feature = "demo-origin")]
    if demo::is_demo_origin(origin) {
        let points = demo::generate(request.t_alpha, request.t_omega);
        if !points.is_empty() {
            send_points(&points, broker_env, client_env, outbound)?;
        }
        return Ok(());
    }

    day_cache.refresh_origin_days(origin, store).await?;
    let address = Address(request.source_fingerprint);

    for mark in addressing::calculate_timemarks(request.t_alpha, request.t_omega) {
        for kind in [BucketKind::Simple, BucketKind::Extended] {
            let bucket_count = match kind {
                BucketKind::Simple => day_cache
                    .with_simple_day_map(origin, |m| m.bucket_count_for(mark.epoch))
                    .flatten(),
                BucketKind::Extended => day_cache
                    .with_extended_day_map(origin, |m| m.bucket_count_for(mark.epoch))
                    .flatten(),
            };
            let Some(bucket_count) = bucket_count else {
                continue; // no day map coverage for this epoch yet: skip silently
            };
            let bucket_index = address.bucket_index(bucket_count);
            let oid = addressing::bucket_oid(origin, mark.epoch, bucket_index, kind);

            let bytes = match store.read_full(&oid).await {
                Ok(bytes) => bytes,
                Err(error) => {
                    warn!(oid, %error, "transient store error reading bucket, skipping");
                    continue;
                }
            };
            let points = match disk::decode_points(origin, &bytes) {
                Ok(points) => points,
                Err(error) => {
                    warn!(oid, %error, "bucket object failed to decode, skipping");
                    continue;
                }
            };
            let filtered: Vec<_> = points
                .into_iter()
                .filter(|p| p.timestamp >= request.t_alpha && p.timestamp <= request.t_omega)
                .collect();
            if filtered.is_empty() {
                continue;
            }
            send_points(&filtered, broker_env, client_env, outbound)?;
        }
    }
    Ok(())
}

fn send_points(
    points: &[crate::point::Point],
    broker_env: &[u8],
    client_env: &[u8],
    outbound: &mpsc::UnboundedSender<Reply>,
) -> Result<(), VaultaireError> {
    let encoded = wire::encode_points(points);
    let payload = disk::lz4_compress(&encoded).unwrap_or_default();
    outbound.send(Reply {
        broker_env: broker_env.to_vec(),
        client_env: client_env.to_vec(),
        payload,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::{Payload, SourceDict};
    use crate::store::fake::FakeStore;

    fn day_map_bytes(entries: &[(u64, u64)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (start, count) in entries {
            out.extend_from_slice(&start.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
        }
        out
    }

    #[tokio::test]
    #[cfg(feature = "demo-origin")]
    async fn demo_origin_request_produces_a_non_empty_reply_then_end_of_burst() {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (telemetry_tx, _telemetry_rx) = mpsc::unbounded_channel();
        let store = Arc::new(FakeStore::new());
        let mut day_cache = DayMapCache::new();

        let message = InboundMessage {
            broker_env: b"broker".to_vec(),
            client_env: b"client".to_vec(),
            origin: demo::DEMO_ORIGIN.to_vec(),
            request_bytes: wire::encode_requests(&[Request {
                source_fingerprint: 0,
                t_alpha: 0,
                t_omega: 20_000_000_000,
            }])
            .to_vec(),
        };

        handle_message(&*store, &mut day_cache, message, &outbound_tx, &telemetry_tx)
            .await
            .unwrap();

        let data_reply = outbound_rx.recv().await.expect("a data reply");
        assert!(!data_reply.payload.is_empty());
        let eob_reply = outbound_rx.recv().await.expect("end-of-burst reply");
        assert!(eob_reply.payload.is_empty());
    }

    #[tokio::test]
    async fn malformed_request_bytes_emit_error_telemetry_and_an_empty_reply() {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (telemetry_tx, mut telemetry_rx) = mpsc::unbounded_channel();
        let store = Arc::new(FakeStore::new());
        let mut day_cache = DayMapCache::new();

        let message = InboundMessage {
            broker_env: b"broker".to_vec(),
            client_env: b"client".to_vec(),
            origin: b"arithmetic".to_vec(),
            request_bytes: vec![0xFF; 10],
        };

        handle_message(&*store, &mut day_cache, message, &outbound_tx, &telemetry_tx)
            .await
            .unwrap();

        let reply = outbound_rx.recv().await.expect("an end-of-burst reply");
        assert!(reply.payload.is_empty());

        let mut saw_error = false;
        let mut saw_duration = false;
        while let Ok(event) = telemetry_rx.try_recv() {
            saw_error |= event.key == "error";
            saw_duration |= event.key == "duration";
        }
        assert!(saw_error);
        assert!(saw_duration);
    }

    #[tokio::test]
    async fn real_origin_request_reads_the_addressed_bucket_and_filters_by_range() {
        let origin: Origin = b"arithmetic".to_vec();
        let store = Arc::new(FakeStore::new());
        store.put(
            addressing::simple_day_oid(&origin),
            day_map_bytes(&[(0, 1)]),
        );
        store.put(
            addressing::extended_day_oid(&origin),
            day_map_bytes(&[(0, 1)]),
        );

        let in_range = crate::point::Point {
            origin: origin.clone(),
            source: SourceDict::from_pairs([("wave", "sine")]),
            timestamp: 500,
            payload: Payload::Measurement(1.0),
        };
        let out_of_range = crate::point::Point {
            origin: origin.clone(),
            source: SourceDict::from_pairs([("wave", "sine")]),
            timestamp: 5_000_000,
            payload: Payload::Measurement(2.0),
        };
        let bucket_bytes = disk::encode_points(&[in_range.clone(), out_of_range]).unwrap();
        let oid = addressing::bucket_oid(&origin, 0, 0, BucketKind::Simple);
        store.put(oid, bucket_bytes);

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (telemetry_tx, _telemetry_rx) = mpsc::unbounded_channel();
        let mut day_cache = DayMapCache::new();

        let request = Request {
            source_fingerprint: in_range.address().0,
            t_alpha: 0,
            t_omega: 1000,
        };
        process_one_request(
            &*store,
            &mut day_cache,
            &origin,
            &request,
            b"broker",
            b"client",
            &outbound_tx,
        )
        .await
        .unwrap();

        let reply = outbound_rx.try_recv().expect("a data reply");
        let decompressed = disk::lz4_decompress(&reply.payload).unwrap();
        let points = wire::decode_points(&origin, &decompressed).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].timestamp, 500);
    }
}
