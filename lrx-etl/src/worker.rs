//! Normalizer worker pool
//!
//! Each worker pulls independent batches from the durable queue and routes
//! every event by its normalization outcome: success acks, permanent
//! failure dead-letters then acks, transient failure releases the lease
//! for prompt redelivery (or holds it for lease-expiry backoff when the
//! failure is exhaustion-class). A transiently failing event that reaches
//! the delivery attempt cap is dead-lettered instead of cycling forever.
//! One event's failure never blocks its batch siblings. A batch that
//! exceeds the per-batch timeout is abandoned and its unacked leases
//! expire back to the queue.

use crate::dead_letter::DeadLetterStore;
use crate::error::NormalizationResult;
use crate::normalizer::Normalizer;
use crate::queue::{DurableQueue, QueueMessage};
use chrono::Utc;
use lrx_common::db::settings::EtlParams;
use lrx_common::events::{EtlEvent, EventBus};
use sqlx::SqlitePool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Consumer group used by the normalizer workers
pub const NORMALIZER_GROUP: &str = "normalizer";

#[derive(Debug, Default, Clone, Copy)]
pub struct BatchStats {
    pub normalized: usize,
    pub dead_lettered: usize,
    pub requeued: usize,
}

/// One worker loop. Runs until cancelled.
pub async fn run_worker(
    worker_id: usize,
    pool: SqlitePool,
    params: EtlParams,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) {
    let queue = DurableQueue::new(pool.clone());
    let dead_letters = DeadLetterStore::new(pool.clone());
    let normalizer = Normalizer::new(pool, params.identity_cache_capacity);

    let lease = Duration::from_millis(params.batch_timeout_ms);
    let poll_timeout = Duration::from_millis(params.queue_poll_timeout_ms);

    info!(worker_id, "Normalizer worker started");

    loop {
        if cancel_token.is_cancelled() {
            break;
        }

        let batch = tokio::select! {
            received = queue.receive_blocking(
                NORMALIZER_GROUP,
                params.queue_batch_size,
                lease,
                poll_timeout,
            ) => match received {
                Ok(batch) => batch,
                Err(e) => {
                    error!(worker_id, "Queue receive failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            },
            _ = cancel_token.cancelled() => break,
        };

        if batch.is_empty() {
            continue;
        }

        let batch_size = batch.len();
        let timeout = Duration::from_millis(params.batch_timeout_ms);
        match tokio::time::timeout(
            timeout,
            process_batch(
                &queue,
                &normalizer,
                &dead_letters,
                &event_bus,
                batch,
                params.dead_letter_max_attempts,
            ),
        )
        .await
        {
            Ok(stats) => {
                debug!(
                    worker_id,
                    batch_size,
                    normalized = stats.normalized,
                    dead_lettered = stats.dead_lettered,
                    requeued = stats.requeued,
                    "Batch complete"
                );
                event_bus.emit_lossy(EtlEvent::BatchProcessed {
                    worker_id,
                    batch_size,
                    normalized: stats.normalized,
                    dead_lettered: stats.dead_lettered,
                    requeued: stats.requeued,
                    timestamp: Utc::now(),
                });
            }
            Err(_) => {
                // Unacked leases expire on their own; redelivery is safe
                // because normalization is idempotent
                warn!(worker_id, batch_size, "Batch timed out, abandoning leases");
            }
        }
    }

    info!(worker_id, "Normalizer worker stopped");
    event_bus.emit_lossy(EtlEvent::WorkerStopped {
        worker_id,
        timestamp: Utc::now(),
    });
}

/// Process one leased batch; events are independent atomic units
///
/// `max_attempts` caps deliveries per message: a transient failure on the
/// final allowed delivery is dead-lettered and acked so a poison message
/// cannot occupy the queue indefinitely.
pub async fn process_batch(
    queue: &DurableQueue,
    normalizer: &Normalizer,
    dead_letters: &DeadLetterStore,
    event_bus: &EventBus,
    batch: Vec<QueueMessage>,
    max_attempts: u32,
) -> BatchStats {
    let mut stats = BatchStats::default();

    for message in batch {
        let result = normalizer.normalize_payload(&message.body, "queue").await;
        match result {
            NormalizationResult::Normalized { statement_id } => {
                stats.normalized += 1;
                event_bus.emit_lossy(EtlEvent::StatementNormalized {
                    statement_id,
                    timestamp: Utc::now(),
                });
                ack_or_warn(queue, message.message_id).await;
            }
            NormalizationResult::AlreadyNormalized { .. } => {
                // Redelivery no-op still acks: the work is done
                stats.normalized += 1;
                ack_or_warn(queue, message.message_id).await;
            }
            NormalizationResult::PermanentFailure { reason } => {
                stats.dead_lettered += 1;
                if let Err(e) = dead_letters
                    .record(&message.message_key, &reason, Some(&message.body))
                    .await
                {
                    // Keep the lease so the event redelivers rather than
                    // vanishing without a dead-letter record
                    error!("Failed to dead-letter {}: {}", message.message_key, e);
                    continue;
                }
                if let Ok(event_id) = Uuid::parse_str(&message.message_key) {
                    event_bus.emit_lossy(EtlEvent::EventDeadLettered {
                        event_id,
                        reason,
                        timestamp: Utc::now(),
                    });
                }
                ack_or_warn(queue, message.message_id).await;
            }
            NormalizationResult::TransientFailure { reason, backoff } => {
                if message.attempts >= max_attempts as i64 {
                    stats.dead_lettered += 1;
                    let reason = format!("exceeded delivery attempt limit: {}", reason);
                    if let Err(e) = dead_letters
                        .record(&message.message_key, &reason, Some(&message.body))
                        .await
                    {
                        error!("Failed to dead-letter {}: {}", message.message_key, e);
                        continue;
                    }
                    if let Ok(event_id) = Uuid::parse_str(&message.message_key) {
                        event_bus.emit_lossy(EtlEvent::EventDeadLettered {
                            event_id,
                            reason,
                            timestamp: Utc::now(),
                        });
                    }
                    ack_or_warn(queue, message.message_id).await;
                } else if backoff {
                    // Hold the lease; its expiry spaces out the retry
                    // instead of hammering an exhausted pool
                    stats.requeued += 1;
                    debug!(
                        event_id = %message.message_key,
                        "Transient failure, retrying after lease expiry: {}", reason
                    );
                } else {
                    stats.requeued += 1;
                    debug!(
                        event_id = %message.message_key,
                        "Transient failure, releasing for redelivery: {}", reason
                    );
                    if let Err(e) = queue.release(NORMALIZER_GROUP, message.message_id).await {
                        warn!("Failed to release message {}: {}", message.message_id, e);
                    }
                }
            }
        }
    }

    stats
}

async fn ack_or_warn(queue: &DurableQueue, message_id: i64) {
    if let Err(e) = queue.ack(NORMALIZER_GROUP, message_id).await {
        // Lease expiry will redeliver; idempotency absorbs the duplicate
        warn!("Failed to ack message {}: {}", message_id, e);
    }
}

/// Spawn the configured number of workers
pub fn spawn_workers(
    pool: SqlitePool,
    params: &EtlParams,
    event_bus: &EventBus,
    cancel_token: &CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..params.worker_count)
        .map(|worker_id| {
            tokio::spawn(run_worker(
                worker_id,
                pool.clone(),
                params.clone(),
                event_bus.clone(),
                cancel_token.clone(),
            ))
        })
        .collect()
}
