//! Offline-queue drain after a successful connect.

use std::rc::Rc;
use std::time::Duration;

use tether_core::{KeyValueStore, Providers, TimeProvider};

use super::link::LinkWriter;
use super::shared::Shared;
use crate::error::TransportError;
use crate::events::{ClientEvent, DrainSummary, DropReason};
use crate::offline::QueueEntry;
use crate::state::StateConsumer;

/// Outcome of writing one queued entry.
enum Attempt {
    Sent,
    Failed(String),
    LinkGone,
}

/// Send every queued entry over `writer`.
///
/// The queue is snapshotted and emptied up front, expired entries are
/// reported, and the rest go out in priority-then-age order, `batch_size`
/// at a time, each bounded by the send timeout and followed by a short
/// pause. A failed entry goes back with its retry count bumped, or is
/// discarded once it has used up its retries. If the link goes away
/// mid-drain the unattempted remainder is put back unchanged.
pub(crate) async fn drain_queue<P, S, C>(shared: Rc<Shared<P, S, C>>, writer: LinkWriter) -> DrainSummary
where
    P: Providers,
    S: KeyValueStore,
    C: StateConsumer,
{
    let config = &shared.config;
    let time = shared.providers.time().clone();

    let (entries, expired) = shared.queue.take_for_drain(shared.now_ms()).await;
    if !expired.is_empty() {
        tracing::warn!("Discarding {} expired offline messages", expired.len());
        shared.metrics.borrow_mut().record_messages_expired(expired.len());
        for entry in expired {
            shared.report_dropped(entry, DropReason::Expired);
        }
    }

    let total = entries.len();
    if total > 0 {
        tracing::info!("Draining {} offline messages", total);
    }

    let mut summary = DrainSummary::default();
    let mut remaining = entries.into_iter();
    let mut batch_number = 0usize;

    'drain: loop {
        let batch: Vec<QueueEntry> = remaining.by_ref().take(config.drain_batch_size).collect();
        if batch.is_empty() {
            break;
        }
        batch_number += 1;
        tracing::debug!("Drain batch {} ({} entries)", batch_number, batch.len());

        let mut batch = batch.into_iter();
        while let Some(entry) = batch.next() {
            match send_entry(&time, &writer, &entry, config.drain_send_timeout).await {
                Attempt::Sent => {
                    summary.sent += 1;
                    shared.metrics.borrow_mut().record_message_sent();
                }
                Attempt::Failed(reason) => {
                    summary.failed += 1;
                    retry_or_discard(&shared, entry, &reason).await;
                }
                Attempt::LinkGone => {
                    let unattempted: Vec<QueueEntry> = std::iter::once(entry)
                        .chain(batch)
                        .chain(remaining)
                        .collect();
                    tracing::info!(
                        "Link lost mid-drain, returning {} messages to the queue",
                        unattempted.len()
                    );
                    for outcome in shared.queue.requeue_all(unattempted).await {
                        shared.note_eviction(outcome);
                    }
                    break 'drain;
                }
            }

            if config.drain_message_delay > Duration::ZERO
                && time.sleep(config.drain_message_delay).await.is_err()
            {
                break 'drain;
            }
        }
    }

    summary.remaining = shared.queue.len();
    if total > 0 || summary.remaining > 0 {
        tracing::info!(
            "Drain finished: {} sent, {} failed, {} remaining",
            summary.sent,
            summary.failed,
            summary.remaining
        );
    }
    shared.publish(ClientEvent::QueueDrained(summary));
    summary
}

async fn send_entry<T: TimeProvider>(
    time: &T,
    writer: &LinkWriter,
    entry: &QueueEntry,
    timeout: Duration,
) -> Attempt {
    let text = match entry.message.encode() {
        Ok(text) => text,
        Err(e) => return Attempt::Failed(format!("encode failed: {}", e)),
    };
    match time.timeout(timeout, writer.write(text)).await {
        Ok(Ok(())) => Attempt::Sent,
        Ok(Err(TransportError::Closed)) => Attempt::LinkGone,
        Ok(Err(e)) => Attempt::Failed(e.to_string()),
        Err(_) => Attempt::Failed(format!("timed out after {:?}", timeout)),
    }
}

async fn retry_or_discard<P, S, C>(shared: &Shared<P, S, C>, mut entry: QueueEntry, reason: &str)
where
    P: Providers,
    S: KeyValueStore,
    C: StateConsumer,
{
    if entry.retry_count >= shared.config.max_send_retries {
        tracing::warn!(
            "Discarding {} after {} failed retries (last error: {})",
            entry.dedup_key,
            entry.retry_count,
            reason
        );
        shared.metrics.borrow_mut().record_retry_exhausted();
        shared.report_dropped(entry, DropReason::RetriesExhausted);
        return;
    }

    entry.retry_count += 1;
    tracing::debug!(
        "Send of {} failed ({}), requeued with retry count {}",
        entry.dedup_key,
        reason,
        entry.retry_count
    );
    let outcome = shared.queue.requeue(entry).await;
    shared.note_eviction(outcome);
}
