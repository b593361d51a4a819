//! Micro-batch writer.
//!
//! Sits between the event bus and auxiliary sinks (audit log, analytics).
//! The hot-cache mutation and the broadcast callback run synchronously in
//! the bus handler so real-time consumers never wait on a batch; only the
//! auxiliary sink is batched. A flush happens when the buffer reaches
//! `batch_size` or `flush_interval_ms` elapses, whichever comes first, and
//! a failed flush re-prepends the batch for retry.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::cache::store::ByteCache;
use crate::config::BatchWriterConfig;
use crate::core::error::TitanResult;
use crate::events::bus::EventHandler;
use crate::events::schema::{AnyEvent, EventType};

/// Auxiliary sink receiving batched events.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn write_batch(&self, events: &[AnyEvent]) -> TitanResult<()>;

    fn name(&self) -> &str {
        "sink"
    }
}

/// Synchronous broadcast hook invoked once per event, ahead of batching.
/// External bridges (MQTT and similar) implement this.
#[async_trait]
pub trait EventBroadcaster: Send + Sync {
    async fn broadcast(&self, event: &AnyEvent);
}

/// Flush metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchMetrics {
    pub events_received: u64,
    pub events_flushed: u64,
    pub batches_flushed: u64,
    pub flush_errors: u64,
    pub buffer_size: usize,
    pub avg_batch_size: f64,
    pub last_flush_latency: Duration,
}

/// Micro-batching writer between the bus and an auxiliary sink.
pub struct MicroBatchWriter {
    cache: Arc<dyn ByteCache>,
    sink: Arc<dyn BatchSink>,
    broadcaster: Option<Arc<dyn EventBroadcaster>>,
    config: BatchWriterConfig,
    buffer: Mutex<VecDeque<AnyEvent>>,
    metrics: Mutex<BatchMetrics>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl MicroBatchWriter {
    pub fn new(
        cache: Arc<dyn ByteCache>,
        sink: Arc<dyn BatchSink>,
        broadcaster: Option<Arc<dyn EventBroadcaster>>,
        config: BatchWriterConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            sink,
            broadcaster,
            config,
            buffer: Mutex::new(VecDeque::new()),
            metrics: Mutex::new(BatchMetrics::default()),
            flush_task: Mutex::new(None),
        })
    }

    /// Start the periodic flush task. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.flush_task.lock();
        if guard.is_some() {
            return;
        }
        let writer = Arc::clone(self);
        let interval = Duration::from_millis(self.config.flush_interval_ms);
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                writer.flush().await;
            }
        }));
        tracing::info!(
            batch_size = self.config.batch_size,
            flush_interval_ms = self.config.flush_interval_ms,
            "micro-batch writer started"
        );
    }

    /// Stop the flush task and drain the remaining buffer.
    pub async fn stop(&self) {
        let task = self.flush_task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }

        let remaining = self.buffer.lock().len();
        if remaining > 0 {
            tracing::info!(remaining, "draining remaining batched events");
            self.flush().await;
        }
        tracing::info!("micro-batch writer stopped");
    }

    /// Flush the buffered events to the auxiliary sink. A failed flush puts
    /// the batch back at the front of the buffer.
    pub async fn flush(&self) {
        let events: Vec<AnyEvent> = {
            let mut buffer = self.buffer.lock();
            if buffer.is_empty() {
                return;
            }
            buffer.drain(..).collect()
        };

        let batch_size = events.len();
        let start = Instant::now();
        match self.sink.write_batch(&events).await {
            Ok(()) => {
                let latency = start.elapsed();
                let remaining = self.buffer.lock().len();
                let mut metrics = self.metrics.lock();
                metrics.events_flushed += batch_size as u64;
                metrics.batches_flushed += 1;
                metrics.avg_batch_size = metrics.events_flushed as f64 / metrics.batches_flushed as f64;
                metrics.last_flush_latency = latency;
                metrics.buffer_size = remaining;
                tracing::debug!(batch_size, latency_ms = latency.as_millis() as u64, "flushed batch");
            }
            Err(e) => {
                self.metrics.lock().flush_errors += 1;
                tracing::error!(
                    sink = self.sink.name(),
                    batch_size,
                    error = %e,
                    "batch flush failed, re-queueing"
                );
                let mut buffer = self.buffer.lock();
                for event in events.into_iter().rev() {
                    buffer.push_front(event);
                }
            }
        }
    }

    /// Apply the cache consistency rule for one event.
    async fn update_cache(&self, event: &AnyEvent) {
        let result = match event {
            AnyEvent::Aas(e) | AnyEvent::Submodel(e) | AnyEvent::ConceptDescription(e) => {
                match (e.event_type, &e.doc_bytes, &e.etag) {
                    (EventType::Deleted, _, _) => {
                        let deleted = self.cache.delete(e.kind, &e.identifier_b64).await;
                        if matches!(event, AnyEvent::Submodel(_)) {
                            let elements = self
                                .cache
                                .invalidate_submodel_elements(&e.identifier_b64)
                                .await;
                            deleted.and(elements)
                        } else {
                            deleted
                        }
                    }
                    (event_type, Some(bytes), Some(etag)) => {
                        let written = self
                            .cache
                            .set(e.kind, &e.identifier_b64, bytes, etag, None)
                            .await;
                        // A replaced submodel invalidates its cached
                        // element values
                        if matches!(event, AnyEvent::Submodel(_))
                            && event_type == EventType::Updated
                        {
                            let elements = self
                                .cache
                                .invalidate_submodel_elements(&e.identifier_b64)
                                .await;
                            written.and(elements)
                        } else {
                            written
                        }
                    }
                    _ => Ok(()),
                }
            }
            AnyEvent::SubmodelElement(e) => {
                // The containing submodel re-materializes on next read
                let parent = self
                    .cache
                    .delete(crate::core::model::EntityKind::Submodel, &e.submodel_identifier_b64)
                    .await;
                let value = match (e.event_type, &e.value_bytes) {
                    (EventType::Deleted, _) => {
                        self.cache
                            .delete_element_value(&e.submodel_identifier_b64, &e.id_short_path)
                            .await
                    }
                    (_, Some(bytes)) => {
                        self.cache
                            .set_element_value(
                                &e.submodel_identifier_b64,
                                &e.id_short_path,
                                bytes,
                                None,
                            )
                            .await
                    }
                    _ => Ok(()),
                };
                parent.and(value)
            }
            AnyEvent::OperationInvocation(_) => Ok(()),
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "cache update from event failed");
        }
    }
}

#[async_trait]
impl EventHandler for MicroBatchWriter {
    async fn handle(&self, event: &AnyEvent) {
        self.metrics.lock().events_received += 1;

        // Cache first so the next read observes the new bytes
        self.update_cache(event).await;

        // Real-time broadcast never waits on the batch
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast(event).await;
        }

        let (buffered, should_flush) = {
            let mut buffer = self.buffer.lock();
            buffer.push_back(event.clone());
            (buffer.len(), buffer.len() >= self.config.batch_size)
        };
        self.metrics.lock().buffer_size = buffered;
        if should_flush {
            self.flush().await;
        }
    }

    fn name(&self) -> &str {
        "micro-batch-writer"
    }
}

impl MicroBatchWriter {
    pub fn metrics(&self) -> BatchMetrics {
        let mut metrics = *self.metrics.lock();
        metrics.buffer_size = self.buffer.lock().len();
        metrics
    }
}
