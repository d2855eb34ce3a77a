//! Event types for the NACRE event system
//!
//! Provides the shared event definitions and the EventBus used to publish
//! conversion lifecycle and progress updates to whoever is listening
//! (reporting layers, the CLI progress printer, tests).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// NACRE event types
///
/// Events are broadcast via EventBus and serialize to tagged JSON for transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum NacreEvent {
    /// Conversion job accepted and rows prepared
    ConversionStarted {
        conversion_id: Uuid,
        upload_id: String,
        /// Rows queued for classification (after skipping empty labels)
        total_rows: usize,
        /// Scheduler strategy name ("bounded" or "worker_pool")
        scheduler: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Rows classified and persisted so far
    ConversionProgress {
        conversion_id: Uuid,
        processed: usize,
        total: usize,
        /// Progress percentage (0.0-100.0)
        percentage: f32,
        elapsed_seconds: f64,
        /// Rows per second since start
        rate: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Conversion finished, every prepared row persisted
    ConversionCompleted {
        conversion_id: Uuid,
        processed: usize,
        duration_seconds: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Conversion ended without processing every row
    ConversionFailed {
        conversion_id: Uuid,
        error: String,
        /// Rows persisted before the failure (kept, never rolled back)
        processed: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Embedding index changed state (building, ready, unavailable, failed)
    EmbeddingIndexStatusChanged {
        state: String,
        total: usize,
        done: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl NacreEvent {
    /// Event type name as used in the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            NacreEvent::ConversionStarted { .. } => "ConversionStarted",
            NacreEvent::ConversionProgress { .. } => "ConversionProgress",
            NacreEvent::ConversionCompleted { .. } => "ConversionCompleted",
            NacreEvent::ConversionFailed { .. } => "ConversionFailed",
            NacreEvent::EmbeddingIndexStatusChanged { .. } => "EmbeddingIndexStatusChanged",
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagging subscribers lose the oldest events instead of stalling the pipeline
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NacreEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use nacre_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<NacreEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: NacreEvent,
    ) -> Result<usize, broadcast::error::SendError<NacreEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the absence of subscribers
    ///
    /// Used for progress updates, which are useless once nobody listens.
    pub fn emit_lossy(&self, event: NacreEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
