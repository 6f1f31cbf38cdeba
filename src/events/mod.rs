use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::SpkStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Dropping lifecycle event");
        }
    }
}

/// Lifecycle notifications emitted after SPK writes commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    SpkCreated {
        id: Uuid,
        spk_number: String,
        at: DateTime<Utc>,
    },
    SpkUpdated {
        id: Uuid,
        spk_number: String,
        at: DateTime<Utc>,
    },
    SpkStatusChanged {
        id: Uuid,
        spk_number: String,
        old_status: SpkStatus,
        new_status: SpkStatus,
    },
    SpkFinished {
        id: Uuid,
        spk_number: String,
    },
    SpkDeleted {
        id: Uuid,
        spk_number: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::SpkCreated { .. } => "spk.created",
            Event::SpkUpdated { .. } => "spk.updated",
            Event::SpkStatusChanged { .. } => "spk.status_changed",
            Event::SpkFinished { .. } => "spk.finished",
            Event::SpkDeleted { .. } => "spk.deleted",
        }
    }

    pub fn spk_id(&self) -> Uuid {
        match self {
            Event::SpkCreated { id, .. }
            | Event::SpkUpdated { id, .. }
            | Event::SpkStatusChanged { id, .. }
            | Event::SpkFinished { id, .. }
            | Event::SpkDeleted { id, .. } => *id,
        }
    }
}

// Handlers implementing this trait process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

/// Writes every event to the log.
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle_event(&self, event: Event) -> Result<(), String> {
        match &event {
            Event::SpkCreated { id, spk_number, .. } => {
                info!(spk_id = %id, spk_number = %spk_number, "SPK created");
            }
            Event::SpkUpdated { id, spk_number, .. } => {
                info!(spk_id = %id, spk_number = %spk_number, "SPK updated");
            }
            Event::SpkStatusChanged {
                id,
                spk_number,
                old_status,
                new_status,
            } => {
                info!(
                    spk_id = %id,
                    spk_number = %spk_number,
                    old_status = %old_status,
                    new_status = %new_status,
                    "SPK status changed"
                );
            }
            Event::SpkFinished { id, spk_number } => {
                info!(spk_id = %id, spk_number = %spk_number, "SPK finished and locked");
            }
            Event::SpkDeleted { id, spk_number } => {
                info!(spk_id = %id, spk_number = %spk_number, "SPK deleted");
            }
        }
        Ok(())
    }
}

/// Drains the channel until every sender is dropped.
pub async fn process_events(rx: mpsc::Receiver<Event>) {
    process_events_with_handlers(rx, vec![Arc::new(LoggingHandler)]).await
}

/// Fans each event out to all handlers; one failing handler does not stop the others.
pub async fn process_events_with_handlers(
    mut rx: mpsc::Receiver<Event>,
    handlers: Vec<Arc<dyn EventHandler>>,
) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        let name = event.name();
        let results = join_all(
            handlers
                .iter()
                .map(|handler| handler.handle_event(event.clone())),
        )
        .await;

        for err in results.into_iter().filter_map(Result::err) {
            error!(event = name, spk_id = %event.spk_id(), error = %err, "Event handler failed");
        }
    }

    info!("Event channel closed, stopping event processing loop");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle_event(&self, event: Event) -> Result<(), String> {
            self.seen.lock().await.push(event);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle_event(&self, _event: Event) -> Result<(), String> {
            Err("boom".to_string())
        }
    }

    #[tokio::test]
    async fn every_handler_sees_every_event() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let recorder = Arc::new(Recorder::default());

        let id = Uuid::new_v4();
        sender
            .send(Event::SpkFinished {
                id,
                spk_number: "001/SPK/I/2024".into(),
            })
            .await
            .unwrap();
        sender
            .send(Event::SpkDeleted {
                id,
                spk_number: "001/SPK/I/2024".into(),
            })
            .await
            .unwrap();
        drop(sender);

        process_events_with_handlers(rx, vec![Arc::new(Failing), recorder.clone()]).await;

        let seen = recorder.seen.lock().await;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].name(), "spk.finished");
        assert_eq!(seen[1].spk_id(), id);
    }

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        assert!(sender
            .send(Event::SpkDeleted {
                id: Uuid::new_v4(),
                spk_number: "x".into(),
            })
            .await
            .is_err());
        sender
            .send_or_log(Event::SpkDeleted {
                id: Uuid::new_v4(),
                spk_number: "x".into(),
            })
            .await;
    }
}
