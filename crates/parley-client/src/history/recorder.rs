//! Event bus subscriber that writes incoming conversation events to history
//!
//! Delivery runs on the session's reader task, so the subscriber only queues
//! the event. A background writer task drains the queue in order and appends
//! to whichever store is active when the event is written.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parley_core::{
    AudioFile, Event, EventKind, Message, PayloadRecord, Subscriber, SubscriberError,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::manager::HistoryManager;

enum RecorderCommand {
    Record(Event),
    Flush(oneshot::Sender<()>),
}

/// Queues private and group text/audio events for the history writer
pub struct HistoryRecorder {
    queue: mpsc::UnboundedSender<RecorderCommand>,
    recorded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl HistoryRecorder {
    /// Create the recorder and start its writer task
    pub fn spawn(history: Arc<HistoryManager>) -> (Arc<Self>, JoinHandle<()>) {
        let (queue, commands) = mpsc::unbounded_channel();
        let recorded = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(write_loop(
            history,
            commands,
            Arc::clone(&recorded),
            Arc::clone(&failed),
        ));

        (
            Arc::new(Self {
                queue,
                recorded,
                failed,
            }),
            task,
        )
    }

    /// Whether events of this kind end up in history
    pub fn records(kind: EventKind) -> bool {
        matches!(
            kind,
            EventKind::PrivateMessage
                | EventKind::GroupMessage
                | EventKind::PrivateAudio
                | EventKind::GroupAudio
        )
    }

    /// Wait until every event queued before this call has been written
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.queue.send(RecorderCommand::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Entries written since start
    pub fn recorded_count(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Entries that could not be written
    pub fn failure_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl Subscriber for HistoryRecorder {
    fn on_event(&self, event: &Event) -> Result<(), SubscriberError> {
        if !Self::records(event.kind) {
            return Ok(());
        }
        self.queue
            .send(RecorderCommand::Record(event.clone()))
            .map_err(|_| "history writer has stopped".into())
    }

    fn name(&self) -> &str {
        "history-recorder"
    }
}

async fn write_loop(
    history: Arc<HistoryManager>,
    mut commands: mpsc::UnboundedReceiver<RecorderCommand>,
    recorded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            RecorderCommand::Record(event) => match write_event(&history, &event).await {
                Ok(id) => {
                    recorded.fetch_add(1, Ordering::Relaxed);
                    debug!("Recorded {} as history entry {}", event.kind, id);
                }
                Err(e) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    error!("Failed to record {} in history: {}", event.kind, e);
                }
            },
            RecorderCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("History writer stopped");
}

async fn write_event(history: &HistoryManager, event: &Event) -> Result<i64, SubscriberError> {
    let id = match event.kind {
        EventKind::PrivateAudio | EventKind::GroupAudio => {
            let audio = AudioFile::from_value(&event.payload)?;
            history.append_audio(&audio).await?
        }
        _ => {
            let message = Message::from_value(&event.payload)?;
            history.append_message(&message).await?
        }
    };
    Ok(id)
}
