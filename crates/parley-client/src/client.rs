//! Application root
//!
//! `ChatClient` wires one event bus, one session and one history manager
//! together and keeps the active store in step with the logged-in user.
//! Losing the connection ends the login, so the user's store is released
//! whether the client disconnects or the server drops it.

use std::sync::{Arc, Weak};

use parley_core::speech::wav;
use parley_core::{
    AudioFile, AudioFormat, EventBus, Message, ParleyConfig, Request, RequestFactory, Response,
    SpeechToText, Subscriber, Transcription,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::{ClientError, ClientResult};
use crate::history::{HistoryManager, HistoryRecorder, LogEntry};
use crate::session::{Session, SessionState};

pub struct ChatClient {
    config: ParleyConfig,
    bus: Arc<EventBus>,
    session: Arc<Session>,
    history: Arc<HistoryManager>,
    recorder: Arc<HistoryRecorder>,
    recorder_task: JoinHandle<()>,
    closure_watcher: JoinHandle<()>,
}

impl ChatClient {
    /// Build the client with a temporary history store and no connection
    pub async fn new(config: ParleyConfig) -> ClientResult<Self> {
        let history = Arc::new(HistoryManager::new(&config.history));
        Self::with_history(config, history).await
    }

    /// Build the client around an existing history manager
    pub async fn with_history(
        config: ParleyConfig,
        history: Arc<HistoryManager>,
    ) -> ClientResult<Self> {
        config.validate()?;
        history.switch_to_temporary().await?;

        let bus = Arc::new(EventBus::new());
        let session = Arc::new(Session::new(config.session.clone(), Arc::clone(&bus)));
        let (recorder, recorder_task) = HistoryRecorder::spawn(Arc::clone(&history));
        bus.subscribe(Arc::clone(&recorder) as Arc<dyn Subscriber>);
        let closure_watcher = spawn_closure_watcher(
            session.watch_closures(),
            Arc::downgrade(&session),
            Arc::clone(&history),
            Arc::clone(&recorder),
        );

        Ok(Self {
            config,
            bus,
            session,
            history,
            recorder,
            recorder_task,
            closure_watcher,
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn history(&self) -> &Arc<HistoryManager> {
        &self.history
    }

    pub fn recorder(&self) -> &Arc<HistoryRecorder> {
        &self.recorder
    }

    pub fn config(&self) -> &ParleyConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Logged-in username
    pub fn username(&self) -> Option<String> {
        self.session.auth().map(|auth| auth.username)
    }

    fn require_username(&self) -> ClientResult<String> {
        self.username().ok_or(ClientError::NotLoggedIn)
    }

    // ------------------------------------------------------------------------
    // Connection and Login
    // ------------------------------------------------------------------------

    /// Connect to the configured server
    pub async fn connect(&self) -> ClientResult<()> {
        let server = &self.config.server;
        self.connect_to(&server.host, server.port).await
    }

    pub async fn connect_to(&self, host: &str, port: u16) -> ClientResult<()> {
        Ok(self.session.connect(host, port).await?)
    }

    /// Log in, then switch history to the user's store and apply retention
    ///
    /// A rejected login is returned as a failed [`Response`] and leaves the
    /// history untouched.
    pub async fn login(&self, username: &str, password: &str) -> ClientResult<Response> {
        let response = self.session.login(username, password).await?;
        if !response.success {
            warn!("Login of {} rejected: {}", username, response.message);
            return Ok(response);
        }

        self.history.switch_to_user(username).await?;
        self.history.record_login(username).await?;
        if let Some(days) = self.config.history.retention_days {
            self.history.purge_older_than(days).await?;
        }
        Ok(response)
    }

    /// Log out and return history to a temporary store
    pub async fn logout(&self) -> ClientResult<Response> {
        let username = self.require_username()?;
        let response = self.session.logout().await?;
        if response.success {
            self.recorder.flush().await;
            self.history.record_logout(&username).await?;
            self.history.switch_to_temporary().await?;
        }
        Ok(response)
    }

    /// Drop the connection and return history to a temporary store
    ///
    /// Pending calls fail with a lost connection. The logged-in user's
    /// session record is stamped with a logout time.
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.session.disconnect().await;
        release_user_store(&self.session, &self.history, &self.recorder).await
    }

    /// Disconnect, stop the history writer and close the active store
    pub async fn shutdown(self) {
        if let Err(e) = self.disconnect().await {
            warn!("Releasing history on shutdown failed: {}", e);
        }
        self.closure_watcher.abort();
        self.recorder.flush().await;
        self.recorder_task.abort();
        self.history.close().await;
        info!("Client shut down");
    }

    /// Send any request through the session
    pub async fn call(&self, request: Request) -> ClientResult<Response> {
        Ok(self.session.send_request(request).await?)
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    pub async fn send_private_message(
        &self,
        recipient: &str,
        content: &str,
    ) -> ClientResult<Response> {
        let message = Message::private(self.require_username()?, recipient, content);
        let response = self.call(RequestFactory::send_private_message(&message)?).await?;
        self.log_sent_message(&response, message).await?;
        Ok(response)
    }

    pub async fn send_group_message(&self, group_id: i64, content: &str) -> ClientResult<Response> {
        let message = Message::group(self.require_username()?, group_id, content);
        let response = self.call(RequestFactory::send_group_message(&message)?).await?;
        self.log_sent_message(&response, message).await?;
        Ok(response)
    }

    pub async fn send_private_audio(
        &self,
        recipient: &str,
        data: Vec<u8>,
        format: AudioFormat,
        duration_seconds: f64,
    ) -> ClientResult<Response> {
        let sender = self.require_username()?;
        let audio = AudioFile::private(sender, recipient, data, format, duration_seconds);
        let response = self.call(RequestFactory::send_private_audio(&audio)?).await?;
        self.log_sent_audio(&response, audio).await?;
        Ok(response)
    }

    pub async fn send_group_audio(
        &self,
        group_id: i64,
        data: Vec<u8>,
        format: AudioFormat,
        duration_seconds: f64,
    ) -> ClientResult<Response> {
        let sender = self.require_username()?;
        let audio = AudioFile::group(sender, group_id, data, format, duration_seconds);
        let response = self.call(RequestFactory::send_group_audio(&audio)?).await?;
        self.log_sent_audio(&response, audio).await?;
        Ok(response)
    }

    async fn log_sent_message(
        &self,
        response: &Response,
        mut message: Message,
    ) -> ClientResult<()> {
        if response.success {
            message.id = response.payload.get_i64(parley_core::factory::keys::MESSAGE_ID);
            self.history.append_message(&message).await?;
        }
        Ok(())
    }

    async fn log_sent_audio(&self, response: &Response, mut audio: AudioFile) -> ClientResult<()> {
        if response.success {
            audio.id = response.payload.get_i64(parley_core::factory::keys::MESSAGE_ID);
            self.history.append_audio(&audio).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------------

    /// Local conversation between the logged-in user and `peer`
    pub async fn conversation_with(&self, peer: &str) -> ClientResult<Vec<LogEntry>> {
        let me = self.require_username()?;
        self.recorder.flush().await;
        Ok(self.history.query_conversation(&me, peer).await?)
    }

    pub async fn group_log(&self, group_id: i64) -> ClientResult<Vec<LogEntry>> {
        self.recorder.flush().await;
        Ok(self.history.query_group_log(group_id).await?)
    }

    pub async fn purge_history(&self, days: u32) -> ClientResult<u64> {
        Ok(self.history.purge_older_than(days).await?)
    }

    // ------------------------------------------------------------------------
    // Speech
    // ------------------------------------------------------------------------

    /// Transcribe a voice message, framing headerless PCM as WAV first
    pub async fn transcribe(&self, audio: &AudioFile, engine: &dyn SpeechToText) -> Transcription {
        match audio.format {
            AudioFormat::Pcm16 if !wav::is_wav(&audio.data) => {
                let framed = wav::frame_pcm16(&audio.data, wav::DEFAULT_SAMPLE_RATE, 1);
                engine.transcribe(&framed).await
            }
            _ => engine.transcribe(&audio.data).await,
        }
    }
}

// ----------------------------------------------------------------------------
// Connection Loss
// ----------------------------------------------------------------------------

/// Stamp the owner's logout and fall back to a temporary store
///
/// Does nothing while the store's owner is still logged in, which covers a
/// reconnect and login racing the notification of the old closure.
async fn release_user_store(
    session: &Session,
    history: &HistoryManager,
    recorder: &HistoryRecorder,
) -> ClientResult<()> {
    let Some(owner) = history.current_owner().await else {
        return Ok(());
    };
    if session.auth().is_some_and(|auth| auth.username == owner) {
        return Ok(());
    }

    recorder.flush().await;
    history.record_logout(&owner).await?;
    history.switch_to_temporary().await?;
    info!("Released history of {} after the connection ended", owner);
    Ok(())
}

fn spawn_closure_watcher(
    mut closures: watch::Receiver<u64>,
    session: Weak<Session>,
    history: Arc<HistoryManager>,
    recorder: Arc<HistoryRecorder>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while closures.changed().await.is_ok() {
            let Some(session) = session.upgrade() else {
                break;
            };
            if let Err(e) = release_user_store(&session, &history, &recorder).await {
                error!("Failed to release history after connection loss: {}", e);
            }
        }
        debug!("Closure watcher stopped");
    })
}
