//! Connection lifecycle management
//!
//! `VoiceClient` is the single owner of the backend connection handle and
//! the displayed session state. It (re)establishes the WebSocket on
//! lifecycle triggers, follows backend-declared state, and routes user
//! intent into control requests. Each (re)connection gets a fresh
//! generation number; tasks belonging to a replaced connection recognize
//! themselves as stale and retire without side effects, so rapid reconnect
//! triggers converge on exactly one live connection with one set of
//! handlers.

mod error;
mod socket;

pub(crate) use error::ConnectionError;

use crate::config::ClientConfig;
use crate::lifecycle::LifecycleEvent;
use crate::protocol::{ClientRequest, ServerEvent, SessionState, Speaker};
use crate::session::{Session, STATUS_LISTENING};
use crate::surface::UiEvent;
use crate::transcript::TranscriptLog;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

/// Handle to the live connection, replaced wholesale on every setup
struct ConnectionHandle {
    #[allow(dead_code)]
    generation: u64,
    request_tx: mpsc::Sender<ClientRequest>,
}

struct ClientShared {
    config: ClientConfig,
    session: Mutex<Session>,
    transcript: TranscriptLog,
    ui_tx: broadcast::Sender<UiEvent>,
    conn: Mutex<Option<ConnectionHandle>>,
    generation: AtomicU64,
}

/// Client runtime for the voice service connection
#[derive(Clone)]
pub(crate) struct VoiceClient {
    inner: Arc<ClientShared>,
}

impl VoiceClient {
    pub(crate) fn new(config: ClientConfig, ui_tx: broadcast::Sender<UiEvent>) -> Self {
        Self {
            inner: Arc::new(ClientShared {
                config,
                session: Mutex::new(Session::new()),
                transcript: TranscriptLog::new(ui_tx.clone()),
                ui_tx,
                conn: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Snapshot of the current session state
    pub(crate) fn session(&self) -> Session {
        self.lock_session().clone()
    }

    /// The transcript retention controller
    #[allow(dead_code)]
    pub(crate) fn transcript(&self) -> &TranscriptLog {
        &self.inner.transcript
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        match self.inner.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_conn(&self) -> MutexGuard<'_, Option<ConnectionHandle>> {
        match self.inner.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Drop any existing handle and start a new connection generation
    ///
    /// Every generation bump happens under the connection lock, so a setup
    /// in flight can atomically detect that it has been superseded.
    fn begin_generation(&self) -> u64 {
        let mut conn = self.lock_conn();
        if conn.take().is_some() {
            debug!("Closed previous connection");
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether `generation` still identifies the live connection
    pub(super) fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    /// Idempotent (re)initialization of the backend connection
    ///
    /// Closes any open connection first, then opens a fresh WebSocket and
    /// attaches one send task and one receive task for the new generation.
    /// Safe to call repeatedly in rapid succession: a slower attempt that
    /// finds itself superseded abandons its socket without installing it.
    pub(crate) async fn setup_connection(&self) -> Result<(), ConnectionError> {
        let generation = self.begin_generation();

        let ws_url = socket::build_ws_url(&self.inner.config.server.url);
        let parsed_url =
            url::Url::parse(&ws_url).map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;
        let host = parsed_url
            .host_str()
            .ok_or_else(|| ConnectionError::InvalidUrl("no host".to_string()))?
            .to_string();
        let request = socket::build_ws_request(&ws_url, &host).map_err(ConnectionError::Connect)?;

        info!(ws_url = %ws_url, "Connecting to voice service");
        let ws_result = timeout(
            Duration::from_secs(error::WS_CONNECT_TIMEOUT_SECS),
            connect_async(request),
        )
        .await;

        let ws_stream = match ws_result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => return Err(ConnectionError::Connect(e.to_string())),
            Err(_) => return Err(ConnectionError::ConnectTimeout),
        };

        let (ws_sink, ws_stream) = ws_stream.split();
        let (request_tx, request_rx) = mpsc::channel::<ClientRequest>(16);

        {
            let mut conn = self.lock_conn();
            if !self.is_current(generation) {
                debug!(generation, "Connection superseded during setup");
                return Ok(());
            }
            *conn = Some(ConnectionHandle {
                generation,
                request_tx,
            });
        }

        socket::spawn_send_task(ws_sink, request_rx);
        socket::spawn_receive_task(ws_stream, self.clone(), generation);

        self.on_connect().await;
        Ok(())
    }

    /// Transport became ready: reset to a clean baseline
    async fn on_connect(&self) {
        info!("Connected to voice service");
        self.lock_session().connected = true;
        self.reset_ui();
        if self.inner.config.behavior.auto_start_on_connect {
            self.request_start().await;
        }
    }

    /// Transport loss reported by the receive task of `generation`
    ///
    /// Stale generations are ignored; the current one resets the UI to the
    /// idle baseline. No automatic reconnection happens here - recovery is
    /// driven by the next lifecycle trigger.
    pub(super) fn transport_lost(&self, generation: u64) {
        if !self.is_current(generation) {
            debug!(generation, "Ignoring transport loss from stale connection");
            return;
        }
        info!("Disconnected from voice service");
        self.close_connection();
        self.reset_ui();
    }

    /// Drop the connection handle and mark the session disconnected
    fn close_connection(&self) {
        let _ = self.begin_generation();
        self.lock_session().connected = false;
    }

    /// Dispatch a server event received on `generation`
    ///
    /// Returns false if the event belonged to a replaced connection and was
    /// dropped.
    pub(super) fn dispatch_from_transport(&self, generation: u64, event: ServerEvent) -> bool {
        if !self.is_current(generation) {
            debug!(generation, "Dropping event from stale connection");
            return false;
        }
        self.handle_server_event(event);
        true
    }

    fn handle_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::Status { state, message } => self.on_status(state, &message),
            ServerEvent::Transcript { speaker, text } => self.on_transcript(speaker, &text),
            ServerEvent::Error { message } => self.on_error(message.as_deref()),
            ServerEvent::Other => {
                warn!("Ignoring unrecognized server event");
            }
        }
    }

    /// Authoritative state update from the backend
    fn on_status(&self, state: SessionState, message: &str) {
        let state = state.normalized();
        debug!(%state, message, "Status update");
        self.lock_session().apply_status(state, message);
        let _ = self.inner.ui_tx.send(UiEvent::Indicator(state));
        let _ = self.inner.ui_tx.send(UiEvent::Status(message.to_string()));
    }

    /// New utterance pushed by the backend
    fn on_transcript(&self, speaker: Speaker, text: &str) {
        self.inner.transcript.append(speaker, text);
    }

    /// Non-fatal fault pushed by the backend: log and return to baseline
    fn on_error(&self, message: Option<&str>) {
        error!(
            "Voice service error: {}",
            message.unwrap_or("no details provided")
        );
        self.reset_ui();
    }

    /// Reset the displayed state to the idle baseline
    fn reset_ui(&self) {
        self.lock_session().reset();
        self.inner.transcript.clear();
        let _ = self.inner.ui_tx.send(UiEvent::Indicator(SessionState::Idle));
        let _ = self
            .inner
            .ui_tx
            .send(UiEvent::Status(crate::session::STATUS_IDLE.to_string()));
    }

    fn current_request_tx(&self) -> Option<mpsc::Sender<ClientRequest>> {
        self.lock_conn().as_ref().map(|h| h.request_tx.clone())
    }

    /// Ask the backend to start a listening session
    ///
    /// Optimistically switches the UI to listening once the request is
    /// handed to a live connection; the backend's next status update is
    /// authoritative. While disconnected the request fails silently.
    pub(crate) async fn request_start(&self) {
        if self.session().is_listening() {
            debug!("Already listening, ignoring start request");
            return;
        }
        let Some(request_tx) = self.current_request_tx() else {
            debug!("Start requested while disconnected, ignoring");
            return;
        };
        match request_tx.send(ClientRequest::StartListening).await {
            Ok(()) => {
                info!("Requested start of listening session");
                self.lock_session()
                    .apply_status(SessionState::Listening, STATUS_LISTENING);
                let _ = self
                    .inner
                    .ui_tx
                    .send(UiEvent::Indicator(SessionState::Listening));
                let _ = self
                    .inner
                    .ui_tx
                    .send(UiEvent::Status(STATUS_LISTENING.to_string()));
            }
            Err(_) => {
                debug!("Start request dropped, connection is closing");
            }
        }
    }

    /// Ask the backend to stop, then reset to baseline immediately
    ///
    /// Does not wait for acknowledgment.
    pub(crate) async fn request_stop(&self) {
        if let Some(request_tx) = self.current_request_tx() {
            if request_tx.send(ClientRequest::StopListening).await.is_ok() {
                info!("Requested stop of listening session");
            }
        }
        self.reset_ui();
    }

    /// Indicator click: stop when listening, start otherwise
    pub(crate) async fn handle_user_toggle(&self) {
        if self.session().is_listening() {
            self.request_stop().await;
        } else {
            self.request_start().await;
        }
    }

    /// Route a lifecycle event into connection actions
    pub(crate) async fn handle_lifecycle(&self, event: LifecycleEvent) {
        debug!(?event, "Lifecycle event");
        match event {
            LifecycleEvent::Ready | LifecycleEvent::Shown | LifecycleEvent::Restored => {
                if let Err(e) = self.setup_connection().await {
                    warn!("Connection setup failed: {}", e);
                }
            }
            LifecycleEvent::Hidden => {
                if self.inner.config.behavior.disconnect_on_hide {
                    self.request_stop().await;
                    self.close_connection();
                }
            }
            LifecycleEvent::Shutdown => {
                self.request_stop().await;
                self.close_connection();
            }
        }
    }

    #[cfg(test)]
    fn current_generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Install a fake connection handle, as if a setup had completed
    #[cfg(test)]
    fn attach_test_connection(&self) -> mpsc::Receiver<ClientRequest> {
        let generation = self.begin_generation();
        let (request_tx, request_rx) = mpsc::channel(16);
        *self.lock_conn() = Some(ConnectionHandle {
            generation,
            request_tx,
        });
        self.lock_session().connected = true;
        request_rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BehaviorConfig, ServerConfig};
    use crate::session::STATUS_IDLE;
    use crate::surface;
    use tokio::sync::mpsc::error::TryRecvError;

    fn test_client(auto_start_on_connect: bool, disconnect_on_hide: bool) -> VoiceClient {
        let config = ClientConfig {
            server: ServerConfig {
                url: "http://localhost:5000".to_string(),
            },
            behavior: BehaviorConfig {
                auto_start_on_connect,
                disconnect_on_hide,
            },
        };
        VoiceClient::new(config, surface::channel())
    }

    fn drain_requests(rx: &mut mpsc::Receiver<ClientRequest>) -> Vec<ClientRequest> {
        let mut requests = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(request) => requests.push(request),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        requests
    }

    #[tokio::test]
    async fn test_toggle_starts_then_stops() {
        let client = test_client(false, true);
        let mut rx = client.attach_test_connection();

        client.handle_user_toggle().await;
        assert_eq!(drain_requests(&mut rx), vec![ClientRequest::StartListening]);
        assert!(client.session().is_listening());
        assert_eq!(client.session().status_text, STATUS_LISTENING);

        client.handle_user_toggle().await;
        assert_eq!(drain_requests(&mut rx), vec![ClientRequest::StopListening]);
        assert!(!client.session().is_listening());
        assert_eq!(client.session().state, SessionState::Idle);
        assert_eq!(client.session().status_text, STATUS_IDLE);
    }

    #[tokio::test]
    async fn test_start_precondition_ignores_repeat() {
        let client = test_client(false, true);
        let mut rx = client.attach_test_connection();

        client.request_start().await;
        client.request_start().await;
        assert_eq!(drain_requests(&mut rx), vec![ClientRequest::StartListening]);
    }

    #[tokio::test]
    async fn test_start_while_disconnected_fails_silently() {
        let client = test_client(false, true);
        client.request_start().await;
        assert_eq!(client.session().state, SessionState::Idle);
        assert!(!client.session().connected);
    }

    #[tokio::test]
    async fn test_stop_resets_without_waiting() {
        let client = test_client(false, true);
        let mut rx = client.attach_test_connection();
        client.dispatch_from_transport(
            client.current_generation(),
            ServerEvent::Status {
                state: SessionState::Listening,
                message: "Listening...".to_string(),
            },
        );
        client.dispatch_from_transport(
            client.current_generation(),
            ServerEvent::Transcript {
                speaker: Speaker::User,
                text: "hi".to_string(),
            },
        );

        client.request_stop().await;
        assert_eq!(drain_requests(&mut rx), vec![ClientRequest::StopListening]);
        assert_eq!(client.session().state, SessionState::Idle);
        assert!(client.transcript().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_transport_loss_resets_to_baseline() {
        let client = test_client(false, true);
        let _rx = client.attach_test_connection();
        let generation = client.current_generation();
        client.dispatch_from_transport(
            generation,
            ServerEvent::Status {
                state: SessionState::Listening,
                message: "Listening...".to_string(),
            },
        );
        client.dispatch_from_transport(
            generation,
            ServerEvent::Transcript {
                speaker: Speaker::Assistant,
                text: "hello".to_string(),
            },
        );

        client.transport_lost(generation);
        let session = client.session();
        assert_eq!(session.state, SessionState::Idle);
        assert!(!session.is_listening());
        assert!(!session.connected);
        assert_eq!(session.status_text, STATUS_IDLE);
        assert!(client.transcript().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_error_event_resets_but_stays_connected() {
        let client = test_client(false, true);
        let _rx = client.attach_test_connection();
        let generation = client.current_generation();
        client.dispatch_from_transport(
            generation,
            ServerEvent::Status {
                state: SessionState::Speaking,
                message: "Speaking...".to_string(),
            },
        );

        client.dispatch_from_transport(
            generation,
            ServerEvent::Error {
                message: Some("pipeline fault".to_string()),
            },
        );
        let session = client.session();
        assert_eq!(session.state, SessionState::Idle);
        assert!(session.connected);
        assert!(client.transcript().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_stale_generation_events_are_dropped() {
        let client = test_client(false, true);
        let _rx1 = client.attach_test_connection();
        let stale = client.current_generation();
        let _rx2 = client.attach_test_connection();
        let _rx3 = client.attach_test_connection();
        let current = client.current_generation();

        let delivered = client.dispatch_from_transport(
            stale,
            ServerEvent::Status {
                state: SessionState::Listening,
                message: "Listening...".to_string(),
            },
        );
        assert!(!delivered);
        assert_eq!(client.session().state, SessionState::Idle);

        let delivered = client.dispatch_from_transport(
            current,
            ServerEvent::Status {
                state: SessionState::Listening,
                message: "Listening...".to_string(),
            },
        );
        assert!(delivered);
        assert!(client.session().is_listening());

        // A transport loss reported by the stale connection must not reset
        // the live session either.
        client.transport_lost(stale);
        assert!(client.session().is_listening());
        assert!(client.session().connected);
    }

    #[tokio::test]
    async fn test_unknown_status_state_treated_as_idle() {
        let client = test_client(false, true);
        let _rx = client.attach_test_connection();
        client.dispatch_from_transport(
            client.current_generation(),
            ServerEvent::Status {
                state: SessionState::Unknown,
                message: "???".to_string(),
            },
        );
        assert_eq!(client.session().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_end_to_end_status_and_transcript_sequence() {
        let client = test_client(false, true);
        let _rx = client.attach_test_connection();
        let generation = client.current_generation();

        client.dispatch_from_transport(
            generation,
            ServerEvent::Status {
                state: SessionState::Listening,
                message: "Listening...".to_string(),
            },
        );
        client.dispatch_from_transport(
            generation,
            ServerEvent::Transcript {
                speaker: Speaker::User,
                text: "hi".to_string(),
            },
        );
        client.dispatch_from_transport(
            generation,
            ServerEvent::Transcript {
                speaker: Speaker::Assistant,
                text: "hello".to_string(),
            },
        );
        client.dispatch_from_transport(
            generation,
            ServerEvent::Status {
                state: SessionState::Idle,
                message: "Click to start".to_string(),
            },
        );

        let session = client.session();
        assert_eq!(session.state, SessionState::Idle);
        assert!(!session.state.is_active());

        let messages = client.transcript().snapshot();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].speaker, Speaker::User);
        assert_eq!(messages[0].text, "hi");
        assert_eq!(messages[1].speaker, Speaker::Assistant);
        assert_eq!(messages[1].text, "hello");
    }

    #[tokio::test]
    async fn test_connect_auto_starts_when_configured() {
        let client = test_client(true, true);
        let mut rx = client.attach_test_connection();
        client.on_connect().await;
        assert_eq!(drain_requests(&mut rx), vec![ClientRequest::StartListening]);
        assert!(client.session().is_listening());

        let client = test_client(false, true);
        let mut rx = client.attach_test_connection();
        client.on_connect().await;
        assert!(drain_requests(&mut rx).is_empty());
        assert_eq!(client.session().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_hidden_disconnects_only_when_configured() {
        let client = test_client(false, false);
        let _rx = client.attach_test_connection();
        client.handle_lifecycle(LifecycleEvent::Hidden).await;
        assert!(client.current_request_tx().is_some());
        assert!(client.session().connected);

        let client = test_client(false, true);
        let mut rx = client.attach_test_connection();
        client.handle_lifecycle(LifecycleEvent::Hidden).await;
        assert_eq!(drain_requests(&mut rx), vec![ClientRequest::StopListening]);
        assert!(client.current_request_tx().is_none());
        assert!(!client.session().connected);
    }

    #[tokio::test]
    async fn test_shutdown_stops_and_disconnects() {
        let client = test_client(false, true);
        let mut rx = client.attach_test_connection();
        client.dispatch_from_transport(
            client.current_generation(),
            ServerEvent::Status {
                state: SessionState::Listening,
                message: "Listening...".to_string(),
            },
        );

        client.handle_lifecycle(LifecycleEvent::Shutdown).await;
        assert_eq!(drain_requests(&mut rx), vec![ClientRequest::StopListening]);
        assert!(!client.session().connected);
        assert_eq!(client.session().state, SessionState::Idle);
    }
}
