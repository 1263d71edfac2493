//! Output-sink session client.
//!
//! Manages the racy lifecycle of a single output-sink session against the
//! remote audio service. Creation is asynchronous and the two confirmations —
//! the create-request's own response and the sink-ready notification — can
//! arrive in either order; both orderings converge on one active id by
//! recording whichever id is seen first as pending and promoting it on the
//! duplicate confirmation. A confirmation naming a *different* id while one
//! is pending or active is a stale create: the session it names is torn down
//! rather than kept.
//!
//! Outcomes surface as explicit [`SessionEvent`] values through a queue, not
//! captured callbacks, and teardown only enqueues commands on a thread-safe
//! channel, so shutdown is safe from any thread.

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::protocol::{DeviceHandle, SessionRequest, SessionResponse};
use crate::transport::MessageTransport;
use crossbeam_channel::{Receiver, Sender};
use std::collections::VecDeque;
use std::thread;

/// Where the session lifecycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Create request sent, no confirmation yet (or one of two seen).
    Pending,
    /// Both confirmations seen; the session is device-bound.
    Active,
}

/// Outcome of session activity, drained by the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Ready(u64),
    Failed(u64, String),
    /// A confirmation named a session other than the one pending/active; it
    /// was torn down.
    Stale(u64),
}

/// How the client reaches the audio service. Implementations must be safe to
/// call from any thread; sends are fire-and-forget at this seam.
pub trait SessionTransport {
    fn send(&self, request: SessionRequest) -> Result<(), SessionError>;
}

/// Client-side state machine for one output-sink session.
pub struct SessionClient<T: SessionTransport> {
    transport: T,
    responses: Receiver<SessionResponse>,
    config: SessionConfig,
    device: Option<DeviceHandle>,
    pending: Option<u64>,
    active: Option<u64>,
    create_token: Option<u64>,
    next_token: u64,
    outcomes: VecDeque<SessionEvent>,
}

impl<T: SessionTransport> SessionClient<T> {
    pub fn new(transport: T, responses: Receiver<SessionResponse>, config: SessionConfig) -> Self {
        Self {
            transport,
            responses,
            config,
            device: None,
            pending: None,
            active: None,
            create_token: None,
            next_token: 1,
            outcomes: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        if self.active.is_some() {
            SessionState::Active
        } else if self.pending.is_some() || self.create_token.is_some() {
            SessionState::Pending
        } else {
            SessionState::Idle
        }
    }

    pub fn active_session(&self) -> Option<u64> {
        self.active
    }

    /// Request an output sink on `device`.
    ///
    /// Idempotent while a session is pending or active for the *same* device;
    /// an explicit [`SessionError::SessionBusy`] for a different one.
    pub fn request_output_sink(&mut self, device: DeviceHandle) -> Result<(), SessionError> {
        if let Some(current) = self.device {
            if self.state() != SessionState::Idle {
                if current == device {
                    return Ok(());
                }
                return Err(SessionError::SessionBusy {
                    requested: device,
                    current,
                });
            }
        }

        let request_token = self.take_token();
        self.device = Some(device);
        self.create_token = Some(request_token);
        self.transport.send(SessionRequest::CreateSession {
            request_token,
            device,
            target_latency_ms: self.config.target_latency_ms,
        })?;
        Ok(())
    }

    /// Process every response the transport has delivered so far.
    pub fn pump(&mut self) {
        while let Ok(response) = self.responses.try_recv() {
            self.handle_response(response);
        }
    }

    /// Next surfaced outcome, if any. Call [`SessionClient::pump`] first.
    pub fn poll_outcome(&mut self) -> Option<SessionEvent> {
        self.outcomes.pop_front()
    }

    /// Tear down both pending and active sessions (deduplicated) and clear
    /// all local state. Only enqueues destroy commands, so this is safe from
    /// any thread and never skipped.
    pub fn shutdown(&mut self) {
        let pending = self.pending.take();
        let active = self.active.take();
        if let Some(id) = pending {
            self.send_destroy(id);
        }
        if let Some(id) = active {
            if pending != Some(id) {
                self.send_destroy(id);
            }
        }
        self.device = None;
        self.create_token = None;
        self.outcomes.clear();
    }

    fn handle_response(&mut self, response: SessionResponse) {
        match response {
            SessionResponse::SessionCreated {
                request_token,
                session_id,
            } => {
                if self.create_token != Some(request_token) {
                    // A create we no longer care about completed anyway.
                    tracing::debug!(session_id, "tearing down stale session create");
                    self.send_destroy(session_id);
                    self.outcomes.push_back(SessionEvent::Stale(session_id));
                    return;
                }
                if session_id == 0 {
                    self.create_token = None;
                    self.device = None;
                    self.outcomes.push_back(SessionEvent::Failed(
                        0,
                        "service returned an invalid session id".to_string(),
                    ));
                    return;
                }
                self.note_confirmation(session_id);
            }
            SessionResponse::OutputSinkReady { session_id } => {
                self.note_confirmation(session_id);
            }
            SessionResponse::OutputSinkFailed { session_id, error } => {
                if self.pending == Some(session_id) {
                    self.pending = None;
                    self.create_token = None;
                }
                if self.active == Some(session_id) {
                    self.active = None;
                }
                if self.state() == SessionState::Idle {
                    self.device = None;
                }
                self.outcomes
                    .push_back(SessionEvent::Failed(session_id, error));
            }
            SessionResponse::RequestError {
                request_token,
                error,
            } => {
                if self.create_token == Some(request_token) {
                    self.create_token = None;
                    if self.pending.is_none() && self.active.is_none() {
                        self.device = None;
                    }
                    self.outcomes.push_back(SessionEvent::Failed(0, error));
                } else {
                    tracing::debug!(request_token, %error, "request failed");
                }
            }
        }
    }

    /// One confirmation sighting. First sighting of an id records it as
    /// pending; the duplicate sighting of the same id is the transition to
    /// active. A different id while one is pending/active is stale.
    fn note_confirmation(&mut self, session_id: u64) {
        match (self.pending, self.active) {
            (Some(pending), _) if pending == session_id => {
                self.pending = None;
                self.active = Some(session_id);
                self.create_token = None;
                self.outcomes.push_back(SessionEvent::Ready(session_id));
            }
            (_, Some(active)) if active == session_id => {
                // Duplicate confirmation of an already-active session.
            }
            (None, None) => {
                self.pending = Some(session_id);
            }
            _ => {
                tracing::debug!(session_id, "tearing down session from a stale create");
                self.send_destroy(session_id);
                self.outcomes.push_back(SessionEvent::Stale(session_id));
            }
        }
    }

    fn send_destroy(&mut self, session_id: u64) {
        let request_token = self.take_token();
        if let Err(error) = self.transport.send(SessionRequest::DestroySession {
            request_token,
            session_id,
        }) {
            // Fire-and-forget: the service reaps dead clients on its own.
            tracing::debug!(session_id, %error, "destroy request not delivered");
        }
    }

    fn take_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }
}

impl<T: SessionTransport> Drop for SessionClient<T> {
    fn drop(&mut self) {
        // Destruction always attempts to tear down both ids.
        self.shutdown();
    }
}

/// [`SessionTransport`] over a Unix socket, written by a dedicated IPC
/// thread so the owning thread never touches the socket directly.
pub struct SocketSessionTransport {
    commands: tokio::sync::mpsc::UnboundedSender<SessionRequest>,
    _io_thread: thread::JoinHandle<()>,
}

impl SocketSessionTransport {
    /// Connect to the audio service and return the transport plus the
    /// response queue to hand to [`SessionClient::new`].
    pub fn connect(config: &SessionConfig) -> Result<(Self, Receiver<SessionResponse>), SessionError> {
        let (command_tx, command_rx) = tokio::sync::mpsc::unbounded_channel();
        let (response_tx, response_rx) = crossbeam_channel::unbounded();
        let (connected_tx, connected_rx) = crossbeam_channel::bounded(1);
        let socket_path = config.socket_path.clone();

        let io_thread = thread::Builder::new()
            .name("aulos-session".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(error) => {
                        let _ = connected_tx.send(Err(error.to_string()));
                        return;
                    }
                };
                runtime.block_on(Self::io_main(
                    socket_path,
                    command_rx,
                    response_tx,
                    connected_tx,
                ));
            })
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        match connected_rx.recv() {
            Ok(Ok(())) => Ok((
                Self {
                    commands: command_tx,
                    _io_thread: io_thread,
                },
                response_rx,
            )),
            Ok(Err(error)) => Err(SessionError::Transport(error)),
            Err(_) => Err(SessionError::Disconnected),
        }
    }

    async fn io_main(
        socket_path: std::path::PathBuf,
        mut command_rx: tokio::sync::mpsc::UnboundedReceiver<SessionRequest>,
        response_tx: Sender<SessionResponse>,
        connected_tx: Sender<Result<(), String>>,
    ) {
        let transport = match MessageTransport::connect(&socket_path).await {
            Ok(transport) => {
                let _ = connected_tx.send(Ok(()));
                transport
            }
            Err(error) => {
                let _ = connected_tx.send(Err(error.to_string()));
                return;
            }
        };
        let (mut sender, mut receiver) = transport.into_split();

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(request) => {
                        if let Err(error) = sender.send(&request).await {
                            tracing::warn!(%error, "session request send failed");
                            break;
                        }
                    }
                    None => break,
                },
                response = receiver.recv::<SessionResponse>() => match response {
                    Ok(response) => {
                        if response_tx.send(response).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%error, "session connection lost");
                        break;
                    }
                },
            }
        }
    }
}

impl SessionTransport for SocketSessionTransport {
    fn send(&self, request: SessionRequest) -> Result<(), SessionError> {
        self.commands
            .send(request)
            .map_err(|_| SessionError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingTransport {
        sent: Arc<Mutex<Vec<SessionRequest>>>,
    }

    impl SessionTransport for RecordingTransport {
        fn send(&self, request: SessionRequest) -> Result<(), SessionError> {
            self.sent.lock().unwrap().push(request);
            Ok(())
        }
    }

    fn client() -> (
        SessionClient<RecordingTransport>,
        RecordingTransport,
        Sender<SessionResponse>,
    ) {
        let transport = RecordingTransport::default();
        let (response_tx, response_rx) = crossbeam_channel::unbounded();
        let client = SessionClient::new(transport.clone(), response_rx, SessionConfig::default());
        (client, transport, response_tx)
    }

    fn sent_creates(transport: &RecordingTransport) -> Vec<u64> {
        transport
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|request| match request {
                SessionRequest::CreateSession { request_token, .. } => Some(*request_token),
                _ => None,
            })
            .collect()
    }

    fn sent_destroys(transport: &RecordingTransport) -> Vec<u64> {
        transport
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|request| match request {
                SessionRequest::DestroySession { session_id, .. } => Some(*session_id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_request_is_idempotent_for_same_device() {
        let (mut client, transport, _tx) = client();
        client.request_output_sink(DeviceHandle(1)).unwrap();
        client.request_output_sink(DeviceHandle(1)).unwrap();
        assert_eq!(sent_creates(&transport).len(), 1);
        assert_eq!(client.state(), SessionState::Pending);
    }

    #[test]
    fn test_request_for_different_device_while_pending_fails() {
        let (mut client, _transport, _tx) = client();
        client.request_output_sink(DeviceHandle(1)).unwrap();
        assert!(matches!(
            client.request_output_sink(DeviceHandle(2)),
            Err(SessionError::SessionBusy {
                requested: DeviceHandle(2),
                current: DeviceHandle(1),
            })
        ));
    }

    #[test]
    fn test_response_then_ready_activates() {
        let (mut client, transport, tx) = client();
        client.request_output_sink(DeviceHandle(1)).unwrap();
        let token = sent_creates(&transport)[0];

        tx.send(SessionResponse::SessionCreated {
            request_token: token,
            session_id: 7,
        })
        .unwrap();
        client.pump();
        assert_eq!(client.state(), SessionState::Pending);

        tx.send(SessionResponse::OutputSinkReady { session_id: 7 })
            .unwrap();
        client.pump();
        assert_eq!(client.state(), SessionState::Active);
        assert_eq!(client.active_session(), Some(7));
        assert_eq!(client.poll_outcome(), Some(SessionEvent::Ready(7)));
    }

    #[test]
    fn test_ready_before_response_converges_to_same_id() {
        let (mut client, transport, tx) = client();
        client.request_output_sink(DeviceHandle(1)).unwrap();
        let token = sent_creates(&transport)[0];

        // Sink-ready races ahead of the create response.
        tx.send(SessionResponse::OutputSinkReady { session_id: 9 })
            .unwrap();
        client.pump();
        assert_eq!(client.state(), SessionState::Pending);

        tx.send(SessionResponse::SessionCreated {
            request_token: token,
            session_id: 9,
        })
        .unwrap();
        client.pump();
        assert_eq!(client.active_session(), Some(9));
        assert_eq!(client.poll_outcome(), Some(SessionEvent::Ready(9)));
    }

    #[test]
    fn test_confirmation_for_different_id_is_torn_down() {
        let (mut client, transport, tx) = client();
        client.request_output_sink(DeviceHandle(1)).unwrap();
        let token = sent_creates(&transport)[0];
        tx.send(SessionResponse::SessionCreated {
            request_token: token,
            session_id: 5,
        })
        .unwrap();
        tx.send(SessionResponse::OutputSinkReady { session_id: 6 })
            .unwrap();
        client.pump();

        assert_eq!(sent_destroys(&transport), vec![6]);
        assert_eq!(client.poll_outcome(), Some(SessionEvent::Stale(6)));
        // The original pending session is still waiting on its duplicate.
        assert_eq!(client.state(), SessionState::Pending);
    }

    #[test]
    fn test_stale_create_response_is_torn_down() {
        let (mut client, transport, tx) = client();
        client.request_output_sink(DeviceHandle(1)).unwrap();
        // A token the client never issued for the current create.
        tx.send(SessionResponse::SessionCreated {
            request_token: 999,
            session_id: 13,
        })
        .unwrap();
        client.pump();
        assert_eq!(sent_destroys(&transport), vec![13]);
        assert_eq!(client.poll_outcome(), Some(SessionEvent::Stale(13)));
    }

    #[test]
    fn test_failure_surfaces_and_resets() {
        let (mut client, transport, tx) = client();
        client.request_output_sink(DeviceHandle(1)).unwrap();
        let token = sent_creates(&transport)[0];
        tx.send(SessionResponse::SessionCreated {
            request_token: token,
            session_id: 4,
        })
        .unwrap();
        tx.send(SessionResponse::OutputSinkFailed {
            session_id: 4,
            error: "device unplugged".to_string(),
        })
        .unwrap();
        client.pump();

        assert_eq!(
            client.poll_outcome(),
            Some(SessionEvent::Failed(4, "device unplugged".to_string()))
        );
        assert_eq!(client.state(), SessionState::Idle);
        // A new request for a different device now succeeds.
        client.request_output_sink(DeviceHandle(2)).unwrap();
    }

    #[test]
    fn test_shutdown_tears_down_pending_and_active_deduplicated() {
        let (mut client, transport, tx) = client();
        client.request_output_sink(DeviceHandle(1)).unwrap();
        let token = sent_creates(&transport)[0];
        tx.send(SessionResponse::SessionCreated {
            request_token: token,
            session_id: 3,
        })
        .unwrap();
        tx.send(SessionResponse::OutputSinkReady { session_id: 3 })
            .unwrap();
        client.pump();
        assert_eq!(client.state(), SessionState::Active);

        client.shutdown();
        assert_eq!(sent_destroys(&transport), vec![3]);
        assert_eq!(client.state(), SessionState::Idle);

        // Drop after shutdown must not send a second destroy.
        drop(client);
        assert_eq!(sent_destroys(&transport), vec![3]);
    }

    #[test]
    fn test_drop_tears_down_outstanding_session() {
        let (mut client, transport, tx) = client();
        client.request_output_sink(DeviceHandle(1)).unwrap();
        let token = sent_creates(&transport)[0];
        tx.send(SessionResponse::SessionCreated {
            request_token: token,
            session_id: 8,
        })
        .unwrap();
        client.pump();

        drop(client);
        assert_eq!(sent_destroys(&transport), vec![8]);
    }
}
