//! Host-side link to the worker process.
//!
//! A dedicated IPC thread owns the control socket; the engine talks to it
//! through channels, so publishing bindings never blocks on socket I/O.

use crate::error::{Error, Result};
use aulos_stream::{HostMessage, MessageTransport, StreamBinding, WorkerMessage};
use crossbeam_channel::Receiver;
use std::path::{Path, PathBuf};
use std::thread;

pub struct WorkerLink {
    commands: tokio::sync::mpsc::UnboundedSender<HostMessage>,
    events: Receiver<WorkerMessage>,
    _io_thread: thread::JoinHandle<()>,
}

impl WorkerLink {
    /// Connect to a worker's control socket and wait for its `Ready` hello.
    pub fn connect(socket_path: &Path) -> Result<Self> {
        let (command_tx, command_rx) = tokio::sync::mpsc::unbounded_channel();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let socket_path = socket_path.to_path_buf();

        let io_thread = thread::Builder::new()
            .name("aulos-worker-link".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(error) => {
                        let _ = ready_tx.send(Err(error.to_string()));
                        return;
                    }
                };
                runtime.block_on(Self::io_main(socket_path, command_rx, event_tx, ready_tx));
            })
            .map_err(|e| Error::Worker(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                commands: command_tx,
                events: event_rx,
                _io_thread: io_thread,
            }),
            Ok(Err(error)) => Err(Error::Worker(error)),
            Err(_) => Err(Error::Worker("worker link thread died".to_string())),
        }
    }

    async fn io_main(
        socket_path: PathBuf,
        mut command_rx: tokio::sync::mpsc::UnboundedReceiver<HostMessage>,
        event_tx: crossbeam_channel::Sender<WorkerMessage>,
        ready_tx: crossbeam_channel::Sender<std::result::Result<(), String>>,
    ) {
        let transport = match MessageTransport::connect(&socket_path).await {
            Ok(transport) => transport,
            Err(error) => {
                let _ = ready_tx.send(Err(error.to_string()));
                return;
            }
        };
        let (mut sender, mut receiver) = transport.into_split();
        match receiver.recv::<WorkerMessage>().await {
            Ok(WorkerMessage::Ready) => {
                let _ = ready_tx.send(Ok(()));
            }
            Ok(other) => {
                let _ = ready_tx.send(Err(format!("unexpected hello: {other:?}")));
                return;
            }
            Err(error) => {
                let _ = ready_tx.send(Err(error.to_string()));
                return;
            }
        }

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(message) => {
                        let shutdown = matches!(message, HostMessage::Shutdown);
                        if let Err(error) = sender.send(&message).await {
                            tracing::warn!(%error, "worker command send failed");
                            break;
                        }
                        if shutdown {
                            break;
                        }
                    }
                    None => break,
                },
                event = receiver.recv::<WorkerMessage>() => match event {
                    Ok(message) => {
                        if event_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        tracing::info!(%error, "worker connection closed");
                        break;
                    }
                },
            }
        }
    }

    /// Replace the worker's full binding set.
    pub fn set_bindings(&self, bindings: Vec<StreamBinding>) -> Result<()> {
        self.commands
            .send(HostMessage::SetStreamBindings { bindings })
            .map_err(|_| Error::Worker("worker link closed".to_string()))
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(HostMessage::Shutdown);
    }

    /// Next worker event, if one has arrived.
    pub fn poll_event(&self) -> Option<WorkerMessage> {
        self.events.try_recv().ok()
    }
}
