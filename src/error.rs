//! Error type for the aulos umbrella crate.

use thiserror::Error;

/// Errors surfaced by the engine facade.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Graph(#[from] aulos_core::GraphError),

    #[error(transparent)]
    Stream(#[from] aulos_stream::StreamError),

    #[error(transparent)]
    Session(#[from] aulos_stream::SessionError),

    #[error("no session client connected")]
    SessionNotConnected,

    #[error("worker link error: {0}")]
    Worker(String),

    #[error("renderer is already driving a device stream")]
    RendererBusy,

    #[cfg(feature = "device-io")]
    #[error("audio device not available")]
    DeviceNotAvailable(#[from] cpal::DefaultStreamConfigError),

    #[cfg(feature = "device-io")]
    #[error("failed to build audio stream")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[cfg(feature = "device-io")]
    #[error("failed to play audio stream")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("invalid device: {0}")]
    InvalidDevice(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
