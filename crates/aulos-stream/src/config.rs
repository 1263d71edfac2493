//! Configuration for streams and sessions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for block streams created on the render side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Prefix for shared-memory region names and notify socket paths.
    pub shm_prefix: String,
    /// Blocks per pool. Bounds how many requests can be in flight before the
    /// producer sees backpressure.
    pub block_count: u32,
    /// Directory for notify datagram sockets.
    pub notify_dir: PathBuf,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            shm_prefix: "aulos".to_string(),
            block_count: 32,
            notify_dir: std::env::temp_dir(),
        }
    }
}

/// Settings for the session client connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub socket_path: PathBuf,
    pub target_latency_ms: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            socket_path: std::env::temp_dir().join("aulos-session.sock"),
            target_latency_ms: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let stream = StreamConfig::default();
        assert_eq!(stream.block_count, 32);
        assert_eq!(stream.shm_prefix, "aulos");

        let session = SessionConfig::default();
        assert_eq!(session.target_latency_ms, 20);
    }
}
