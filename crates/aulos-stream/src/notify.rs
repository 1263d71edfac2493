//! Wake signaling between block-stream producers and consumers.
//!
//! A single writable signal, woken once per batch of submitted ready blocks.
//! Implemented over nonblocking Unix datagram sockets addressed by filesystem
//! path, so the pair crosses processes by name just like the shared-memory
//! regions. Receivers must drain *all* ready blocks per wake, not just one —
//! wakes are coalesced, not counted.

use crate::error::Result;
use std::io::ErrorKind;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// The receiving end. Owns the socket path and unlinks it on drop.
pub struct NotifyListener {
    socket: UnixDatagram,
    path: PathBuf,
}

impl NotifyListener {
    /// Bind the wake socket, replacing any stale path.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let _ = std::fs::remove_file(&path);
        let socket = UnixDatagram::bind(&path)?;
        Ok(Self { socket, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until a wake arrives or the timeout passes. Returns whether a
    /// wake was seen. Not for use on the render thread.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        self.socket.set_read_timeout(timeout)?;
        let mut byte = [0u8; 1];
        match self.socket.recv(&mut byte) {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Consume every pending wake without blocking. Returns the number
    /// drained.
    pub fn drain(&self) -> usize {
        if self.socket.set_nonblocking(true).is_err() {
            return 0;
        }
        let mut drained = 0;
        let mut byte = [0u8; 1];
        while self.socket.recv(&mut byte).is_ok() {
            drained += 1;
        }
        let _ = self.socket.set_nonblocking(false);
        drained
    }
}

impl Drop for NotifyListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// The sending end. Connects lazily so the producer can exist before the
/// listener has bound its path; until then signals are quietly dropped, which
/// is correct — nothing is waiting yet.
pub struct NotifySignal {
    path: PathBuf,
    socket: OnceLock<UnixDatagram>,
}

impl NotifySignal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            socket: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn socket(&self) -> Option<&UnixDatagram> {
        if let Some(socket) = self.socket.get() {
            return Some(socket);
        }
        let socket = UnixDatagram::unbound().ok()?;
        let _ = socket.set_nonblocking(true);
        let _ = self.socket.set(socket);
        self.socket.get()
    }

    /// Fire one wake. Never blocks: a full socket buffer means a wake is
    /// already pending, which is success for a coalescing signal.
    pub fn signal(&self) {
        let Some(socket) = self.socket() else {
            return;
        };
        match socket.send_to(&[1u8], &self.path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => {
                tracing::trace!(path = %self.path.display(), "notify send failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_wakes_waiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify.sock");
        let listener = NotifyListener::bind(&path).unwrap();
        let signal = NotifySignal::new(&path);

        signal.signal();
        assert!(listener.wait(Some(Duration::from_millis(200))).unwrap());
    }

    #[test]
    fn test_wait_times_out_without_signal() {
        let dir = tempfile::tempdir().unwrap();
        let listener = NotifyListener::bind(dir.path().join("notify.sock")).unwrap();
        assert!(!listener.wait(Some(Duration::from_millis(10))).unwrap());
    }

    #[test]
    fn test_drain_consumes_all_pending_wakes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify.sock");
        let listener = NotifyListener::bind(&path).unwrap();
        let signal = NotifySignal::new(&path);

        for _ in 0..3 {
            signal.signal();
        }
        assert!(listener.drain() >= 1);
        assert!(!listener.wait(Some(Duration::from_millis(10))).unwrap());
    }

    #[test]
    fn test_signal_without_listener_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let signal = NotifySignal::new(dir.path().join("missing.sock"));
        signal.signal();
        signal.signal();
    }
}
