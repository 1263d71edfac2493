//! Wire formats for the streaming layer.
//!
//! Two kinds of data live here. Block headers travel through shared memory
//! and have a normative 40-byte little-endian layout, so they are packed by
//! hand rather than through serde. Control-plane messages travel over the
//! length-prefixed bincode sockets and are ordinary serde enums.

use crate::shared_memory::RegionHandle;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// "AURQ" — request block.
pub const BLOCK_REQUEST_MAGIC: u32 = 0x4155_5251;
/// "AURP" — response block.
pub const BLOCK_RESPONSE_MAGIC: u32 = 0x4155_5250;
pub const BLOCK_PROTOCOL_VERSION: u32 = 1;

/// Encoded size of [`BlockHeader`].
pub const BLOCK_HEADER_BYTES: usize = 40;

/// Header at the start of every stream block, followed by
/// `buffer_size * channel_count` interleaved-by-channel f32 samples (input
/// channels for requests, output channels for responses).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockHeader {
    pub magic: u32,
    pub version: u32,
    pub node_id: u64,
    pub playback_time: f64,
    pub buffer_size: u32,
    pub input_channel_count: u32,
    pub output_channel_count: u32,
    pub reserved: u32,
}

impl BlockHeader {
    pub fn request(
        node_id: u64,
        playback_time: f64,
        buffer_size: u32,
        input_channel_count: u32,
        output_channel_count: u32,
    ) -> Self {
        Self {
            magic: BLOCK_REQUEST_MAGIC,
            version: BLOCK_PROTOCOL_VERSION,
            node_id,
            playback_time,
            buffer_size,
            input_channel_count,
            output_channel_count,
            reserved: 0,
        }
    }

    /// The response header mirroring a request.
    pub fn response_for(request: &BlockHeader) -> Self {
        Self {
            magic: BLOCK_RESPONSE_MAGIC,
            ..*request
        }
    }

    pub fn is_request(&self) -> bool {
        self.magic == BLOCK_REQUEST_MAGIC
    }

    pub fn is_response(&self) -> bool {
        self.magic == BLOCK_RESPONSE_MAGIC
    }

    /// Samples in this block's payload: input channels for requests, output
    /// channels for responses.
    pub fn payload_samples(&self) -> usize {
        let channels = if self.is_response() {
            self.output_channel_count
        } else {
            self.input_channel_count
        };
        self.buffer_size as usize * channels as usize
    }

    /// Pack into the normative little-endian layout. `out` must hold at least
    /// [`BLOCK_HEADER_BYTES`].
    pub fn write_to(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..16].copy_from_slice(&self.node_id.to_le_bytes());
        out[16..24].copy_from_slice(&self.playback_time.to_le_bytes());
        out[24..28].copy_from_slice(&self.buffer_size.to_le_bytes());
        out[28..32].copy_from_slice(&self.input_channel_count.to_le_bytes());
        out[32..36].copy_from_slice(&self.output_channel_count.to_le_bytes());
        out[36..40].copy_from_slice(&self.reserved.to_le_bytes());
    }

    /// Decode from the normative layout. `None` when the buffer is short.
    pub fn read_from(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < BLOCK_HEADER_BYTES {
            return None;
        }
        let u32_at = |offset: usize| {
            u32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("4-byte slice"))
        };
        Some(Self {
            magic: u32_at(0),
            version: u32_at(4),
            node_id: u64::from_le_bytes(bytes[8..16].try_into().expect("8-byte slice")),
            playback_time: f64::from_le_bytes(bytes[16..24].try_into().expect("8-byte slice")),
            buffer_size: u32_at(24),
            input_channel_count: u32_at(28),
            output_channel_count: u32_at(32),
            reserved: u32_at(36),
        })
    }
}

/// Identifies an output device; opaque to this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle(pub u64);

/// The three shared regions backing one block stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub pool: RegionHandle,
    pub ready_ring: RegionHandle,
    pub free_ring: RegionHandle,
}

/// Everything a worker needs to serve one remote node: the request stream it
/// consumes, the response stream it produces into, and the wake socket the
/// renderer signals after submitting requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamBinding {
    pub node_id: u64,
    pub buffer_size: u32,
    pub input_channel_count: u32,
    pub output_channel_count: u32,
    pub request_stream: StreamDescriptor,
    pub response_stream: StreamDescriptor,
    pub request_notify_path: PathBuf,
}

/// Host to worker control messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HostMessage {
    /// Replace the full set of stream bindings; nodes absent from the list
    /// are unbound.
    SetStreamBindings { bindings: Vec<StreamBinding> },
    ClearStreamBindings,
    Shutdown,
}

/// Worker to host control messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerMessage {
    Ready,
    BindingsApplied { count: usize },
    Error { message: String },
}

/// Session client to audio service requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionRequest {
    CreateSession {
        request_token: u64,
        device: DeviceHandle,
        target_latency_ms: u32,
    },
    DestroySession {
        request_token: u64,
        session_id: u64,
    },
}

/// Audio service to session client responses and notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionResponse {
    SessionCreated { request_token: u64, session_id: u64 },
    OutputSinkReady { session_id: u64 },
    OutputSinkFailed { session_id: u64, error: String },
    RequestError { request_token: u64, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let header = BlockHeader::request(7, 1.25, 128, 2, 4);
        let mut bytes = [0u8; BLOCK_HEADER_BYTES];
        header.write_to(&mut bytes);
        let decoded = BlockHeader::read_from(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_request());
        assert_eq!(decoded.payload_samples(), 256);
    }

    #[test]
    fn test_response_mirrors_request() {
        let request = BlockHeader::request(9, 0.0, 128, 2, 6);
        let response = BlockHeader::response_for(&request);
        assert!(response.is_response());
        assert_eq!(response.node_id, 9);
        assert_eq!(response.payload_samples(), 128 * 6);
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(BlockHeader::read_from(&[0u8; 16]).is_none());
    }

    #[test]
    fn test_layout_is_little_endian_field_order() {
        let header = BlockHeader::request(0x0102_0304_0506_0708, 0.0, 1, 2, 3);
        let mut bytes = [0u8; BLOCK_HEADER_BYTES];
        header.write_to(&mut bytes);
        assert_eq!(&bytes[0..4], &BLOCK_REQUEST_MAGIC.to_le_bytes());
        assert_eq!(bytes[8], 0x08);
        assert_eq!(bytes[15], 0x01);
        assert_eq!(&bytes[24..28], &1u32.to_le_bytes());
    }

    #[test]
    fn test_control_messages_serialize() {
        let msg = HostMessage::SetStreamBindings { bindings: vec![] };
        let encoded = bincode::serialize(&msg).unwrap();
        assert!(matches!(
            bincode::deserialize(&encoded).unwrap(),
            HostMessage::SetStreamBindings { bindings } if bindings.is_empty()
        ));
    }
}
