//! Planar multi-channel sample buffers.

/// A fixed-size planar sample buffer: one `f32` slice per channel, all holding
/// the same number of frames.
///
/// A bus is owned by the node that produces it and lives for one render
/// quantum: the backing storage is reused across quanta and the contents are
/// overwritten each time.
#[derive(Debug, Clone)]
pub struct AudioBus {
    channels: Vec<Vec<f32>>,
    frames: usize,
}

impl AudioBus {
    /// Create a zeroed bus with `channel_count` channels of `frames` samples.
    pub fn new(channel_count: usize, frames: usize) -> Self {
        Self {
            channels: (0..channel_count).map(|_| vec![0.0; frames]).collect(),
            frames,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index]
    }

    /// Zero every channel.
    pub fn zero(&mut self) {
        for channel in &mut self.channels {
            channel.fill(0.0);
        }
    }

    /// Copy the channel-matched prefix of `source` into this bus. Channels
    /// present here but not in `source` are zeroed.
    pub fn copy_from(&mut self, source: &AudioBus) {
        let frames = self.frames.min(source.frames);
        let shared = self.channel_count().min(source.channel_count());
        for ch in 0..shared {
            self.channels[ch][..frames].copy_from_slice(&source.channels[ch][..frames]);
        }
        for channel in self.channels.iter_mut().skip(shared) {
            channel.fill(0.0);
        }
    }

    /// True when every sample in every channel is exactly zero.
    pub fn is_silent(&self) -> bool {
        self.channels
            .iter()
            .all(|channel| channel.iter().all(|&sample| sample == 0.0))
    }
}
