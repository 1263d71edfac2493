//! Block processors: the computation a worker runs per request block.

use aulos_stream::{BlockHeader, StreamBinding};
use std::sync::Arc;

/// Computes one response payload from one request payload. Both are
/// interleaved-by-channel f32 samples; `input` carries
/// `buffer_size * input_channel_count` samples, `output` is pre-zeroed with
/// `buffer_size * output_channel_count` samples.
pub trait BlockProcessor: Send {
    fn process(&mut self, header: &BlockHeader, input: &[f32], output: &mut [f32]);
}

/// Builds a processor for each node the worker is asked to serve.
pub type ProcessorFactory = Arc<dyn Fn(&StreamBinding) -> Box<dyn BlockProcessor> + Send + Sync>;

/// Copies input channels to output channels frame by frame; channels without
/// a counterpart stay silent.
pub struct PassthroughProcessor;

impl BlockProcessor for PassthroughProcessor {
    fn process(&mut self, header: &BlockHeader, input: &[f32], output: &mut [f32]) {
        copy_frames(header, input, output, 1.0);
    }
}

/// Passthrough with a fixed gain.
pub struct GainProcessor {
    pub gain: f32,
}

impl BlockProcessor for GainProcessor {
    fn process(&mut self, header: &BlockHeader, input: &[f32], output: &mut [f32]) {
        copy_frames(header, input, output, self.gain);
    }
}

fn copy_frames(header: &BlockHeader, input: &[f32], output: &mut [f32], gain: f32) {
    let in_channels = header.input_channel_count as usize;
    let out_channels = header.output_channel_count as usize;
    if in_channels == 0 || out_channels == 0 {
        return;
    }
    let frames = (input.len() / in_channels)
        .min(output.len() / out_channels)
        .min(header.buffer_size as usize);
    let shared = in_channels.min(out_channels);
    for frame in 0..frames {
        for ch in 0..shared {
            output[frame * out_channels + ch] = gain * input[frame * in_channels + ch];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_maps_shared_channels() {
        // 2-in, 3-out: third output channel stays silent.
        let header = BlockHeader::request(1, 0.0, 2, 2, 3);
        let input = [1.0, 2.0, 3.0, 4.0];
        let mut output = [0.0f32; 6];
        PassthroughProcessor.process(&header, &input, &mut output);
        assert_eq!(output, [1.0, 2.0, 0.0, 3.0, 4.0, 0.0]);
    }

    #[test]
    fn test_gain_scales() {
        let header = BlockHeader::request(1, 0.0, 2, 1, 1);
        let input = [1.0, -1.0];
        let mut output = [0.0f32; 2];
        GainProcessor { gain: 0.5 }.process(&header, &input, &mut output);
        assert_eq!(output, [0.5, -0.5]);
    }

    #[test]
    fn test_zero_channels_is_a_no_op() {
        let header = BlockHeader::request(1, 0.0, 2, 0, 1);
        let mut output = [0.0f32; 2];
        PassthroughProcessor.process(&header, &[], &mut output);
        assert_eq!(output, [0.0, 0.0]);
    }
}
