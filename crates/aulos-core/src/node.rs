//! The render node trait and the built-in node types.

use crate::bus::AudioBus;

/// Timing context for one render quantum.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext {
    pub sample_rate: f64,
    pub quantum_frames: usize,
    /// Frames rendered before this quantum started.
    pub current_frame: u64,
    /// `current_frame` expressed in seconds.
    pub playback_time: f64,
}

/// One audio-processing unit.
///
/// `inputs[slot]` is the already-mixed bus for that input slot (the scheduler
/// sums and up/down-mixes upstream connections before calling `process`).
/// `outputs` are the node's own buses; their previous-quantum contents must be
/// fully overwritten. Implementations must not allocate, lock, or block: this
/// runs on the audio callback thread.
pub trait RenderNode: Send {
    fn process(&mut self, ctx: &RenderContext, inputs: &[AudioBus], outputs: &mut [AudioBus]);

    fn input_count(&self) -> usize {
        1
    }

    fn output_count(&self) -> usize {
        1
    }
}

/// The graph's sink. Its single output bus is the quantum's final result.
pub struct DestinationNode;

impl RenderNode for DestinationNode {
    fn process(&mut self, _ctx: &RenderContext, inputs: &[AudioBus], outputs: &mut [AudioBus]) {
        outputs[0].copy_from(&inputs[0]);
    }
}

/// Scales its mixed input by a fixed factor.
pub struct GainNode {
    gain: f32,
}

impl GainNode {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }
}

impl RenderNode for GainNode {
    fn process(&mut self, _ctx: &RenderContext, inputs: &[AudioBus], outputs: &mut [AudioBus]) {
        let input = &inputs[0];
        let output = &mut outputs[0];
        output.copy_from(input);
        for ch in 0..output.channel_count() {
            for sample in output.channel_mut(ch) {
                *sample *= self.gain;
            }
        }
    }
}

/// Emits a constant value on every output channel.
pub struct ConstantSourceNode {
    value: f32,
}

impl ConstantSourceNode {
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl RenderNode for ConstantSourceNode {
    fn process(&mut self, _ctx: &RenderContext, _inputs: &[AudioBus], outputs: &mut [AudioBus]) {
        let output = &mut outputs[0];
        for ch in 0..output.channel_count() {
            output.channel_mut(ch).fill(self.value);
        }
    }

    fn input_count(&self) -> usize {
        0
    }
}

/// Fixed-frequency sine oscillator, identical signal on every channel.
pub struct SineNode {
    frequency: f64,
    phase: f64,
}

impl SineNode {
    pub fn new(frequency: f64) -> Self {
        Self {
            frequency,
            phase: 0.0,
        }
    }
}

impl RenderNode for SineNode {
    fn process(&mut self, ctx: &RenderContext, _inputs: &[AudioBus], outputs: &mut [AudioBus]) {
        let output = &mut outputs[0];
        let step = self.frequency / ctx.sample_rate;
        let frames = output.frames();
        let start_phase = self.phase;
        for frame in 0..frames {
            let phase = start_phase + step * frame as f64;
            let sample = (phase * std::f64::consts::TAU).sin() as f32;
            for ch in 0..output.channel_count() {
                output.channel_mut(ch)[frame] = sample;
            }
        }
        self.phase = (start_phase + step * frames as f64).fract();
    }

    fn input_count(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ctx(frames: usize) -> RenderContext {
        RenderContext {
            sample_rate: 48_000.0,
            quantum_frames: frames,
            current_frame: 0,
            playback_time: 0.0,
        }
    }

    #[test]
    fn test_gain_scales_input() {
        let mut node = GainNode::new(0.5);
        let mut input = AudioBus::new(2, 4);
        input.channel_mut(0).fill(1.0);
        input.channel_mut(1).fill(-1.0);
        let mut outputs = vec![AudioBus::new(2, 4)];
        node.process(&ctx(4), std::slice::from_ref(&input), &mut outputs);
        assert_eq!(outputs[0].channel(0), &[0.5; 4]);
        assert_eq!(outputs[0].channel(1), &[-0.5; 4]);
    }

    #[test]
    fn test_constant_fills_every_channel() {
        let mut node = ConstantSourceNode::new(0.25);
        let mut outputs = vec![AudioBus::new(2, 8)];
        node.process(&ctx(8), &[], &mut outputs);
        assert_eq!(outputs[0].channel(0), &[0.25; 8]);
        assert_eq!(outputs[0].channel(1), &[0.25; 8]);
    }

    #[test]
    fn test_sine_phase_is_continuous_across_quanta() {
        let mut node = SineNode::new(1_000.0);
        let mut outputs = vec![AudioBus::new(1, 16)];
        node.process(&ctx(16), &[], &mut outputs);
        let last = outputs[0].channel(0)[15];
        node.process(&ctx(16), &[], &mut outputs);
        let first = outputs[0].channel(0)[0];

        // One sample step at 1 kHz / 48 kHz.
        let step = 1_000.0 / 48_000.0 * std::f64::consts::TAU;
        let expected = (16.0 * step).sin() as f32;
        assert_relative_eq!(first, expected, epsilon = 1e-5);
        assert_ne!(last, first);
    }

    #[test]
    fn test_destination_copies_mixed_input() {
        let mut node = DestinationNode;
        let mut input = AudioBus::new(2, 4);
        input.channel_mut(0).fill(0.1);
        let mut outputs = vec![AudioBus::new(2, 4)];
        node.process(&ctx(4), std::slice::from_ref(&input), &mut outputs);
        assert_eq!(outputs[0].channel(0), &[0.1; 4]);
        assert_eq!(outputs[0].channel(1), &[0.0; 4]);
    }
}
