//! Channel up/down-mixing for graph-edge input summing.
//!
//! When both channel counts are canonical speaker layouts (mono, stereo, quad,
//! 5.1), inputs are summed with fixed speaker-aware coefficients. Every other
//! pairing falls back to discrete accumulation: channel `i` adds into channel
//! `i` for the shared prefix, remaining output channels stay untouched.
//!
//! Channel orderings: mono `[M]`, stereo `[L R]`, quad `[L R SL SR]`,
//! 5.1 `[L R C LFE SL SR]`.

use crate::bus::AudioBus;

const SQRT_HALF: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Zero `output`, then sum every present input with speaker-aware mixing.
pub fn mix_inputs_into(output: &mut AudioBus, inputs: &[Option<&AudioBus>]) {
    output.zero();
    for input in inputs.iter().flatten() {
        mix_bus_into(output, input);
    }
}

/// Zero `output`, then sum every present input channel-for-channel, ignoring
/// speaker layouts. Used where per-layout mixing is explicitly disabled.
pub fn mix_inputs_discrete_into(output: &mut AudioBus, inputs: &[Option<&AudioBus>]) {
    output.zero();
    for input in inputs.iter().flatten() {
        add_discrete(output, input);
    }
}

fn mix_bus_into(output: &mut AudioBus, input: &AudioBus) {
    let frames = output.frames().min(input.frames());
    match (input.channel_count(), output.channel_count()) {
        (1, 2) | (1, 4) => {
            // Up-mix mono into the front pair.
            for ch in 0..2 {
                accumulate(output.channel_mut(ch), input.channel(0), frames, 1.0);
            }
        }
        (1, 6) => {
            // Mono goes to center.
            accumulate(output.channel_mut(2), input.channel(0), frames, 1.0);
        }
        (2, 1) => {
            let dst = output.channel_mut(0);
            let (l, r) = (input.channel(0), input.channel(1));
            for i in 0..frames {
                dst[i] += 0.5 * (l[i] + r[i]);
            }
        }
        (2, 4) | (2, 6) => {
            for ch in 0..2 {
                accumulate(output.channel_mut(ch), input.channel(ch), frames, 1.0);
            }
        }
        (4, 1) => {
            let dst = output.channel_mut(0);
            for i in 0..frames {
                dst[i] += 0.25
                    * (input.channel(0)[i]
                        + input.channel(1)[i]
                        + input.channel(2)[i]
                        + input.channel(3)[i]);
            }
        }
        (4, 2) => {
            for ch in 0..2 {
                let dst = output.channel_mut(ch);
                let (front, surround) = (input.channel(ch), input.channel(ch + 2));
                for i in 0..frames {
                    dst[i] += 0.5 * (front[i] + surround[i]);
                }
            }
        }
        (4, 6) => {
            // Quad [L R SL SR] into 5.1 [L R C LFE SL SR].
            for (src, dst) in [(0, 0), (1, 1), (2, 4), (3, 5)] {
                accumulate(output.channel_mut(dst), input.channel(src), frames, 1.0);
            }
        }
        (6, 1) => {
            // LFE is dropped.
            let dst = output.channel_mut(0);
            for i in 0..frames {
                dst[i] += SQRT_HALF * (input.channel(0)[i] + input.channel(1)[i])
                    + input.channel(2)[i]
                    + 0.5 * (input.channel(4)[i] + input.channel(5)[i]);
            }
        }
        (6, 2) => {
            for ch in 0..2 {
                let dst = output.channel_mut(ch);
                let (front, center, surround) =
                    (input.channel(ch), input.channel(2), input.channel(ch + 4));
                for i in 0..frames {
                    dst[i] += front[i] + SQRT_HALF * (center[i] + surround[i]);
                }
            }
        }
        (6, 4) => {
            for ch in 0..2 {
                let dst = output.channel_mut(ch);
                let (front, center) = (input.channel(ch), input.channel(2));
                for i in 0..frames {
                    dst[i] += front[i] + SQRT_HALF * center[i];
                }
            }
            accumulate(output.channel_mut(2), input.channel(4), frames, 1.0);
            accumulate(output.channel_mut(3), input.channel(5), frames, 1.0);
        }
        // Equal counts and anything outside {1, 2, 4, 6} x {1, 2, 4, 6}.
        _ => add_discrete(output, input),
    }
}

fn add_discrete(output: &mut AudioBus, input: &AudioBus) {
    let frames = output.frames().min(input.frames());
    let shared = output.channel_count().min(input.channel_count());
    for ch in 0..shared {
        accumulate(output.channel_mut(ch), input.channel(ch), frames, 1.0);
    }
}

#[inline]
fn accumulate(dst: &mut [f32], src: &[f32], frames: usize, gain: f32) {
    for i in 0..frames {
        dst[i] += gain * src[i];
    }
}

/// Pack a planar bus into one interleaved-by-channel float array, for
/// hardware or IPC boundaries. Returns the number of frames written.
pub fn interleave_into(bus: &AudioBus, out: &mut [f32]) -> usize {
    let channels = bus.channel_count();
    if channels == 0 {
        return 0;
    }
    let frames = bus.frames().min(out.len() / channels);
    for ch in 0..channels {
        let src = bus.channel(ch);
        for (frame, &sample) in src.iter().take(frames).enumerate() {
            out[frame * channels + ch] = sample;
        }
    }
    frames
}

/// Unpack interleaved samples into a planar bus. Channels beyond the
/// interleaved channel count are zeroed. Returns the number of frames read.
pub fn deinterleave_into(samples: &[f32], channel_count: usize, bus: &mut AudioBus) -> usize {
    if channel_count == 0 {
        bus.zero();
        return 0;
    }
    let frames = bus.frames().min(samples.len() / channel_count);
    let shared = bus.channel_count().min(channel_count);
    for ch in 0..shared {
        let dst = bus.channel_mut(ch);
        for (frame, sample) in dst.iter_mut().take(frames).enumerate() {
            *sample = samples[frame * channel_count + ch];
        }
        dst[frames..].fill(0.0);
    }
    for ch in shared..bus.channel_count() {
        bus.channel_mut(ch).fill(0.0);
    }
    frames
}
