//! CPAL output driver (requires the `device-io` feature).
//!
//! Pulls fixed-size quanta from the renderer and adapts them to whatever
//! buffer sizes and channel count the device callback asks for.

use crate::error::{Error, Result};
use aulos_core::Renderer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

/// Wrapper to hold `cpal::Stream` in a `Send` context.
///
/// # Safety
/// `cpal::Stream` is `!Send` due to platform internals. This is safe because
/// the driver is only ever touched from the thread that created it.
struct StreamHandle(#[allow(dead_code)] cpal::Stream);

unsafe impl Send for StreamHandle {}

/// A running output stream owning the renderer.
pub struct OutputDriver {
    _stream: StreamHandle,
    sample_rate: f64,
    channels: usize,
}

impl OutputDriver {
    /// Build and start a stream on the default output device.
    pub(crate) fn start(renderer: Renderer) -> Result<Self> {
        let device = default_device()?;
        let config = device.default_output_config()?;
        let sample_rate = config.sample_rate().0 as f64;
        let channels = config.channels() as usize;

        if (sample_rate - renderer.config().sample_rate).abs() > f64::EPSILON {
            tracing::warn!(
                device_rate = sample_rate,
                render_rate = renderer.config().sample_rate,
                "device sample rate differs from render config"
            );
        }

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config.into(), renderer)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config.into(), renderer)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config.into(), renderer)?,
            format => {
                return Err(Error::InvalidConfig(format!(
                    "unsupported sample format: {format:?}"
                )));
            }
        };
        stream.play()?;

        Ok(Self {
            _stream: StreamHandle(stream),
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

fn default_device() -> Result<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::InvalidDevice("no output device available".into()))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    renderer: Renderer,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut adapter = QuantumAdapter::new(renderer, config.channels as usize);
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| adapter.fill(data),
        |error| tracing::error!(%error, "output stream error"),
        None,
    )?;
    Ok(stream)
}

/// Re-blocks fixed-size quanta into arbitrary device callback sizes.
struct QuantumAdapter {
    renderer: Renderer,
    channels: usize,
    carry: Vec<f32>,
    carry_pos: usize,
}

impl QuantumAdapter {
    fn new(renderer: Renderer, channels: usize) -> Self {
        let quantum_frames = renderer.config().quantum_frames;
        Self {
            renderer,
            channels,
            carry: vec![0.0; quantum_frames * channels],
            carry_pos: 0,
        }
    }

    fn fill<T: cpal::SizedSample + cpal::FromSample<f32>>(&mut self, data: &mut [T]) {
        let mut written = 0;
        while written < data.len() {
            if self.carry_pos >= self.carry.len() {
                self.render_next_quantum();
            }
            let take = (data.len() - written).min(self.carry.len() - self.carry_pos);
            for (dst, &src) in data[written..written + take]
                .iter_mut()
                .zip(&self.carry[self.carry_pos..self.carry_pos + take])
            {
                *dst = T::from_sample(src);
            }
            self.carry_pos += take;
            written += take;
        }
    }

    fn render_next_quantum(&mut self) {
        self.carry.fill(0.0);
        if let Some(bus) = self.renderer.render_quantum() {
            let frames = bus.frames().min(self.carry.len() / self.channels);
            let shared = bus.channel_count().min(self.channels);
            for ch in 0..shared {
                let src = bus.channel(ch);
                for frame in 0..frames {
                    self.carry[frame * self.channels + ch] = src[frame];
                }
            }
        }
        self.carry_pos = 0;
    }
}
