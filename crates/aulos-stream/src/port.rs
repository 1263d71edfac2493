//! Request/response stream pairing for one remote processing node.
//!
//! The render side holds a [`ProcessorPort`]: it submits one request block
//! per quantum and drains whatever responses have arrived, substituting
//! silence when nothing valid came back — the real-time thread never waits
//! for the remote worker. The worker side holds the mirrored
//! [`ProcessorEndpoint`] and may block on the wake signal between batches.

use crate::block::{BlockStream, BlockStreamConsumer, BlockStreamProducer};
use crate::config::StreamConfig;
use crate::error::Result;
use crate::notify::{NotifyListener, NotifySignal};
use crate::protocol::{BlockHeader, StreamBinding, BLOCK_HEADER_BYTES};
use aulos_core::{deinterleave_into, AudioBus, RenderContext, RenderNode};
use std::time::Duration;

fn block_bytes(buffer_size: u32, channel_count: u32) -> u32 {
    BLOCK_HEADER_BYTES as u32 + buffer_size * channel_count * 4
}

/// Render-process side of one remote node's streams.
pub struct ProcessorPort {
    node_id: u64,
    buffer_size: u32,
    input_channel_count: u32,
    output_channel_count: u32,
    requests: BlockStreamProducer,
    responses: BlockStreamConsumer,
    notify: NotifySignal,
    binding: StreamBinding,
    scratch: Vec<f32>,
}

impl ProcessorPort {
    /// Create both streams and the wake socket for one node. The returned
    /// [`StreamBinding`] is what the control plane publishes to the worker.
    pub fn create(
        config: &StreamConfig,
        node_id: u64,
        buffer_size: u32,
        input_channel_count: u32,
        output_channel_count: u32,
    ) -> Result<Self> {
        let prefix = format!(
            "{}_{}_n{}",
            config.shm_prefix,
            std::process::id(),
            node_id
        );

        let request_stream = BlockStream::create(
            &format!("{prefix}_req"),
            block_bytes(buffer_size, input_channel_count),
            config.block_count,
        )?;
        let response_stream = BlockStream::create(
            &format!("{prefix}_rsp"),
            block_bytes(buffer_size, output_channel_count),
            config.block_count,
        )?;
        let notify_path = config.notify_dir.join(format!("{prefix}_notify.sock"));

        let binding = StreamBinding {
            node_id,
            buffer_size,
            input_channel_count,
            output_channel_count,
            request_stream: request_stream.descriptor(),
            response_stream: response_stream.descriptor(),
            request_notify_path: notify_path.clone(),
        };

        Ok(Self {
            node_id,
            buffer_size,
            input_channel_count,
            output_channel_count,
            requests: request_stream.into_producer(),
            responses: response_stream.into_consumer(),
            notify: NotifySignal::new(notify_path),
            binding,
            scratch: vec![0.0; buffer_size as usize * input_channel_count.max(1) as usize],
        })
    }

    pub fn binding(&self) -> &StreamBinding {
        &self.binding
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Submit this quantum's input. `false` means backpressure (no free
    /// block) and the caller should expect silence for this round trip.
    pub fn submit_request(&mut self, playback_time: f64, input: &AudioBus) -> bool {
        // Pack with the negotiated channel stride even when the bus format
        // disagrees; missing channels and frames stay zero.
        self.scratch.fill(0.0);
        let stride = self.input_channel_count as usize;
        let frames = (self.buffer_size as usize).min(input.frames());
        for ch in 0..stride.min(input.channel_count()) {
            let src = input.channel(ch);
            for (frame, &sample) in src.iter().take(frames).enumerate() {
                self.scratch[frame * stride + ch] = sample;
            }
        }
        let header = BlockHeader::request(
            self.node_id,
            playback_time,
            self.buffer_size,
            self.input_channel_count,
            self.output_channel_count,
        );
        let submitted = self.requests.try_submit(&header, &self.scratch);
        if submitted {
            self.notify.signal();
        }
        submitted
    }

    /// Drain all ready responses; copy the first valid match into `dest`.
    /// Returns whether anything valid arrived — when it did not, the caller
    /// is responsible for substituting silence.
    pub fn receive_into(&mut self, dest: &mut AudioBus) -> bool {
        let node_id = self.node_id;
        let buffer_size = self.buffer_size;
        let output_channel_count = self.output_channel_count;
        let mut found = false;
        self.responses.drain(|header, payload| {
            if found {
                return;
            }
            if !header.is_response()
                || header.node_id != node_id
                || header.buffer_size != buffer_size
                || header.output_channel_count != output_channel_count
            {
                tracing::warn!(
                    expected_node = node_id,
                    got_node = header.node_id,
                    "discarding mismatched response block"
                );
                return;
            }
            deinterleave_into(payload, output_channel_count as usize, dest);
            found = true;
        });
        found
    }
}

/// Worker-process side of one remote node's streams.
pub struct ProcessorEndpoint {
    node_id: u64,
    buffer_size: u32,
    output_channel_count: u32,
    requests: BlockStreamConsumer,
    responses: BlockStreamProducer,
    notify: NotifyListener,
    out_scratch: Vec<f32>,
}

impl ProcessorEndpoint {
    pub fn attach(binding: &StreamBinding) -> Result<Self> {
        Ok(Self {
            node_id: binding.node_id,
            buffer_size: binding.buffer_size,
            output_channel_count: binding.output_channel_count,
            requests: BlockStreamConsumer::attach(&binding.request_stream)?,
            responses: BlockStreamProducer::attach(&binding.response_stream)?,
            notify: NotifyListener::bind(&binding.request_notify_path)?,
            out_scratch: vec![
                0.0;
                binding.buffer_size as usize
                    * binding.output_channel_count.max(1) as usize
            ],
        })
    }

    /// Block until the renderer signals new requests, or the timeout passes.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        let woke = self.notify.wait(timeout)?;
        if woke {
            // Wakes are batched: one signal may cover several blocks.
            self.notify.drain();
        }
        Ok(woke)
    }

    /// Drain all pending requests, run `process` on each valid one, and
    /// submit the response blocks. Returns how many requests were processed.
    pub fn process_pending(
        &mut self,
        mut process: impl FnMut(&BlockHeader, &[f32], &mut [f32]),
    ) -> usize {
        let Self {
            node_id,
            buffer_size,
            output_channel_count,
            requests,
            responses,
            out_scratch,
            ..
        } = self;

        let mut handled = 0;
        requests.drain(|header, payload| {
            if !header.is_request()
                || header.node_id != *node_id
                || header.buffer_size != *buffer_size
            {
                tracing::warn!(
                    expected_node = *node_id,
                    got_node = header.node_id,
                    "discarding mismatched request block"
                );
                return;
            }

            out_scratch.fill(0.0);
            process(header, payload, out_scratch);

            let mut response = BlockHeader::response_for(header);
            response.output_channel_count = *output_channel_count;
            if !responses.try_submit(&response, out_scratch) {
                tracing::trace!(
                    node_id = *node_id,
                    "response pool exhausted, renderer will substitute silence"
                );
                return;
            }
            handled += 1;
        });
        handled
    }
}

/// A graph node whose output is computed by the remote worker through a
/// [`ProcessorPort`].
pub struct WorkletNode {
    port: ProcessorPort,
}

impl WorkletNode {
    pub fn new(port: ProcessorPort) -> Self {
        Self { port }
    }

    pub fn binding(&self) -> &StreamBinding {
        &self.port.binding
    }
}

impl RenderNode for WorkletNode {
    fn process(&mut self, ctx: &RenderContext, inputs: &[AudioBus], outputs: &mut [AudioBus]) {
        self.port.submit_request(ctx.playback_time, &inputs[0]);
        if !self.port.receive_into(&mut outputs[0]) {
            outputs[0].zero();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;

    fn test_config(tag: &str) -> StreamConfig {
        StreamConfig {
            shm_prefix: format!("aulos_test_port_{tag}"),
            block_count: 4,
            notify_dir: std::env::temp_dir(),
        }
    }

    fn filled_bus(channels: usize, frames: usize, value: f32) -> AudioBus {
        let mut bus = AudioBus::new(channels, frames);
        for ch in 0..channels {
            bus.channel_mut(ch).fill(value);
        }
        bus
    }

    #[test]
    fn test_round_trip_through_endpoint() {
        let mut port = ProcessorPort::create(&test_config("rt"), 11, 8, 2, 2).unwrap();
        let mut endpoint = ProcessorEndpoint::attach(&port.binding().clone()).unwrap();

        let input = filled_bus(2, 8, 0.5);
        assert!(port.submit_request(0.0, &input));
        assert!(endpoint.wait(Some(Duration::from_millis(200))).unwrap());

        // Double every sample.
        let handled = endpoint.process_pending(|_, input, output| {
            for (out, inp) in output.iter_mut().zip(input) {
                *out = inp * 2.0;
            }
        });
        assert_eq!(handled, 1);

        let mut dest = AudioBus::new(2, 8);
        assert!(port.receive_into(&mut dest));
        assert_eq!(dest.channel(0), &[1.0; 8]);
        assert_eq!(dest.channel(1), &[1.0; 8]);
    }

    #[test]
    fn test_no_response_leaves_destination_untouched_by_port() {
        let mut port = ProcessorPort::create(&test_config("empty"), 3, 8, 2, 2).unwrap();
        let mut dest = AudioBus::new(2, 8);
        assert!(!port.receive_into(&mut dest));
    }

    #[test]
    fn test_worklet_node_substitutes_silence_without_worker() {
        let port = ProcessorPort::create(&test_config("silence"), 4, 8, 2, 2).unwrap();
        let mut node = WorkletNode::new(port);

        let ctx = RenderContext {
            sample_rate: 48_000.0,
            quantum_frames: 8,
            current_frame: 0,
            playback_time: 0.0,
        };
        let inputs = [filled_bus(2, 8, 0.7)];
        let mut outputs = vec![filled_bus(2, 8, 0.9)];
        node.process(&ctx, &inputs, &mut outputs);
        assert!(outputs[0].is_silent());
    }

    #[test]
    fn test_mismatched_node_id_response_is_ignored() {
        let mut port = ProcessorPort::create(&test_config("mismatch"), 21, 8, 2, 2).unwrap();
        let binding = port.binding().clone();

        // A rogue producer pushes a response for a different node id.
        let rogue = BlockStreamProducer::attach(&binding.response_stream).unwrap();
        let mut header = BlockHeader::request(99, 0.0, 8, 2, 2);
        header.magic = crate::protocol::BLOCK_RESPONSE_MAGIC;
        assert!(rogue.try_submit(&header, &vec![1.0f32; 16]));

        let mut dest = filled_bus(2, 8, 0.3);
        assert!(!port.receive_into(&mut dest));
    }
}
