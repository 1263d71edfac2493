//! The engine facade tying the scheduler, streaming, and session layers
//! together.

use crate::error::{Error, Result};
use crate::worker_link::WorkerLink;
use crate::worklet::WorkletHub;
use aulos_core::{
    decode_graph, AudioBus, GraphDescription, GraphError, NodeRegistry, PreparedGraph,
    RenderConfig, RenderHandle, Renderer,
};
use aulos_stream::{
    SessionClient, SessionConfig, SessionEvent, SessionState, SocketSessionTransport,
    StreamConfig, DeviceHandle,
};
use std::path::Path;
use std::sync::Arc;

/// Builder for [`RenderEngine`].
pub struct RenderEngineBuilder {
    sample_rate: f64,
    quantum_frames: usize,
    stream: StreamConfig,
}

impl Default for RenderEngineBuilder {
    fn default() -> Self {
        let render = RenderConfig::default();
        Self {
            sample_rate: render.sample_rate,
            quantum_frames: render.quantum_frames,
            stream: StreamConfig::default(),
        }
    }
}

impl RenderEngineBuilder {
    pub fn sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn quantum_frames(mut self, quantum_frames: usize) -> Self {
        self.quantum_frames = quantum_frames;
        self
    }

    pub fn stream_config(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn build(self) -> Result<RenderEngine> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "sample rate {} must be positive",
                self.sample_rate
            )));
        }
        if self.quantum_frames == 0 || self.quantum_frames > u32::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "quantum of {} frames is out of range",
                self.quantum_frames
            )));
        }

        let render_config = RenderConfig {
            sample_rate: self.sample_rate,
            quantum_frames: self.quantum_frames,
        };
        let registry = NodeRegistry::with_builtins();
        let worklets = WorkletHub::new(self.stream.clone(), self.quantum_frames as u32);
        worklets.register_into(&registry);
        let (renderer, handle) = Renderer::new(render_config);

        Ok(RenderEngine {
            registry,
            render_config,
            renderer: Some(renderer),
            handle,
            worklets,
            worker: None,
            session: None,
        })
    }
}

/// Owns the render graph lifecycle for one output session: graph builds and
/// publication on the control side, quantum rendering on the callback side,
/// worker bindings and the device session at the boundaries.
pub struct RenderEngine {
    registry: NodeRegistry,
    render_config: RenderConfig,
    renderer: Option<Renderer>,
    handle: RenderHandle,
    worklets: Arc<WorkletHub>,
    worker: Option<WorkerLink>,
    session: Option<SessionClient<SocketSessionTransport>>,
}

impl RenderEngine {
    pub fn builder() -> RenderEngineBuilder {
        RenderEngineBuilder::default()
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn render_config(&self) -> RenderConfig {
        self.render_config
    }

    /// Decode and apply an encoded graph description from the control plane.
    pub fn apply_graph_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let description = decode_graph(bytes)?;
        self.apply_graph(&description)
    }

    /// Build and publish a new graph.
    ///
    /// On a cycle, the whole graph is muted (published empty) *and* the error
    /// is returned so the control plane observes it. Any other build error
    /// leaves the previously published graph running.
    pub fn apply_graph(&mut self, description: &GraphDescription) -> Result<()> {
        self.worklets.reset();
        match PreparedGraph::prepare(description, &self.registry, &self.render_config) {
            Ok(graph) => {
                self.handle.publish(graph);
                self.publish_worker_bindings();
                Ok(())
            }
            Err(error @ GraphError::CycleDetected) => {
                tracing::warn!("graph cycle detected; muting output for this graph");
                self.handle.publish(PreparedGraph::muted(&self.render_config));
                self.worklets.reset();
                self.publish_worker_bindings();
                Err(error.into())
            }
            Err(error) => {
                self.worklets.reset();
                Err(error.into())
            }
        }
    }

    /// Connect to a worker process serving `worklet` nodes and publish the
    /// current bindings.
    pub fn connect_worker(&mut self, socket_path: &Path) -> Result<()> {
        let link = WorkerLink::connect(socket_path)?;
        link.set_bindings(self.worklets.current_bindings())?;
        self.worker = Some(link);
        Ok(())
    }

    pub fn worker(&self) -> Option<&WorkerLink> {
        self.worker.as_ref()
    }

    fn publish_worker_bindings(&self) {
        if let Some(worker) = &self.worker {
            if let Err(error) = worker.set_bindings(self.worklets.current_bindings()) {
                tracing::warn!(%error, "failed to publish worklet bindings");
            }
        }
    }

    /// Connect the output-sink session client to the audio service.
    pub fn connect_session(&mut self, config: SessionConfig) -> Result<()> {
        let (transport, responses) = SocketSessionTransport::connect(&config)?;
        self.session = Some(SessionClient::new(transport, responses, config));
        Ok(())
    }

    /// Request an output sink for `device`. Idempotent for the same device
    /// while a session is outstanding.
    pub fn request_output_sink(&mut self, device: DeviceHandle) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::SessionNotConnected)?;
        session.request_output_sink(device)?;
        Ok(())
    }

    /// Drain session responses and return the surfaced outcomes.
    pub fn pump_session(&mut self) -> Vec<SessionEvent> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        session.pump();
        let mut events = Vec::new();
        while let Some(event) = session.poll_outcome() {
            events.push(event);
        }
        events
    }

    pub fn session_state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(SessionState::Idle)
    }

    /// Render one quantum. Fails with [`Error::RendererBusy`] once a device
    /// stream owns the renderer.
    pub fn render_quantum(&mut self) -> Result<Option<&AudioBus>> {
        match self.renderer.as_mut() {
            Some(renderer) => Ok(renderer.render_quantum()),
            None => Err(Error::RendererBusy),
        }
    }

    /// Render one quantum into an interleaved slice.
    pub fn render_interleaved(&mut self, out: &mut [f32]) -> Result<()> {
        match self.renderer.as_mut() {
            Some(renderer) => {
                renderer.render_interleaved(out);
                Ok(())
            }
            None => Err(Error::RendererBusy),
        }
    }

    /// Hand the renderer to a custom device I/O loop. The engine keeps the
    /// publishing side: graph updates still reach the moved renderer.
    pub fn take_renderer(&mut self) -> Option<Renderer> {
        self.renderer.take()
    }

    /// Start the CPAL output driver on the default device, moving the
    /// renderer into the device callback.
    #[cfg(feature = "device-io")]
    pub fn start_output(&mut self) -> Result<crate::output::OutputDriver> {
        let renderer = self.renderer.take().ok_or(Error::RendererBusy)?;
        crate::output::OutputDriver::start(renderer)
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            worker.shutdown();
        }
    }
}
