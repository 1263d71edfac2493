//! Worker control server and per-node processor loops.

use crate::processor::{PassthroughProcessor, ProcessorFactory};
use aulos_stream::{
    HostMessage, ProcessorEndpoint, Result, StreamBinding, TransportListener, WorkerMessage,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How long a processor loop sleeps on the wake socket before re-checking its
/// stop flag. Requests are still served promptly: wakes interrupt the wait.
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub socket_path: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            socket_path: std::env::temp_dir().join("aulos-worker.sock"),
        }
    }
}

struct ProcessorTask {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ProcessorTask {
    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Serves remote node computation for one host connection.
pub struct WorkerServer {
    config: WorkerConfig,
    factory: ProcessorFactory,
    tasks: HashMap<u64, ProcessorTask>,
}

impl WorkerServer {
    /// A server whose nodes all run [`PassthroughProcessor`].
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_factory(config, Arc::new(|_| Box::new(PassthroughProcessor)))
    }

    pub fn with_factory(config: WorkerConfig, factory: ProcessorFactory) -> Self {
        Self {
            config,
            factory,
            tasks: HashMap::new(),
        }
    }

    /// Bind the control socket, accept one host, and serve until shutdown or
    /// disconnect.
    pub async fn run(&mut self) -> Result<()> {
        let listener = TransportListener::bind(&self.config.socket_path).await?;
        tracing::info!(path = %self.config.socket_path.display(), "worker listening");

        let mut transport = listener.accept().await?;
        transport.send(&WorkerMessage::Ready).await?;

        loop {
            let message = match transport.recv::<HostMessage>().await {
                Ok(message) => message,
                Err(error) => {
                    tracing::info!(%error, "host connection closed");
                    break;
                }
            };

            match message {
                HostMessage::SetStreamBindings { bindings } => {
                    let count = self.apply_bindings(bindings);
                    transport
                        .send(&WorkerMessage::BindingsApplied { count })
                        .await?;
                }
                HostMessage::ClearStreamBindings => {
                    self.stop_all();
                    transport
                        .send(&WorkerMessage::BindingsApplied { count: 0 })
                        .await?;
                }
                HostMessage::Shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
            }
        }

        self.stop_all();
        Ok(())
    }

    /// Replace the full binding set: nodes absent from `bindings` stop, new
    /// nodes start, existing nodes are restarted on their new streams.
    fn apply_bindings(&mut self, bindings: Vec<StreamBinding>) -> usize {
        let keep: Vec<u64> = bindings.iter().map(|b| b.node_id).collect();
        let stale: Vec<u64> = self
            .tasks
            .keys()
            .copied()
            .filter(|node_id| !keep.contains(node_id))
            .collect();
        for node_id in stale {
            if let Some(mut task) = self.tasks.remove(&node_id) {
                task.stop_and_join();
            }
        }

        let mut started = 0;
        for binding in bindings {
            let node_id = binding.node_id;
            if let Some(mut task) = self.tasks.remove(&node_id) {
                task.stop_and_join();
            }
            match self.spawn_processor_loop(binding) {
                Ok(task) => {
                    self.tasks.insert(node_id, task);
                    started += 1;
                }
                Err(error) => {
                    tracing::warn!(node_id, %error, "failed to bind node streams");
                }
            }
        }
        started
    }

    fn spawn_processor_loop(&self, binding: StreamBinding) -> Result<ProcessorTask> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let mut processor = (self.factory)(&binding);
        let node_id = binding.node_id;

        let thread = thread::Builder::new()
            .name(format!("aulos-node-{node_id}"))
            .spawn(move || {
                let mut endpoint = match ProcessorEndpoint::attach(&binding) {
                    Ok(endpoint) => endpoint,
                    Err(error) => {
                        tracing::error!(node_id, %error, "stream attach failed");
                        return;
                    }
                };
                tracing::debug!(node_id, "processor loop started");

                while !stop_flag.load(Ordering::Relaxed) {
                    match endpoint.wait(Some(WAIT_SLICE)) {
                        Ok(true) => {
                            endpoint.process_pending(|header, input, output| {
                                processor.process(header, input, output);
                            });
                        }
                        Ok(false) => {
                            // Timeout slice: catch anything submitted between
                            // a drained wake and the next wait.
                            endpoint.process_pending(|header, input, output| {
                                processor.process(header, input, output);
                            });
                        }
                        Err(error) => {
                            tracing::error!(node_id, %error, "wake wait failed");
                            break;
                        }
                    }
                }
                tracing::debug!(node_id, "processor loop stopped");
            })
            .map_err(aulos_stream::StreamError::Io)?;

        Ok(ProcessorTask {
            stop,
            thread: Some(thread),
        })
    }

    fn stop_all(&mut self) {
        for (_, mut task) in self.tasks.drain() {
            task.stop_and_join();
        }
    }
}

impl Drop for WorkerServer {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aulos_core::AudioBus;
    use aulos_stream::{ProcessorPort, StreamConfig};

    fn stream_config(tag: &str) -> StreamConfig {
        StreamConfig {
            shm_prefix: format!("aulos_test_worker_{tag}"),
            block_count: 4,
            notify_dir: std::env::temp_dir(),
        }
    }

    #[test]
    fn test_processor_loop_serves_requests() {
        let mut port = ProcessorPort::create(&stream_config("loop"), 42, 8, 2, 2).unwrap();
        let binding = port.binding().clone();

        let server = WorkerServer::new(WorkerConfig::default());
        let mut task = server.spawn_processor_loop(binding).unwrap();

        let mut input = AudioBus::new(2, 8);
        input.channel_mut(0).fill(0.5);
        input.channel_mut(1).fill(-0.5);
        assert!(port.submit_request(0.0, &input));

        // Give the loop a moment to compute, then collect the response.
        let mut dest = AudioBus::new(2, 8);
        let mut received = false;
        for _ in 0..100 {
            if port.receive_into(&mut dest) {
                received = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        task.stop_and_join();

        assert!(received);
        assert_eq!(dest.channel(0), &[0.5; 8]);
        assert_eq!(dest.channel(1), &[-0.5; 8]);
    }
}
