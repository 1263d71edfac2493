//! Worker process for the aulos audio engine.
//!
//! The worker lives in its own process for isolation: node computation that
//! runs user-supplied code cannot take the renderer down with it. It accepts
//! one host connection on a Unix control socket, receives stream bindings for
//! the nodes it serves, and runs one processor loop per node: block on the
//! wake signal, drain the request stream, compute, submit response blocks.

mod processor;
pub use processor::{BlockProcessor, GainProcessor, PassthroughProcessor, ProcessorFactory};

mod server;
pub use server::{WorkerConfig, WorkerServer};
