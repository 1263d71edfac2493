//! Worker binary. Spawned by the host to serve remote node computation in
//! isolation.

use aulos_worker::{WorkerConfig, WorkerServer};
use std::env;

#[tokio::main]
async fn main() -> aulos_stream::Result<()> {
    tracing_subscriber::fmt::init();

    let socket_path = env::args()
        .nth(1)
        .expect("Socket path required as first argument");

    let mut server = WorkerServer::new(WorkerConfig {
        socket_path: socket_path.into(),
    });
    server.run().await
}
