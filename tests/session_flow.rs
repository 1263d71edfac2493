//! Session client against a mock audio service over the real socket
//! transport.

use aulos::prelude::*;
use aulos::SessionEvent;
use aulos_stream::{
    SessionRequest, SessionResponse, SessionState, TransportListener,
};
use std::thread;
use std::time::Duration;

#[test]
fn session_activates_and_tears_down_over_socket() {
    let socket_path = std::env::temp_dir().join(format!(
        "aulos_it_session_{}.sock",
        std::process::id()
    ));

    let (bound_tx, bound_rx) = crossbeam_channel::bounded(1);
    let (destroyed_tx, destroyed_rx) = crossbeam_channel::bounded(1);
    let service_path = socket_path.clone();
    let service = thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = TransportListener::bind(&service_path).await.unwrap();
            bound_tx.send(()).unwrap();
            let mut transport = listener.accept().await.unwrap();

            loop {
                match transport.recv::<SessionRequest>().await {
                    Ok(SessionRequest::CreateSession { request_token, .. }) => {
                        // Ready races ahead of the create response on purpose.
                        transport
                            .send(&SessionResponse::OutputSinkReady { session_id: 77 })
                            .await
                            .unwrap();
                        transport
                            .send(&SessionResponse::SessionCreated {
                                request_token,
                                session_id: 77,
                            })
                            .await
                            .unwrap();
                    }
                    Ok(SessionRequest::DestroySession { session_id, .. }) => {
                        destroyed_tx.send(session_id).unwrap();
                        break;
                    }
                    Err(_) => break,
                }
            }
        });
    });

    bound_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("service should bind");

    let mut engine = RenderEngine::builder().build().unwrap();
    engine
        .connect_session(SessionConfig {
            socket_path: socket_path.clone(),
            target_latency_ms: 20,
        })
        .unwrap();

    engine.request_output_sink(DeviceHandle(1)).unwrap();
    // Idempotent while pending for the same device.
    engine.request_output_sink(DeviceHandle(1)).unwrap();
    // Explicit error for a different device.
    assert!(engine.request_output_sink(DeviceHandle(2)).is_err());

    let mut ready = None;
    for _ in 0..500 {
        if let Some(event) = engine.pump_session().into_iter().next() {
            ready = Some(event);
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(ready, Some(SessionEvent::Ready(77)));
    assert_eq!(engine.session_state(), SessionState::Active);

    // Dropping the engine drops the session client, which tears down the
    // active session.
    drop(engine);
    assert_eq!(
        destroyed_rx.recv_timeout(Duration::from_secs(5)),
        Ok(77)
    );
    service.join().unwrap();
}
