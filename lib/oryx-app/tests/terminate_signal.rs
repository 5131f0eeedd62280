//! Graceful shutdown on `SIGTERM`.
//!
//! Runs in its own test binary, since it delivers a real signal to the test process.
#![cfg(unix)]

use std::{sync::Arc, time::Duration};

use oryx_app::{logging::LoggerAdapter, ServerBuilder};
use oryx_config::ConfigStore;
use oryx_core::runtime::ServerState;
use tokio::time::timeout;

const CONFIG: &str = r#"{
    "workers": 2,
    "maintenance": { "interval": 5 },
    "log": { "tank": "console", "level": "trace" }
}"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sigterm_shuts_the_server_down() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("oryx.json");
    std::fs::write(&path, CONFIG).unwrap();

    let server = Arc::new(
        ServerBuilder::new(Arc::new(ConfigStore::new()))
            .with_logger(Arc::new(LoggerAdapter::detached()))
            .build(),
    );

    server.parse_config(&path).await.unwrap();
    server.prepare_logger().await.unwrap();
    server.initialize().await.unwrap();
    assert_eq!(server.container().outstanding(), 3);

    let run = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });

    let mut state_rx = server.subscribe_state();
    timeout(Duration::from_secs(5), state_rx.wait_for(|state| *state == ServerState::Running))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.width().current(), 2);

    // SAFETY: sending a signal to our own process has no memory safety implications.
    let rc = unsafe { libc::kill(libc::getpid(), libc::SIGTERM) };
    assert_eq!(rc, 0);

    timeout(Duration::from_secs(10), run).await.unwrap().unwrap();
    assert_eq!(server.container().outstanding(), 0);

    timeout(Duration::from_secs(1), server.close()).await.unwrap();
    assert_eq!(server.state(), ServerState::Closed);
}
