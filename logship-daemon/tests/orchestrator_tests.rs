//! Orchestrator integration tests.
//!
//! Tests the full flow: config loading -> pipeline build -> start -> shutdown,
//! against a mockito collector.

use std::io::Write;
use std::time::Duration;

use logship_core::config::LogshipConfig;
use logship_core::pipeline::HealthStatus;
use logship_daemon::orchestrator::Orchestrator;

/// Helper function to create a config pointing at a mock collector.
fn collector_config(collector_url: &str, extra: &str) -> LogshipConfig {
    let toml_str = format!(
        r#"
[general]
log_level = "info"
pid_file = ""

[batch]
batch_size = 2
flush_interval_ms = 50

[sender]
endpoint = "{collector_url}/logs"
max_retries = 1
base_interval_ms = 10
max_interval_ms = 10
shutdown_grace_secs = 2

{extra}
"#
    );
    LogshipConfig::parse(&toml_str).expect("failed to parse test config")
}

async fn shutdown_after(delay: Duration) -> anyhow::Result<&'static str> {
    tokio::time::sleep(delay).await;
    Ok("test")
}

#[tokio::test]
async fn test_file_lines_are_shipped_and_drained_on_shutdown() {
    let mut server = mockito::Server::new_async().await;
    let first = server
        .mock("POST", "/logs")
        .match_body(r#"["alpha","beta"]"#)
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let rest = server
        .mock("POST", "/logs")
        .match_body(r#"["gamma"]"#)
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "alpha\nbeta\ngamma").unwrap();

    let config = collector_config(
        &server.url(),
        &format!(
            "[sources]\nfiles = ['{}']\nfollow = true\npoll_interval_ms = 10\n",
            file.path().display()
        ),
    );
    let mut orchestrator = Orchestrator::build_from_config(config).await.unwrap();
    orchestrator
        .run_until(shutdown_after(Duration::from_millis(300)))
        .await
        .unwrap();

    first.assert_async().await;
    rest.assert_async().await;
    let stats = orchestrator.pipeline().stats();
    assert_eq!(stats.lines_delivered, 3);
    assert!(matches!(
        orchestrator.health().await,
        HealthStatus::Unhealthy(_)
    ));
}

#[tokio::test]
async fn test_pid_file_lifecycle() {
    let server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("logship.pid");

    let mut config = collector_config(&server.url(), "");
    config.general.pid_file = pid_path.display().to_string();

    let mut orchestrator = Orchestrator::build_from_config(config).await.unwrap();
    let watched = pid_path.clone();
    orchestrator
        .run_until(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(watched.exists(), "PID file should exist while running");
            Ok("test")
        })
        .await
        .unwrap();

    assert!(!pid_path.exists(), "PID file should be removed on shutdown");
}

#[tokio::test]
async fn test_existing_pid_file_prevents_start() {
    let server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("logship.pid");
    std::fs::write(&pid_path, "4242").unwrap();

    let mut config = collector_config(&server.url(), "");
    config.general.pid_file = pid_path.display().to_string();

    let mut orchestrator = Orchestrator::build_from_config(config).await.unwrap();
    let err = orchestrator
        .run_until(shutdown_after(Duration::from_millis(10)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("4242"));
    // 다른 인스턴스의 PID 파일은 건드리지 않음
    assert_eq!(std::fs::read_to_string(&pid_path).unwrap(), "4242");
}

#[tokio::test]
async fn test_build_fails_on_unknown_auth_method() {
    let server = mockito::Server::new_async().await;
    let mut config = collector_config(&server.url(), "");
    config.auth.method = "kerberos".to_owned();

    let result = Orchestrator::build_from_config(config).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_build_fails_on_missing_key_file() {
    let server = mockito::Server::new_async().await;
    let config = collector_config(
        &server.url(),
        "[encryption]\nenabled = true\nkey_id = 'k1'\nkey_file = '/nonexistent/key.hex'\n",
    );

    let err = Orchestrator::build_from_config(config)
        .await
        .err()
        .expect("build should fail");
    assert!(err.to_string().contains("encryption.key_file"));
}

#[tokio::test]
async fn test_build_from_config_file() {
    let server = mockito::Server::new_async().await;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "[sender]\nendpoint = \"{}/logs\"\n\n[auth]\nmethod = \"basic\"\nusername = \"agent\"\npassword = \"secret\"\n",
        server.url()
    )
    .unwrap();

    let orchestrator = Orchestrator::build(file.path()).await.unwrap();
    assert_eq!(orchestrator.config().auth.method, "basic");
    assert_eq!(orchestrator.config().batch.batch_size, 100);
}

#[tokio::test]
async fn test_build_fails_on_missing_config_file() {
    let result = Orchestrator::build(std::path::Path::new("/nonexistent/logship.toml")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_check_collector() {
    let mut server = mockito::Server::new_async().await;
    let healthy = server
        .mock("GET", "/health")
        .with_status(200)
        .with_body(r#"{"status":"ok"}"#)
        .expect(1)
        .create_async()
        .await;

    let orchestrator = Orchestrator::build_from_config(collector_config(&server.url(), ""))
        .await
        .unwrap();
    orchestrator.check_collector().await.unwrap();
    healthy.assert_async().await;

    let mut down = mockito::Server::new_async().await;
    down.mock("GET", "/health")
        .with_status(503)
        .create_async()
        .await;
    let orchestrator = Orchestrator::build_from_config(collector_config(&down.url(), ""))
        .await
        .unwrap();
    assert!(orchestrator.check_collector().await.is_err());
}
