//! Agent orchestration -- assembly, lifecycle management, and shutdown.
//!
//! The [`Orchestrator`] is the central coordinator of `logship-daemon`.
//! It loads configuration, installs the metrics exporter, builds the
//! shipping pipeline with its file sources, and runs until a shutdown
//! signal arrives.
//!
//! # Shutdown Order
//!
//! 1. Source readers (stop producing lines)
//! 2. Batcher (drain the line queue, flush the final batch)
//! 3. Sender (finish delivery within the shutdown grace period)

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use logship_core::config::LogshipConfig;
use logship_core::pipeline::{HealthStatus, Pipeline};
use logship_shipper::{FileSource, ShipperPipeline, ShipperPipelineBuilder};

use crate::metrics_server;

/// Interval between uptime gauge updates.
const UPTIME_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: LogshipConfig,
    /// The shipping pipeline (sources, queue, batcher, sender).
    pipeline: ShipperPipeline,
    /// Signals background tasks to stop.
    shutdown: CancellationToken,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or parsed
    /// - Configuration validation fails
    /// - TLS, auth or encryption material cannot be loaded
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = LogshipConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    ///
    /// Useful for testing or when CLI overrides have been applied.
    pub async fn build_from_config(config: LogshipConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        // Install metrics recorder before the pipeline records anything
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        tracing::info!(endpoint = %config.sender.endpoint, "initializing shipper pipeline");
        let mut builder = ShipperPipelineBuilder::from_core(&config);

        let poll_interval = Duration::from_millis(config.sources.poll_interval_ms);
        for path in &config.sources.files {
            tracing::info!(path = %path, follow = config.sources.follow, "adding file source");
            builder = builder.source(Box::new(FileSource::new(
                path,
                config.sources.follow,
                poll_interval,
            )));
        }

        let pipeline = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build shipper pipeline: {}", e))?;

        if config.sources.files.is_empty() {
            tracing::warn!("no sources configured, the agent will idle until shutdown");
        }

        Ok(Self {
            config,
            pipeline,
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
        })
    }

    /// Start the pipeline and block until SIGTERM or SIGINT.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Start the pipeline and block until `signal` resolves.
    ///
    /// `signal` returns the name of the shutdown trigger for logging.
    pub async fn run_until<F>(&mut self, signal: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        let pid_file = self.pid_file();
        if let Some(path) = pid_file.as_deref() {
            write_pid_file(path)?;
        }

        tracing::info!("starting shipper pipeline");
        if let Err(e) = self.pipeline.start().await {
            tracing::error!(error = %e, "pipeline startup failed");
            if let Some(path) = pid_file.as_deref() {
                remove_pid_file(path);
            }
            return Err(e.into());
        }

        let uptime_task = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, self.shutdown.clone()));

        tracing::info!("logship-daemon running");
        let result = signal.await;
        match &result {
            Ok(name) => tracing::info!(signal = *name, "shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "signal handling failed, shutting down"),
        }

        self.shutdown.cancel();
        if let Some(task) = uptime_task {
            let _ = task.await;
        }

        let stopped = self.pipeline.stop().await;

        if let Some(path) = pid_file.as_deref() {
            remove_pid_file(path);
        }

        let stats = self.pipeline.stats();
        tracing::info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            batches_delivered = stats.batches_delivered,
            batches_dropped = stats.batches_dropped,
            lines_delivered = stats.lines_delivered,
            "logship-daemon shut down"
        );

        result?;
        stopped.map_err(|e| anyhow::anyhow!("failed to stop pipeline: {}", e))
    }

    /// Query the collector health endpoint.
    pub async fn check_collector(&self) -> Result<()> {
        self.pipeline
            .check_collector()
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
    }

    /// Get the current pipeline health.
    pub async fn health(&self) -> HealthStatus {
        self.pipeline.health_check().await
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &LogshipConfig {
        &self.config
    }

    /// Get a reference to the shipping pipeline.
    pub fn pipeline(&self) -> &ShipperPipeline {
        &self.pipeline
    }

    fn pid_file(&self) -> Option<PathBuf> {
        let path = &self.config.general.pid_file;
        (!path.is_empty()).then(|| PathBuf::from(path))
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file.
///
/// # Security
///
/// - Uses `create_new(true)` to atomically create the file
/// - Verifies the created file is a regular file
/// - Creates the parent directory with restrictive permissions (0o700)
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_string());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Spawn a background task that periodically updates the uptime gauge.
fn spawn_uptime_updater(
    start_time: Instant,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    use logship_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_UPDATE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_write_pid_file_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("run").join("logship.pid");

        write_pid_file(&pid_file).expect("should write PID file");

        let content = fs::read_to_string(&pid_file).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_pid_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("logship.pid");
        write_pid_file(&pid_file).unwrap();

        let mode = fs::metadata(&pid_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_write_pid_file_fails_if_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("logship.pid");
        fs::write(&pid_file, "12345").unwrap();

        let err = write_pid_file(&pid_file).unwrap_err().to_string();
        assert!(err.contains("already exists"), "got: {err}");
        assert!(err.contains("12345"), "got: {err}");
    }

    #[test]
    fn test_remove_pid_file_handles_nonexistent_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        remove_pid_file(&dir.path().join("missing.pid"));
    }

    #[tokio::test]
    async fn test_uptime_updater_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let task = spawn_uptime_updater(Instant::now(), shutdown.clone());

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_millis(500), task).await;
        assert!(result.is_ok(), "uptime updater should stop promptly");
    }
}
