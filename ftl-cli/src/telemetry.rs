use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use ftl_config::LogConfig;
use ftl_core::ChangeKind;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::live::ShutdownSignal;

const LOG_FILE_PREFIX: &str = "ftl.log";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level`. When `config.directory` is set, a daily
/// rolling file receives the same events; keep the returned guard alive so
/// buffered lines are flushed on exit.
pub fn init_tracing(config: &LogConfig, level: Option<&str>) -> Result<Option<WorkerGuard>> {
    let level = level.unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log filter '{level}'"))?;

    let stdout_layer = if config.json {
        fmt::layer().json().with_target(true).with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_target(false).with_writer(std::io::stderr).boxed()
    };

    let (file_layer, guard) = match config.directory.as_deref() {
        Some(directory) => {
            std::fs::create_dir_all(Path::new(directory))
                .with_context(|| format!("failed to create log directory {directory}"))?;
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(guard)
}

/// Prometheus instruments for the live follower.
pub struct LiveMetrics {
    registry: Registry,
    polls: IntCounterVec,
    failed_polls: IntCounterVec,
    changes: IntCounterVec,
    tracked_positions: IntGaugeVec,
}

impl LiveMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let polls = IntCounterVec::new(
            Opts::new("ftl_polls_total", "Successful snapshot polls"),
            &["account"],
        )?;
        let failed_polls = IntCounterVec::new(
            Opts::new("ftl_failed_polls_total", "Snapshot polls that returned an error"),
            &["account"],
        )?;
        let changes = IntCounterVec::new(
            Opts::new("ftl_position_changes_total", "Position changes emitted"),
            &["account", "kind"],
        )?;
        let tracked_positions = IntGaugeVec::new(
            Opts::new("ftl_tracked_positions", "Positions currently tracked"),
            &["account"],
        )?;
        registry.register(Box::new(polls.clone()))?;
        registry.register(Box::new(failed_polls.clone()))?;
        registry.register(Box::new(changes.clone()))?;
        registry.register(Box::new(tracked_positions.clone()))?;
        Ok(Self {
            registry,
            polls,
            failed_polls,
            changes,
            tracked_positions,
        })
    }

    pub fn record_poll(&self, account: &str, tracked: usize) {
        self.polls.with_label_values(&[account]).inc();
        self.tracked_positions
            .with_label_values(&[account])
            .set(tracked as i64);
    }

    pub fn record_failed_poll(&self, account: &str) {
        self.failed_polls.with_label_values(&[account]).inc();
    }

    pub fn record_change(&self, account: &str, kind: ChangeKind) {
        self.changes
            .with_label_values(&[account, kind.as_str()])
            .inc();
    }

    /// Text exposition of every registered instrument.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Serve `GET /metrics` on `addr` until `shutdown` fires.
pub fn spawn_metrics_server(
    addr: SocketAddr,
    metrics: Arc<LiveMetrics>,
    shutdown: ShutdownSignal,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let make_service = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let metrics = metrics.clone();
                async move { Ok::<_, Infallible>(metrics_response(&metrics, &req)) }
            }))
        }
    });
    let server = Server::try_bind(&addr)
        .with_context(|| format!("failed to bind metrics endpoint on {addr}"))?
        .serve(make_service);
    let bound = server.local_addr();
    info!(addr = %bound, "serving metrics");
    let handle = tokio::spawn(async move {
        let graceful = server.with_graceful_shutdown(async move { shutdown.wait().await });
        if let Err(err) = graceful.await {
            warn!(error = %err, "metrics server exited with error");
        }
    });
    Ok((bound, handle))
}

fn metrics_response(metrics: &LiveMetrics, req: &Request<Body>) -> Response<Body> {
    if req.method() != Method::GET || req.uri().path() != "/metrics" {
        let mut response = Response::new(Body::from("not found"));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return response;
    }
    match metrics.render() {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            if let Ok(value) = TextEncoder::new().format_type().parse() {
                response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
            }
            response
        }
        Err(err) => {
            let mut response = Response::new(Body::from(err.to_string()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_polls_and_changes() {
        let metrics = LiveMetrics::new().unwrap();
        metrics.record_poll("leader", 3);
        metrics.record_poll("leader", 2);
        metrics.record_failed_poll("leader");
        metrics.record_change("leader", ChangeKind::PartiallyClosed);

        let text = metrics.render().unwrap();
        assert!(text.contains("ftl_polls_total{account=\"leader\"} 2"));
        assert!(text.contains("ftl_failed_polls_total{account=\"leader\"} 1"));
        assert!(text.contains("ftl_position_changes_total{account=\"leader\",kind=\"partially closed\"} 1"));
        assert!(text.contains("ftl_tracked_positions{account=\"leader\"} 2"));
    }

    #[tokio::test]
    async fn serves_metrics_until_shutdown() {
        let metrics = Arc::new(LiveMetrics::new().unwrap());
        metrics.record_failed_poll("leader");
        let shutdown = ShutdownSignal::new();
        let (addr, handle) =
            spawn_metrics_server("127.0.0.1:0".parse().unwrap(), metrics, shutdown.clone()).unwrap();

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();
        assert!(body.starts_with("HTTP/1.1 200"));
        assert!(body.contains("ftl_failed_polls_total"));

        shutdown.trigger();
        handle.await.unwrap();
    }
}
