use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use hyper::{Body, Method, Request, header};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use url::Url;

use super::Prober;
use super::types::{PhaseTimings, ProbeResult};
use crate::models::Monitor;

const USER_AGENT: &str = concat!("uptimer/", env!("CARGO_PKG_VERSION"));

/// Everything a completed HTTP exchange tells us about the target.
struct Measurement {
    status_code: u16,
    timings: PhaseTimings,
}

/// Executes one phase-timed HTTP(S) GET per call.
///
/// The connection is driven by hand (DNS lookup, TCP connect, optional TLS
/// handshake, then HTTP/1.1 over the established stream) so each phase can be
/// timestamped against the probe start. Measurement and classification only;
/// persistence and alerting happen in the scheduler's recorder.
pub struct ProbeExecutor {
    timeout: Duration,
}

impl ProbeExecutor {
    /// Create an executor whose probes are bounded by `timeout_seconds`.
    pub fn new(timeout_seconds: u64) -> Self {
        Self { timeout: Duration::from_secs(timeout_seconds) }
    }

    /// Run the phased exchange. Errors here are transport-level and get
    /// converted by `probe` into a zeroed failure result.
    async fn measure(&self, url: &Url) -> Result<Measurement> {
        let host = url.host_str().ok_or_else(|| anyhow!("URL has no host"))?;
        let port = url.port_or_known_default().ok_or_else(|| anyhow!("URL has no port"))?;

        let started = Instant::now();

        let mut addrs = lookup_host((host, port)).await.context("DNS lookup failed")?;
        let addr = addrs.next().ok_or_else(|| anyhow!("DNS lookup returned no addresses"))?;
        let dns_lookup_ms = elapsed_ms(started);

        let stream = TcpStream::connect(addr).await.context("TCP connect failed")?;
        let tcp_handshake_ms = elapsed_ms(started);

        let (status_code, tls_handshake_ms) = if url.scheme() == "https" {
            let connector = native_tls::TlsConnector::new()
                .context("failed to build TLS connector")?;
            let connector = tokio_native_tls::TlsConnector::from(connector);
            let stream =
                connector.connect(host, stream).await.context("TLS handshake failed")?;
            let tls_handshake_ms = elapsed_ms(started);
            (send_request(stream, host, url).await?, tls_handshake_ms)
        } else {
            (send_request(stream, host, url).await?, 0)
        };

        let total_ms = elapsed_ms(started);

        Ok(Measurement {
            status_code,
            timings: PhaseTimings { dns_lookup_ms, tcp_handshake_ms, tls_handshake_ms, total_ms },
        })
    }
}

#[async_trait]
impl Prober for ProbeExecutor {
    async fn probe(&self, monitor: &Monitor) -> ProbeResult {
        let result = ProbeResult::new(monitor.uuid);

        let url = match Url::parse(&monitor.url) {
            Ok(url) => url,
            Err(e) => return result.failure(format!("invalid URL '{}': {e}", monitor.url)),
        };
        if !matches!(url.scheme(), "http" | "https") {
            return result.failure(format!("unsupported URL scheme '{}'", url.scheme()));
        }

        match timeout(self.timeout, self.measure(&url)).await {
            Ok(Ok(measurement)) => result.completed(measurement.status_code, measurement.timings),
            Ok(Err(e)) => result.failure(format!("{e:#}")),
            Err(_) => {
                result.failure(format!("probe timed out after {}s", self.timeout.as_secs()))
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Issue a GET over an already-established stream and read the full body,
/// so the total time covers the complete response.
async fn send_request<S>(stream: S, host: &str, url: &Url) -> Result<u16>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) =
        hyper::client::conn::handshake(stream).await.context("HTTP handshake failed")?;

    // The connection future drives the socket; it resolves once the sender
    // is dropped and the exchange is complete.
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!("probe connection terminated: {e}");
        }
    });

    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path = format!("{path}?{query}");
    }
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let request = Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(header::HOST, authority)
        .header(header::USER_AGENT, USER_AGENT)
        .body(Body::empty())
        .context("failed to build probe request")?;

    let response = sender.send_request(request).await.context("HTTP request failed")?;
    let status_code = response.status().as_u16();

    hyper::body::to_bytes(response.into_body())
        .await
        .context("failed to read response body")?;

    Ok(status_code)
}
