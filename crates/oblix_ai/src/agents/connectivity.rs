//! Connectivity agent. Guards the cloud tier: without a usable network path,
//! cloud models cannot be reached.
//!
//! Measurements are cached and only re-taken once the check interval has
//! elapsed. At most one measurement runs at a time, so a burst of requests
//! shares one probe.

use async_trait::async_trait;
use oblix_core::OblixConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{AgentError, AgentReport, AgentState, SignalAgent};
use crate::types::{ModelTier, RequestContext, Target};

/// One network measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkSample {
    pub latency_ms: f64,
    pub packet_loss_pct: f64,
    /// `None` when bandwidth was not measured.
    pub bandwidth_mbps: Option<f64>,
    pub connected: bool,
}

#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn sample(&self) -> Result<NetworkSample, AgentError>;
}

// ---------------------------------------------------------------------------
// TCP probe
// ---------------------------------------------------------------------------

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_ATTEMPTS_PER_ENDPOINT: u32 = 5;

/// Times repeated TCP connects to a set of `host:port` endpoints.
///
/// Each endpoint gets several connect attempts. An endpoint that never
/// answers counts as unreachable rather than lossy; loss is the share of
/// failed attempts on endpoints that answered at least once, and latency is
/// the mean over successful attempts. Bandwidth is measured only when a probe
/// URL is configured, by timing a plain GET of it.
pub struct TcpNetworkProbe {
    endpoints: Vec<String>,
    attempts: u32,
    connect_timeout: Duration,
    bandwidth_url: Option<String>,
    client: reqwest::Client,
}

impl TcpNetworkProbe {
    pub fn new(endpoints: Vec<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            endpoints,
            attempts: DEFAULT_ATTEMPTS_PER_ENDPOINT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            bandwidth_url: None,
            client,
        }
    }

    pub fn from_config(config: &OblixConfig) -> Self {
        let mut probe = Self::new(config.connectivity_endpoints.clone())
            .with_attempts(config.connectivity_attempts_per_endpoint);
        probe.bandwidth_url = config.bandwidth_probe_url.clone();
        probe
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_bandwidth_url(mut self, url: impl Into<String>) -> Self {
        self.bandwidth_url = Some(url.into());
        self
    }

    async fn connect_time(&self, endpoint: &str) -> Option<Duration> {
        let start = Instant::now();
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(_stream)) => Some(start.elapsed()),
            Ok(Err(e)) => {
                debug!(endpoint, error = %e, "Connect failed");
                None
            }
            Err(_) => {
                debug!(endpoint, "Connect timed out");
                None
            }
        }
    }

    async fn endpoint_timings(&self, endpoint: &str) -> Vec<Option<Duration>> {
        futures::future::join_all((0..self.attempts).map(|_| self.connect_time(endpoint))).await
    }

    async fn measure_bandwidth(&self, url: &str) -> Option<f64> {
        let start = Instant::now();
        let resp = self.client.get(url).send().await.ok()?;
        if !resp.status().is_success() {
            debug!(url, status = %resp.status(), "Bandwidth probe returned error status");
            return None;
        }
        let bytes = resp.bytes().await.ok()?;
        let secs = start.elapsed().as_secs_f64();
        if bytes.is_empty() || secs <= 0.0 {
            return None;
        }
        Some(bytes.len() as f64 * 8.0 / 1_000_000.0 / secs)
    }
}

#[async_trait]
impl NetworkProbe for TcpNetworkProbe {
    async fn sample(&self) -> Result<NetworkSample, AgentError> {
        if self.endpoints.is_empty() {
            return Err(AgentError::InvalidConfig(
                "no connectivity endpoints configured".into(),
            ));
        }

        let timings = futures::future::join_all(
            self.endpoints.iter().map(|ep| self.endpoint_timings(ep)),
        )
        .await;

        for (endpoint, attempts) in self.endpoints.iter().zip(&timings) {
            if attempts.iter().all(Option::is_none) {
                debug!(endpoint = %endpoint, "Endpoint unreachable");
            }
        }
        let ConnectSummary {
            latency_ms,
            packet_loss_pct,
            connected,
        } = summarize_connects(&timings);

        let bandwidth_mbps = match (&self.bandwidth_url, connected) {
            (Some(url), true) => self.measure_bandwidth(url).await,
            _ => None,
        };

        Ok(NetworkSample {
            latency_ms,
            packet_loss_pct,
            bandwidth_mbps,
            connected,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ConnectSummary {
    latency_ms: f64,
    packet_loss_pct: f64,
    connected: bool,
}

/// Fold per-endpoint connect outcomes (`None` = failed attempt) into latency
/// and loss. Endpoints with no successful attempt are left out of the loss.
fn summarize_connects(per_endpoint: &[Vec<Option<Duration>>]) -> ConnectSummary {
    let mut attempts = 0usize;
    let mut answered = Vec::new();
    for timings in per_endpoint {
        if timings.iter().any(Option::is_some) {
            attempts += timings.len();
            answered.extend(timings.iter().flatten().copied());
        }
    }

    if answered.is_empty() {
        return ConnectSummary {
            latency_ms: 0.0,
            packet_loss_pct: 100.0,
            connected: false,
        };
    }
    let latency_ms =
        answered.iter().map(|d| d.as_secs_f64() * 1000.0).sum::<f64>() / answered.len() as f64;
    ConnectSummary {
        latency_ms,
        packet_loss_pct: (attempts - answered.len()) as f64 / attempts as f64 * 100.0,
        connected: true,
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityThresholds {
    pub latency_ms: f64,
    pub packet_loss_pct: f64,
    pub bandwidth_mbps: f64,
    pub check_interval: Duration,
}

impl Default for ConnectivityThresholds {
    fn default() -> Self {
        Self {
            latency_ms: 200.0,
            packet_loss_pct: 10.0,
            bandwidth_mbps: 5.0,
            check_interval: Duration::from_secs(30),
        }
    }
}

impl From<&OblixConfig> for ConnectivityThresholds {
    fn from(config: &OblixConfig) -> Self {
        Self {
            latency_ms: config.latency_threshold_ms,
            packet_loss_pct: config.packet_loss_threshold_pct,
            bandwidth_mbps: config.bandwidth_threshold_mbps,
            check_interval: Duration::from_secs(config.connectivity_check_interval_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

pub struct ConnectivityAgent {
    probe: Arc<dyn NetworkProbe>,
    thresholds: ConnectivityThresholds,
    last: Mutex<Option<(Instant, NetworkSample)>>,
}

impl ConnectivityAgent {
    pub const NAME: &'static str = "connectivity";

    pub fn new(probe: Arc<dyn NetworkProbe>, thresholds: ConnectivityThresholds) -> Self {
        Self {
            probe,
            thresholds,
            last: Mutex::new(None),
        }
    }

    /// Cached sample if still fresh, otherwise a new measurement.
    ///
    /// The lock is held across the measurement; callers queued behind it see
    /// the fresh sample instead of probing again.
    async fn current_sample(&self) -> Result<NetworkSample, AgentError> {
        let mut last = self.last.lock().await;
        if let Some((taken, sample)) = *last
            && taken.elapsed() < self.thresholds.check_interval
        {
            return Ok(sample);
        }

        let sample = self.probe.sample().await?;
        *last = Some((Instant::now(), sample));
        Ok(sample)
    }

    pub fn evaluate(&self, sample: NetworkSample) -> AgentReport {
        let t = &self.thresholds;
        let mut degraded = Vec::new();
        if sample.latency_ms > t.latency_ms {
            degraded.push(format!(
                "latency {:.0}ms exceeds {:.0}ms",
                sample.latency_ms, t.latency_ms
            ));
        }
        if let Some(bw) = sample.bandwidth_mbps
            && bw < t.bandwidth_mbps
        {
            degraded.push(format!(
                "bandwidth {bw:.1}Mbps below {:.1}Mbps",
                t.bandwidth_mbps
            ));
        }

        let report = if !sample.connected {
            AgentReport::new(
                Self::NAME,
                ModelTier::Cloud,
                AgentState::Disconnected,
                Target::Local,
                "no endpoint reachable",
            )
            .blocking()
        } else if sample.packet_loss_pct > t.packet_loss_pct {
            AgentReport::new(
                Self::NAME,
                ModelTier::Cloud,
                AgentState::Disconnected,
                Target::Local,
                format!(
                    "packet loss {:.1}% exceeds {:.1}%",
                    sample.packet_loss_pct, t.packet_loss_pct
                ),
            )
            .blocking()
        } else if !degraded.is_empty() {
            AgentReport::new(
                Self::NAME,
                ModelTier::Cloud,
                AgentState::Degraded,
                Target::Local,
                degraded.join("; "),
            )
        } else {
            AgentReport::new(
                Self::NAME,
                ModelTier::Cloud,
                AgentState::Optimal,
                Target::Cloud,
                format!("latency {:.0}ms", sample.latency_ms),
            )
        };

        let report = report
            .with_metric("latency_ms", sample.latency_ms)
            .with_metric("packet_loss_pct", sample.packet_loss_pct);
        match sample.bandwidth_mbps {
            Some(bw) => report.with_metric("bandwidth_mbps", bw),
            None => report,
        }
    }
}

#[async_trait]
impl SignalAgent for ConnectivityAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        let sample = self.current_sample().await?;
        info!(
            connected = sample.connected,
            latency_ms = sample.latency_ms,
            "Connectivity agent ready"
        );
        Ok(())
    }

    async fn check(&self, _ctx: &RequestContext) -> AgentReport {
        match self.current_sample().await {
            Ok(sample) => self.evaluate(sample),
            Err(e) => {
                warn!(error = %e, "Network probe failed");
                AgentReport::unknown(Self::NAME, ModelTier::Cloud, e.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        sample: NetworkSample,
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NetworkProbe for Counting {
        async fn sample(&self) -> Result<NetworkSample, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.sample)
        }
    }

    fn sample(latency_ms: f64, loss: f64, bandwidth: Option<f64>) -> NetworkSample {
        NetworkSample {
            latency_ms,
            packet_loss_pct: loss,
            bandwidth_mbps: bandwidth,
            connected: true,
        }
    }

    fn counting(delay: Duration) -> Arc<Counting> {
        Arc::new(Counting {
            sample: sample(20.0, 0.0, None),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn agent() -> ConnectivityAgent {
        ConnectivityAgent::new(counting(Duration::ZERO), ConnectivityThresholds::default())
    }

    fn ms(n: u64) -> Option<Duration> {
        Some(Duration::from_millis(n))
    }

    #[test]
    fn healthy_network_prefers_cloud() {
        let report = agent().evaluate(sample(40.0, 0.0, Some(50.0)));
        assert_eq!(report.state, AgentState::Optimal);
        assert_eq!(report.target, Target::Cloud);
        assert_eq!(report.metrics["bandwidth_mbps"], 50.0);
    }

    #[test]
    fn packet_loss_over_threshold_blocks_cloud() {
        let report = agent().evaluate(sample(40.0, 12.0, None));
        assert_eq!(report.state, AgentState::Disconnected);
        assert!(!report.proceed);
        assert_eq!(report.eliminates(), Some(ModelTier::Cloud));
        assert_eq!(report.target, Target::Local);
    }

    #[test]
    fn loss_at_threshold_does_not_block() {
        let report = agent().evaluate(sample(40.0, 10.0, None));
        assert!(report.proceed);
    }

    #[test]
    fn high_latency_is_degraded() {
        let report = agent().evaluate(sample(350.0, 0.0, None));
        assert_eq!(report.state, AgentState::Degraded);
        assert_eq!(report.target, Target::Local);
        assert!(report.proceed);
    }

    #[test]
    fn low_bandwidth_is_degraded() {
        let report = agent().evaluate(sample(30.0, 0.0, Some(1.5)));
        assert_eq!(report.state, AgentState::Degraded);
        assert!(report.reason.contains("bandwidth"));
    }

    #[test]
    fn no_connection_is_disconnected() {
        let mut s = sample(0.0, 100.0, None);
        s.connected = false;
        let report = agent().evaluate(s);
        assert_eq!(report.state, AgentState::Disconnected);
        assert!(!report.proceed);
    }

    #[test]
    fn loss_counts_failed_attempts_not_dead_endpoints() {
        let live = vec![ms(10), None, ms(30), ms(20), ms(20)];
        let dead = vec![None; 5];
        let summary = summarize_connects(&[live, dead]);

        assert!(summary.connected);
        assert_eq!(summary.packet_loss_pct, 20.0);
        assert!((summary.latency_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn one_lost_attempt_in_ten_stays_at_threshold() {
        let a = vec![ms(15); 5];
        let b = vec![ms(15), ms(15), None, ms(15), ms(15)];
        let summary = summarize_connects(&[a, b]);
        assert_eq!(summary.packet_loss_pct, 10.0);

        let report = agent().evaluate(NetworkSample {
            latency_ms: summary.latency_ms,
            packet_loss_pct: summary.packet_loss_pct,
            bandwidth_mbps: None,
            connected: summary.connected,
        });
        assert!(report.proceed);
    }

    #[test]
    fn no_answers_is_not_connected() {
        let summary = summarize_connects(&[vec![None; 3], vec![None; 3]]);
        assert!(!summary.connected);
        assert_eq!(summary.packet_loss_pct, 100.0);
    }

    #[tokio::test]
    async fn measurement_cached_within_interval() {
        let probe = counting(Duration::ZERO);
        let agent = ConnectivityAgent::new(probe.clone(), ConnectivityThresholds::default());
        let ctx = crate::routing::tests_support::context("hi");

        agent.initialize().await.unwrap();
        agent.check(&ctx).await;
        agent.check(&ctx).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_checks_share_one_measurement() {
        let probe = counting(Duration::from_millis(200));
        let agent = ConnectivityAgent::new(probe.clone(), ConnectivityThresholds::default());
        let ctx = crate::routing::tests_support::context("hi");

        let reports = futures::future::join_all((0..10).map(|_| agent.check(&ctx))).await;
        assert_eq!(reports.len(), 10);
        assert!(reports.iter().all(|r| r.state == AgentState::Optimal));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_interval_probes_every_time() {
        let probe = counting(Duration::ZERO);
        let thresholds = ConnectivityThresholds {
            check_interval: Duration::ZERO,
            ..Default::default()
        };
        let agent = ConnectivityAgent::new(probe.clone(), thresholds);
        let ctx = crate::routing::tests_support::context("hi");

        agent.check(&ctx).await;
        agent.check(&ctx).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn tcp_probe_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let probe = TcpNetworkProbe::new(vec![addr]).with_attempts(3);

        let s = probe.sample().await.unwrap();
        assert!(s.connected);
        assert_eq!(s.packet_loss_pct, 0.0);
        assert!(s.bandwidth_mbps.is_none());
    }

    #[tokio::test]
    async fn dead_endpoint_does_not_eliminate_cloud() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().to_string();
        // Bind then drop to get a port that is very likely closed.
        let closed = {
            let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().to_string()
        };
        let probe = TcpNetworkProbe::new(vec![open, closed])
            .with_attempts(3)
            .with_connect_timeout(Duration::from_millis(500));
        let agent = ConnectivityAgent::new(Arc::new(probe), ConnectivityThresholds::default());

        let report = agent
            .check(&crate::routing::tests_support::context("hi"))
            .await;
        assert!(report.proceed);
        assert_ne!(report.state, AgentState::Disconnected);
        assert_eq!(report.metrics["packet_loss_pct"], 0.0);
    }

    #[tokio::test]
    async fn tcp_probe_without_endpoints_is_an_error() {
        assert!(TcpNetworkProbe::new(vec![]).sample().await.is_err());
    }
}
