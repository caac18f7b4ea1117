//! Resource pressure agent. Guards the local tier: when this machine is out
//! of headroom, local inference is the wrong place to run.

use async_trait::async_trait;
use oblix_core::OblixConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{AgentError, AgentReport, AgentState, SignalAgent};
use crate::types::{ModelTier, RequestContext, Target};

/// CPU and memory utilization, both in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

#[async_trait]
pub trait ResourceProbe: Send + Sync {
    async fn sample(&self) -> Result<ResourceSample, AgentError>;
}

// ---------------------------------------------------------------------------
// sysinfo probe
// ---------------------------------------------------------------------------

/// Samples the host through `sysinfo`.
///
/// CPU usage needs two refreshes separated by the minimum update interval,
/// so each sample blocks a pool thread for roughly 200 ms.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProbe;

impl SysinfoProbe {
    fn sample_blocking() -> ResourceSample {
        use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

        let mut sys = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_cpu_all();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_all();

        let total = sys.total_memory();
        let memory_percent = if total > 0 {
            (sys.used_memory() as f64 / total as f64 * 100.0) as f32
        } else {
            0.0
        };

        ResourceSample {
            cpu_percent: sys.global_cpu_usage(),
            memory_percent,
        }
    }
}

#[async_trait]
impl ResourceProbe for SysinfoProbe {
    async fn sample(&self) -> Result<ResourceSample, AgentError> {
        tokio::task::spawn_blocking(Self::sample_blocking)
            .await
            .map_err(|e| AgentError::ProbeUnavailable(format!("resource sampling task failed: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceThresholds {
    pub cpu_pct: f32,
    pub memory_pct: f32,
    pub critical_cpu_pct: f32,
    pub critical_memory_pct: f32,
    /// Memory level at which local inference is refused outright.
    pub emergency_memory_pct: f32,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            cpu_pct: 80.0,
            memory_pct: 85.0,
            critical_cpu_pct: 95.0,
            critical_memory_pct: 95.0,
            emergency_memory_pct: 98.0,
        }
    }
}

impl From<&OblixConfig> for ResourceThresholds {
    fn from(config: &OblixConfig) -> Self {
        Self {
            cpu_pct: config.cpu_threshold_pct,
            memory_pct: config.memory_threshold_pct,
            critical_cpu_pct: config.critical_cpu_pct,
            critical_memory_pct: config.critical_memory_pct,
            emergency_memory_pct: config.emergency_memory_pct,
        }
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

pub struct ResourceAgent {
    probe: Arc<dyn ResourceProbe>,
    thresholds: ResourceThresholds,
}

impl ResourceAgent {
    pub const NAME: &'static str = "resource";

    pub fn new(probe: Arc<dyn ResourceProbe>, thresholds: ResourceThresholds) -> Self {
        Self { probe, thresholds }
    }

    /// Agent backed by [`SysinfoProbe`].
    pub fn system(thresholds: ResourceThresholds) -> Self {
        Self::new(Arc::new(SysinfoProbe), thresholds)
    }

    /// Map a sample onto a report.
    pub fn evaluate(&self, sample: ResourceSample) -> AgentReport {
        let t = &self.thresholds;
        let ResourceSample {
            cpu_percent: cpu,
            memory_percent: mem,
        } = sample;

        let report = if mem >= t.emergency_memory_pct {
            AgentReport::new(
                Self::NAME,
                ModelTier::Local,
                AgentState::ResourceExhausted,
                Target::Cloud,
                format!(
                    "memory {mem:.1}% at or above emergency level {:.1}%",
                    t.emergency_memory_pct
                ),
            )
            .blocking()
        } else if cpu >= t.critical_cpu_pct || mem >= t.critical_memory_pct {
            AgentReport::new(
                Self::NAME,
                ModelTier::Local,
                AgentState::Critical,
                Target::Cloud,
                format!("critical load: cpu {cpu:.1}%, memory {mem:.1}%"),
            )
        } else if cpu >= t.cpu_pct || mem >= t.memory_pct {
            AgentReport::new(
                Self::NAME,
                ModelTier::Local,
                AgentState::Constrained,
                Target::Hybrid,
                format!("elevated load: cpu {cpu:.1}%, memory {mem:.1}%"),
            )
        } else {
            AgentReport::new(
                Self::NAME,
                ModelTier::Local,
                AgentState::Available,
                Target::Local,
                format!("headroom available: cpu {cpu:.1}%, memory {mem:.1}%"),
            )
        };

        report
            .with_metric("cpu_percent", f64::from(cpu))
            .with_metric("memory_percent", f64::from(mem))
    }
}

#[async_trait]
impl SignalAgent for ResourceAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        let sample = self.probe.sample().await?;
        debug!(cpu = sample.cpu_percent, memory = sample.memory_percent, "Resource probe ready");
        Ok(())
    }

    async fn check(&self, _ctx: &RequestContext) -> AgentReport {
        match self.probe.sample().await {
            Ok(sample) => self.evaluate(sample),
            Err(e) => {
                warn!(error = %e, "Resource probe failed");
                AgentReport::unknown(Self::NAME, ModelTier::Local, e.to_string())
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

    struct Fixed(Option<ResourceSample>);

    #[async_trait]
    impl ResourceProbe for Fixed {
        async fn sample(&self) -> Result<ResourceSample, AgentError> {
            self.0
                .ok_or_else(|| AgentError::ProbeUnavailable("no sensor".into()))
        }
    }

    fn agent_with(sample: Option<ResourceSample>) -> ResourceAgent {
        ResourceAgent::new(Arc::new(Fixed(sample)), ResourceThresholds::default())
    }

    fn sample(cpu: f32, mem: f32) -> ResourceSample {
        ResourceSample {
            cpu_percent: cpu,
            memory_percent: mem,
        }
    }

    fn eval(cpu: f32, mem: f32) -> AgentReport {
        agent_with(None).evaluate(sample(cpu, mem))
    }

    #[test]
    fn idle_machine_prefers_local() {
        let report = eval(20.0, 40.0);
        assert_eq!(report.state, AgentState::Available);
        assert_eq!(report.target, Target::Local);
        assert!(report.proceed);
        assert_eq!(report.metrics["cpu_percent"], 20.0);
        assert_eq!(report.metrics["memory_percent"], 40.0);
    }

    #[test]
    fn threshold_breach_is_constrained() {
        assert_eq!(eval(85.0, 40.0).state, AgentState::Constrained);
        assert_eq!(eval(10.0, 86.0).target, Target::Hybrid);
    }

    #[test]
    fn critical_load_prefers_cloud_without_blocking() {
        let report = eval(96.0, 50.0);
        assert_eq!(report.state, AgentState::Critical);
        assert_eq!(report.target, Target::Cloud);
        assert!(report.proceed);
    }

    #[test]
    fn emergency_memory_blocks_local() {
        let report = eval(10.0, 98.5);
        assert_eq!(report.state, AgentState::ResourceExhausted);
        assert_eq!(report.eliminates(), Some(ModelTier::Local));
    }

    #[test]
    fn thresholds_follow_config() {
        let config = OblixConfig {
            cpu_threshold_pct: 50.0,
            ..Default::default()
        };
        let t = ResourceThresholds::from(&config);
        assert_eq!(t.cpu_pct, 50.0);
        assert_eq!(t.emergency_memory_pct, 98.0);
    }

    #[tokio::test]
    async fn failed_probe_fails_init_and_reports_unknown() {
        let agent = agent_with(None);
        assert!(agent.initialize().await.is_err());

        let ctx = crate::routing::tests_support::context("hi");
        let report = agent.check(&ctx).await;
        assert_eq!(report.state, AgentState::Unknown);
        assert!(report.proceed);
    }

    #[tokio::test]
    async fn check_uses_probe() {
        let agent = agent_with(Some(sample(5.0, 10.0)));
        agent.initialize().await.unwrap();
        let ctx = crate::routing::tests_support::context("hi");
        assert_eq!(agent.check(&ctx).await.state, AgentState::Available);
    }

    #[tokio::test]
    async fn sysinfo_probe_returns_percentages() {
        let s = SysinfoProbe.sample().await.unwrap();
        assert!((0.0..=100.0).contains(&s.memory_percent));
        assert!(s.cpu_percent >= 0.0);
    }
}
