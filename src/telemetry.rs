// propagate-rs/src/telemetry.rs
// Observed route-level call counts, read from an NDJSON export.
//
// Rows are pre-aggregated per (consumer, producer, method, route) over the
// telemetry window. Lines that fail to parse are logged and skipped so a
// single bad row never blocks a run.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::differ::HttpMethod;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub consumer: String,
    pub producer: String,
    pub method: HttpMethod,
    pub route_template: String,
    pub calls_7d: u64,
    pub confidence: Confidence,
    /// When the aggregate was recorded; rows without a timestamp are assumed
    /// current.
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl TelemetrySample {
    pub fn route(&self) -> String {
        format!("{} {}", self.method, self.route_template)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TelemetryStore {
    samples: Vec<TelemetrySample>,
}

impl TelemetryStore {
    pub fn new(samples: Vec<TelemetrySample>) -> Self {
        Self { samples }
    }

    /// Load samples from an NDJSON file. A missing file yields an empty
    /// store: telemetry enriches impact mapping but is not required.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no telemetry file; proceeding with declared edges only");
            return Ok(Self::default());
        }

        let raw = tokio::fs::read_to_string(path).await?;
        let mut samples = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TelemetrySample>(line) {
                Ok(sample) => samples.push(sample),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unparseable telemetry row");
                }
            }
        }
        Ok(Self { samples })
    }

    /// Samples of callers of `producer` within the window, newest first not
    /// guaranteed; rows outside the window are dropped.
    pub fn samples_for(
        &self,
        producer: &str,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Vec<&TelemetrySample> {
        let cutoff = now - Duration::days(window_days);
        self.samples
            .iter()
            .filter(|s| s.producer == producer)
            .filter(|s| s.recorded_at.map(|ts| ts >= cutoff).unwrap_or(true))
            .filter(|s| s.calls_7d > 0)
            .collect()
    }
}
