//! HTTP client for communicating with intaked.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use intake_common::{AnalysisMode, Report, DEFAULT_DAEMON_URL};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable overriding the daemon URL
pub const URL_ENV: &str = "INTAKED_URL";

#[derive(Debug, Serialize)]
struct AnalyzeBody<'a> {
    date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    sources: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<AnalysisMode>,
    include_trace: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub oracle: bool,
    pub sources: usize,
}

/// Client for communicating with intaked
pub struct IntakedClient {
    http: reqwest::Client,
    base_url: String,
}

impl IntakedClient {
    /// Resolve the URL from the flag, then `$INTAKED_URL`, then the default
    pub fn new(url: Option<String>) -> Result<Self> {
        let base_url = url
            .or_else(|| std::env::var(URL_ENV).ok())
            .unwrap_or_else(|| DEFAULT_DAEMON_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        // Agentic runs can take minutes
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .context("building HTTP client")?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn analyze(
        &self,
        date: NaiveDate,
        sources: &[String],
        mode: Option<AnalysisMode>,
        include_trace: bool,
    ) -> Result<Report> {
        let body = AnalyzeBody {
            date,
            sources: (!sources.is_empty()).then_some(sources),
            mode,
            include_trace,
        };
        let response = self
            .http
            .post(format!("{}/v1/analyze", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Analysis failed ({}): {}", status, text));
        }
        response.json().await.context("Failed to parse report")
    }

    pub async fn health(&self) -> Result<Health> {
        let response = self
            .http
            .get(format!("{}/v1/health", self.base_url))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        if !response.status().is_success() {
            return Err(anyhow!("Health check failed: {}", response.status()));
        }
        response.json().await.context("Failed to parse health response")
    }

    fn unreachable(&self, e: reqwest::Error) -> anyhow::Error {
        anyhow!(
            "Cannot reach intaked at {}: {}\n\n\
             Start the daemon or point intakectl at it with --url or ${}.",
            self.base_url,
            e,
            URL_ENV
        )
    }
}
