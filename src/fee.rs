//! Priority fee estimation from a public gas tracker

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Response shape of the gas tracker:
/// `{ sol: { per_transaction: { percentiles: { "25", "50", "75" } } } }`
#[derive(Debug, Deserialize)]
struct GasTrackerResponse {
    sol: SolData,
}

#[derive(Debug, Deserialize)]
struct SolData {
    per_transaction: PerTransaction,
}

#[derive(Debug, Deserialize)]
struct PerTransaction {
    percentiles: Percentiles,
}

/// Fee percentiles in micro-lamports per compute unit
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Percentiles {
    #[serde(rename = "25")]
    pub p25: f64,
    #[serde(rename = "50")]
    pub p50: f64,
    #[serde(rename = "75")]
    pub p75: f64,
}

/// Band a fee is drawn from: `[1.5 * p50, p75 + p25 / 5]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeRange {
    pub low: f64,
    pub high: f64,
}

impl FeeRange {
    pub fn from_percentiles(p: &Percentiles) -> Self {
        Self {
            low: p.p50 / 2.0 + p.p50,
            high: p.p25 / 5.0 + p.p75,
        }
    }

    /// Uniform draw over the band. An inverted band (thin markets can put
    /// 1.5 * p50 above p75) is sampled between its endpoints all the same.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        let (lo, hi) = if self.low <= self.high {
            (self.low, self.high)
        } else {
            (self.high, self.low)
        };
        if lo == hi {
            return lo;
        }
        rng.gen_range(lo..=hi)
    }
}

/// Anything able to produce a compute unit price for the next transaction
#[async_trait]
pub trait PriorityFeeSource: Send + Sync {
    /// Micro-lamports per compute unit
    async fn estimate(&self) -> Result<f64>;
}

/// Queries the gas tracker once per call; no retry
pub struct FeeEstimator {
    url: String,
    http: reqwest::Client,
}

impl FeeEstimator {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            url: url.into(),
            http,
        })
    }

    pub async fn fetch_percentiles(&self) -> Result<Percentiles> {
        let response = self
            .http
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::FeeUnavailable(format!("HTTP error! status: {}", status)));
        }

        let body: GasTrackerResponse = response.json().await?;
        Ok(body.sol.per_transaction.percentiles)
    }
}

#[async_trait]
impl PriorityFeeSource for FeeEstimator {
    async fn estimate(&self) -> Result<f64> {
        let percentiles = self.fetch_percentiles().await.map_err(|e| {
            warn!("Fetching gas tracker data failed: {}", e);
            e
        })?;

        let range = FeeRange::from_percentiles(&percentiles);
        let fee = range.sample(&mut rand::thread_rng());
        debug!(
            "Priority fee {:.2} drawn from [{:.2}, {:.2}] (p25={}, p50={}, p75={})",
            fee, range.low, range.high, percentiles.p25, percentiles.p50, percentiles.p75
        );
        Ok(fee)
    }
}

/// A constant price, for callers that already know what they want to pay
pub struct FixedFee(pub f64);

#[async_trait]
impl PriorityFeeSource for FixedFee {
    async fn estimate(&self) -> Result<f64> {
        Ok(self.0)
    }
}

/// Convert an estimate into a compute unit price; negative and NaN become 0
pub fn to_compute_unit_price(fee: f64) -> u64 {
    if fee.is_finite() && fee > 0.0 {
        fee.floor() as u64
    } else {
        0
    }
}
