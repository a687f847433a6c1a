//! Planner configuration that callers can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::constants::{
    kernel_lookup_bw, CACHING_FACTOR, DEFAULT_CW_DIM, DEFAULT_MAX_PROPOSALS,
    DEFAULT_POOLING_FACTOR,
};
use crate::error::{Error, Result};
use crate::sharding::EmbeddingComputeKernel;
use crate::topology::ComputeDevice;

/// Replaces one entry of the default kernel bandwidth table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelBandwidth {
    pub device: ComputeDevice,
    pub kernel: EmbeddingComputeKernel,
    /// GB/s
    pub gbps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Search budget: number of candidate sets handed to the partitioner.
    pub max_proposals: usize,

    /// Stop early once the best plan's max/mean rank perf is at or below this.
    pub target_balance: Option<f64>,

    /// Inference plans carry no backward cost and no optimizer state.
    pub is_inference: bool,

    /// Default minimum column block width for column-wise splits.
    pub min_cw_dim: u64,

    /// Ids per sample assumed for features without an explicit factor.
    pub default_pooling_factor: f64,

    /// Default fraction of rows cached in HBM by UVM caching kernels.
    pub caching_ratio: f64,

    /// fp32 optimizer buffers kept per weight by fused kernels.
    pub optimizer_buffers: u64,

    /// After search, grow UVM cache ratios as far as capacity allows.
    pub cache_scaleup: bool,

    /// Overrides for the kernel lookup bandwidth table.
    pub kernel_bandwidths: Vec<KernelBandwidth>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_proposals: DEFAULT_MAX_PROPOSALS,
            target_balance: None,
            is_inference: false,
            min_cw_dim: DEFAULT_CW_DIM,
            default_pooling_factor: DEFAULT_POOLING_FACTOR,
            caching_ratio: CACHING_FACTOR,
            optimizer_buffers: 1,
            cache_scaleup: false,
            kernel_bandwidths: Vec::new(),
        }
    }
}

impl PlannerConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `SHARDPLAN_MAX_PROPOSALS`: search budget
    /// - `SHARDPLAN_TARGET_BALANCE`: early-stop balance threshold
    /// - `SHARDPLAN_INFERENCE`: `1`/`true` for inference plans
    /// - `SHARDPLAN_MIN_CW_DIM`: minimum column block width
    /// - `SHARDPLAN_POOLING_FACTOR`: default ids per sample
    /// - `SHARDPLAN_CACHING_RATIO`: default UVM cache ratio
    /// - `SHARDPLAN_OPTIMIZER_BUFFERS`: optimizer buffers per weight
    /// - `SHARDPLAN_CACHE_SCALEUP`: `1`/`true` to grow UVM caches
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(s) = lookup("SHARDPLAN_MAX_PROPOSALS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_proposals = v;
            }
        }

        if let Some(s) = lookup("SHARDPLAN_TARGET_BALANCE") {
            if let Ok(v) = s.parse::<f64>() {
                cfg.target_balance = Some(v);
            }
        }

        if let Some(s) = lookup("SHARDPLAN_INFERENCE") {
            cfg.is_inference = parse_flag(&s);
        }

        if let Some(s) = lookup("SHARDPLAN_MIN_CW_DIM") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.min_cw_dim = v;
            }
        }

        if let Some(s) = lookup("SHARDPLAN_POOLING_FACTOR") {
            if let Ok(v) = s.parse::<f64>() {
                cfg.default_pooling_factor = v;
            }
        }

        if let Some(s) = lookup("SHARDPLAN_CACHING_RATIO") {
            if let Ok(v) = s.parse::<f64>() {
                cfg.caching_ratio = v;
            }
        }

        if let Some(s) = lookup("SHARDPLAN_OPTIMIZER_BUFFERS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.optimizer_buffers = v;
            }
        }

        if let Some(s) = lookup("SHARDPLAN_CACHE_SCALEUP") {
            cfg.cache_scaleup = parse_flag(&s);
        }

        cfg
    }

    /// Parse a YAML planner profile; missing keys take their defaults.
    ///
    /// ```yaml
    /// max_proposals: 64
    /// is_inference: true
    /// kernel_bandwidths:
    ///   - { device: cuda, kernel: batched_fused, gbps: 1200.0 }
    /// ```
    pub fn from_yaml_str(src: &str) -> Result<Self> {
        let cfg: PlannerConfig = serde_yaml::from_str(src)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_proposals == 0 {
            return Err(Error::Config("max_proposals must be positive".into()));
        }
        if let Some(t) = self.target_balance {
            if !(t.is_finite() && t >= 1.0) {
                return Err(Error::Config(format!("target_balance {t} must be >= 1.0")));
            }
        }
        if self.min_cw_dim == 0 {
            return Err(Error::Config("min_cw_dim must be positive".into()));
        }
        if !(self.default_pooling_factor.is_finite() && self.default_pooling_factor > 0.0) {
            return Err(Error::Config(format!(
                "default_pooling_factor {} must be positive",
                self.default_pooling_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.caching_ratio) {
            return Err(Error::Config(format!(
                "caching_ratio {} outside [0, 1]",
                self.caching_ratio
            )));
        }
        for kb in &self.kernel_bandwidths {
            if !(kb.gbps.is_finite() && kb.gbps > 0.0) {
                return Err(Error::Config(format!(
                    "bandwidth for ({}, {}) must be positive",
                    kb.device, kb.kernel
                )));
            }
        }
        Ok(())
    }

    /// Effective lookup bandwidth (GB/s): an override if present, else the default table.
    pub fn kernel_bw(
        &self,
        device: ComputeDevice,
        kernel: EmbeddingComputeKernel,
        caching_ratio: f64,
    ) -> Option<f64> {
        self.kernel_bandwidths
            .iter()
            .rev()
            .find(|kb| kb.device == device && kb.kernel == kernel)
            .map(|kb| kb.gbps)
            .or_else(|| kernel_lookup_bw(device, kernel, caching_ratio))
    }
}

fn parse_flag(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
