//! Optional per-table overrides supplied by the caller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sharding::{EmbeddingComputeKernel, ShardingType};

/// Constraints keyed by table name.
pub type ConstraintMap = BTreeMap<String, ParameterConstraints>;

/// Absent fields mean "use the default": every type / kernel is allowed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterConstraints {
    pub sharding_types: Option<Vec<ShardingType>>,
    pub compute_kernels: Option<Vec<EmbeddingComputeKernel>>,
    /// Named topology group (heterogeneous planning), e.g. "cpu".
    pub device_group: Option<String>,
    /// Minimum column block width for column-wise splits.
    pub min_partition: Option<u64>,
    /// Fraction of rows cached in the fast tier by UVM caching kernels.
    pub caching_ratio: Option<f64>,
    /// Average ids per sample, one entry per feature of the table.
    pub pooling_factors: Option<Vec<f64>>,
}

impl ParameterConstraints {
    pub fn with_sharding_types(mut self, types: impl IntoIterator<Item = ShardingType>) -> Self {
        self.sharding_types = Some(types.into_iter().collect());
        self
    }

    pub fn with_compute_kernels(
        mut self,
        kernels: impl IntoIterator<Item = EmbeddingComputeKernel>,
    ) -> Self {
        self.compute_kernels = Some(kernels.into_iter().collect());
        self
    }

    pub fn pinned_to(mut self, group: impl Into<String>) -> Self {
        self.device_group = Some(group.into());
        self
    }

    pub fn with_min_partition(mut self, cols: u64) -> Self {
        self.min_partition = Some(cols);
        self
    }

    pub fn with_caching_ratio(mut self, ratio: f64) -> Self {
        self.caching_ratio = Some(ratio);
        self
    }

    pub fn with_pooling_factors(mut self, factors: impl IntoIterator<Item = f64>) -> Self {
        self.pooling_factors = Some(factors.into_iter().collect());
        self
    }

    pub fn allows_sharding_type(&self, t: ShardingType) -> bool {
        self.sharding_types
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&t))
    }

    pub fn allows_compute_kernel(&self, k: EmbeddingComputeKernel) -> bool {
        self.compute_kernels
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&k))
    }

    /// Validate numeric fields against the table they constrain.
    pub fn validate(&self, table: &str, num_features: usize) -> Result<()> {
        let invalid = |reason: String| Error::InvalidTable {
            table: table.to_string(),
            reason,
        };
        if let Some(ratio) = self.caching_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(invalid(format!("caching_ratio {ratio} outside [0, 1]")));
            }
        }
        if let Some(min) = self.min_partition {
            if min == 0 {
                return Err(invalid("min_partition must be positive".into()));
            }
        }
        if let Some(factors) = &self.pooling_factors {
            if factors.len() != num_features {
                return Err(invalid(format!(
                    "{} pooling factors given for {} features",
                    factors.len(),
                    num_features
                )));
            }
            if let Some(bad) = factors.iter().find(|f| !(f.is_finite() && **f > 0.0)) {
                return Err(invalid(format!("pooling factor {bad} must be positive")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_allow_everything() {
        let c = ParameterConstraints::default();
        assert!(ShardingType::ALL.iter().all(|t| c.allows_sharding_type(*t)));
        assert!(EmbeddingComputeKernel::ALL
            .iter()
            .all(|k| c.allows_compute_kernel(*k)));
    }

    #[test]
    fn test_restricted_types() {
        let c = ParameterConstraints::default().with_sharding_types([ShardingType::RowWise]);
        assert!(c.allows_sharding_type(ShardingType::RowWise));
        assert!(!c.allows_sharding_type(ShardingType::TableWise));
    }

    #[test]
    fn test_validate_pooling_factors() {
        let c = ParameterConstraints::default().with_pooling_factors([1.0, 2.0]);
        assert!(c.validate("t", 2).is_ok());
        assert!(c.validate("t", 1).is_err());
        let c = ParameterConstraints::default().with_pooling_factors([0.0]);
        assert!(c.validate("t", 1).is_err());
        let c = ParameterConstraints::default().with_caching_ratio(1.5);
        assert!(c.validate("t", 1).is_err());
    }
}
