//! Logical embedding table descriptors supplied by the model definition.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolingType {
    Sum,
    Mean,
    /// No pooling: every looked-up row is returned (sequence embeddings).
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Fp32,
    Fp16,
    Int8,
    Int4,
    Int2,
}

impl DataType {
    pub fn bits(&self) -> u64 {
        match self {
            DataType::Fp32 => 32,
            DataType::Fp16 => 16,
            DataType::Int8 => 8,
            DataType::Int4 => 4,
            DataType::Int2 => 2,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int8 | DataType::Int4 | DataType::Int2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingTable {
    /// Unique across the model.
    pub name: String,
    pub num_embeddings: u64,
    pub embedding_dim: u64,
    pub pooling: PoolingType,
    pub data_type: DataType,
    /// Features looked up in this table; several features may share one table.
    pub feature_names: Vec<String>,
    pub weighted: bool,
    pub has_feature_processor: bool,
}

impl EmbeddingTable {
    /// A sum-pooled fp32 table.
    pub fn new<I, S>(name: impl Into<String>, num_embeddings: u64, embedding_dim: u64, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            num_embeddings,
            embedding_dim,
            pooling: PoolingType::Sum,
            data_type: DataType::Fp32,
            feature_names: features.into_iter().map(Into::into).collect(),
            weighted: false,
            has_feature_processor: false,
        }
    }

    pub fn with_pooling(mut self, pooling: PoolingType) -> Self {
        self.pooling = pooling;
        self
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn weighted(mut self) -> Self {
        self.weighted = true;
        self
    }

    pub fn with_feature_processor(mut self) -> Self {
        self.has_feature_processor = true;
        self
    }

    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn is_pooled(&self) -> bool {
        !matches!(self.pooling, PoolingType::None)
    }

    /// Reject shapes no estimator can cost.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidTable {
            table: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.embedding_dim == 0 {
            return Err(invalid("embedding_dim must be positive"));
        }
        if self.num_embeddings == 0 {
            return Err(invalid("num_embeddings must be positive"));
        }
        if self.feature_names.is_empty() {
            return Err(invalid("at least one feature name is required"));
        }
        Ok(())
    }
}
