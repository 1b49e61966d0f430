//! Source adapter contract
//!
//! One implementation per catalog lives with the collaborator that owns the
//! catalog's HTTP client. The core only sees field name → raw string maps
//! tagged with a [`SourceId`].

use crate::error::FetchError;
use crate::types::SourceId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw field values returned by one source for one record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePayload {
    pub fields: BTreeMap<String, String>,
}

impl SourcePayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, field: &str, value: impl Into<String>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    /// True when no field carries a non-blank value
    pub fn is_empty(&self) -> bool {
        self.fields.values().all(|v| v.trim().is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SourcePayload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A catalog the batch fetcher can query
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier used for trust weights, priority and rate limits
    fn source_id(&self) -> &SourceId;

    /// Fetch one record's fields.
    ///
    /// Transport failures map to retryable [`FetchError`] variants; an
    /// unknown record is [`FetchError::NotFound`].
    async fn fetch(&self, record_id: &str) -> Result<SourcePayload, FetchError>;
}
