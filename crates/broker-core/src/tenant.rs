//! Tenant names
//!
//! A [`TenantName`] can only be obtained through [`TenantName::parse`], so adapters
//! receiving one may rely on it being lower-case and restricted to `[a-z0-9_]`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

use crate::error::{BrokerError, Result};

static VALID_TENANT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").expect("tenant name pattern is valid"));

/// Validated, case-normalized tenant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantName(String);

impl TenantName {
    /// Normalize `raw` to lower case and validate it
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.to_lowercase();
        if !VALID_TENANT_NAME.is_match(&normalized) {
            return Err(BrokerError::InvalidTenantName(normalized));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<str> for TenantName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
