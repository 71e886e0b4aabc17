//! Cache keys and the query-key builders used by the portal screens.
//!
//! A key is a list of segments. `farmers:42` is the two segments `farmers` and `42`, and prefix matching is
//! segment-wise, so `farmers:42` covers `farmers:42:page=2` but never `farmers:420`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;
use crate::types::{ScopeFields, TenantId};

const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] { &self.0 }

    /// True when `prefix` covers this key
    pub fn starts_with(&self, prefix: &CacheKey) -> bool { self.0.starts_with(&prefix.0) }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0.join(":")) }
}

impl FromStr for CacheKey {
    type Err = SyncError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(SyncError::InvalidKey { key: s.to_string(), reason: "empty key" });
        }
        let segments: Vec<String> = s.split(SEPARATOR).map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(SyncError::InvalidKey { key: s.to_string(), reason: "empty segment" });
        }
        Ok(Self(segments))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A cache key whose segments may be `{field}` placeholders, filled from the scope fields of each event.
///
/// `farmer:{tenant_id}:{farmer_id}` resolves to `farmer:42:7` for an event carrying `farmer_id = 7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyTemplate(Vec<Segment>);

impl KeyTemplate {
    /// Resolve against an event's fields. `None` when a placeholder has no value.
    pub fn resolve(&self, fields: &ScopeFields) -> Option<CacheKey> {
        let mut segments = Vec::with_capacity(self.0.len());
        for segment in &self.0 {
            match segment {
                Segment::Literal(s) => segments.push(s.clone()),
                Segment::Field(name) => segments.push(fields.get(name).filter(|v| !v.is_empty())?.to_string()),
            }
        }
        Some(CacheKey(segments))
    }

    /// The key itself when there are no placeholders
    pub fn as_static(&self) -> Option<CacheKey> {
        self.0
            .iter()
            .map(|segment| match segment {
                Segment::Literal(s) => Some(s.clone()),
                Segment::Field(_) => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(CacheKey)
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|segment| match segment {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }
}

impl From<CacheKey> for KeyTemplate {
    fn from(key: CacheKey) -> Self { Self(key.0.into_iter().map(Segment::Literal).collect()) }
}

impl FromStr for KeyTemplate {
    type Err = SyncError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| SyncError::InvalidKey { key: s.to_string(), reason };
        if s.is_empty() {
            return Err(invalid("empty key"));
        }
        let mut segments = Vec::new();
        for part in s.split(SEPARATOR) {
            if part.is_empty() {
                return Err(invalid("empty segment"));
            }
            match part.strip_prefix('{') {
                Some(rest) => {
                    let name = rest.strip_suffix('}').ok_or_else(|| invalid("unterminated placeholder"))?;
                    if name.is_empty() || name.contains(['{', '}']) {
                        return Err(invalid("malformed placeholder"));
                    }
                    segments.push(Segment::Field(name.to_string()));
                }
                None if part.contains(['{', '}']) => return Err(invalid("placeholder must span a whole segment")),
                None => segments.push(Segment::Literal(part.to_string())),
            }
        }
        Ok(Self(segments))
    }
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            match segment {
                Segment::Literal(s) => f.write_str(s)?,
                Segment::Field(name) => write!(f, "{{{}}}", name)?,
            }
        }
        Ok(())
    }
}

fn tenant_key(root: &str, tenant: &TenantId) -> CacheKey { CacheKey::new([root, tenant.as_str()]) }

pub fn farmers(tenant: &TenantId) -> CacheKey { tenant_key("farmers", tenant) }
pub fn farmer_stats(tenant: &TenantId) -> CacheKey { tenant_key("farmer-stats", tenant) }
pub fn dealers(tenant: &TenantId) -> CacheKey { tenant_key("dealers", tenant) }
pub fn products(tenant: &TenantId) -> CacheKey { tenant_key("products", tenant) }
pub fn analytics(tenant: &TenantId) -> CacheKey { tenant_key("analytics", tenant) }
pub fn engagement_stats(tenant: &TenantId) -> CacheKey { tenant_key("engagement-stats", tenant) }
pub fn dashboard_stats(tenant: &TenantId) -> CacheKey { tenant_key("dashboard-stats", tenant) }

/// Per-table list key, e.g. `crop_cycles:42`
pub fn table(name: &str, tenant: &TenantId) -> CacheKey { tenant_key(name, tenant) }

/// One farmer's detail queries, resolved per event from its `farmer_id`
pub fn farmer(tenant: &TenantId) -> KeyTemplate {
    KeyTemplate(vec![Segment::Literal("farmer".into()), Segment::Literal(tenant.to_string()), Segment::Field("farmer_id".into())])
}

pub fn farmer_lands(tenant: &TenantId, farmer_id: &str) -> CacheKey { CacheKey::new(["farmer-lands", tenant.as_str(), farmer_id]) }
