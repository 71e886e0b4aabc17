use chrono::{DateTime, Utc};
use scopeql::Filterable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;
use strum::Display;

/// The scope field every change event must carry
pub const TENANT_FIELD: &str = "tenant_id";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self { Self(id.to_string()) }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self { Self(id) }
}

/// Name of a logical data collection on the backend (a table, for a relational store)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityStream(String);

impl EntityStream {
    pub fn new(name: impl Into<String>) -> Self { Self(name.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for EntityStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for EntityStream {
    fn from(name: &str) -> Self { Self(name.to_string()) }
}

impl From<String> for EntityStream {
    fn from(name: String) -> Self { Self(name) }
}

/// The tenant, optionally narrowed to one sub-resource, that a channel serves.
///
/// Renders as `42` or `42/farmer:7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId {
    tenant: TenantId,
    resource: Option<(String, String)>,
}

impl ScopeId {
    pub fn tenant(tenant: impl Into<TenantId>) -> Self { Self { tenant: tenant.into(), resource: None } }

    pub fn with_resource(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.resource = Some((kind.into(), id.into()));
        self
    }

    pub fn tenant_id(&self) -> &TenantId { &self.tenant }

    pub fn resource(&self) -> Option<(&str, &str)> { self.resource.as_ref().map(|(kind, id)| (kind.as_str(), id.as_str())) }

    /// Name of the backend channel for this scope
    pub fn topic(&self, prefix: &str) -> String {
        match &self.resource {
            None => format!("{}{}", prefix, self.tenant),
            Some((kind, id)) => format!("{}{}_{}_{}", prefix, self.tenant, kind, id),
        }
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            None => write!(f, "{}", self.tenant),
            Some((kind, id)) => write!(f, "{}/{}:{}", self.tenant, kind, id),
        }
    }
}

/// Identifies one activation of a scope. Timers capture a lease and do nothing once it is no longer current.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeLease {
    pub scope: ScopeId,
    pub generation: u64,
}

impl fmt::Display for ScopeLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}#{}", self.scope, self.generation) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

/// Set of mutation kinds a descriptor reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventMask(u8);

impl EventMask {
    pub const CREATE: EventMask = EventMask(0b001);
    pub const UPDATE: EventMask = EventMask(0b010);
    pub const DELETE: EventMask = EventMask(0b100);
    pub const ALL: EventMask = EventMask(0b111);

    pub fn contains(&self, kind: MutationKind) -> bool { self.0 & EventMask::from(kind).0 != 0 }

    pub fn is_empty(&self) -> bool { self.0 == 0 }

    pub fn kinds(&self) -> Vec<MutationKind> {
        [MutationKind::Create, MutationKind::Update, MutationKind::Delete].into_iter().filter(|k| self.contains(*k)).collect()
    }
}

impl Default for EventMask {
    fn default() -> Self { EventMask::ALL }
}

impl From<MutationKind> for EventMask {
    fn from(kind: MutationKind) -> Self {
        match kind {
            MutationKind::Create => EventMask::CREATE,
            MutationKind::Update => EventMask::UPDATE,
            MutationKind::Delete => EventMask::DELETE,
        }
    }
}

impl BitOr for EventMask {
    type Output = EventMask;
    fn bitor(self, rhs: EventMask) -> EventMask { EventMask(self.0 | rhs.0) }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == EventMask::ALL {
            return f.write_str("*");
        }
        let kinds: Vec<String> = self.kinds().iter().map(|k| k.to_string()).collect();
        f.write_str(&kinds.join("|"))
    }
}

/// The scope-relevant fields of a mutated record: its tenant and any parent ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeFields(BTreeMap<String, String>);

impl ScopeFields {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) { self.0.insert(name.into(), value.into()); }

    pub fn get(&self, name: &str) -> Option<&str> { self.0.get(name).map(String::as_str) }

    pub fn tenant_id(&self) -> Option<TenantId> { self.get(TENANT_FIELD).filter(|t| !t.is_empty()).map(TenantId::from) }
}

impl Filterable for ScopeFields {
    fn value(&self, name: &str) -> Option<String> { self.0.get(name).cloned() }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ScopeFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self { Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect()) }
}

/// A raw row-mutation notification as delivered by the change feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub stream: EntityStream,
    pub kind: MutationKind,
    pub fields: ScopeFields,
    pub record_id: Option<String>,
    pub committed_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(stream: impl Into<EntityStream>, kind: MutationKind) -> Self {
        Self { stream: stream.into(), kind, fields: ScopeFields::new(), record_id: None, committed_at: Utc::now() }
    }

    pub fn tenant(self, tenant: impl Into<String>) -> Self { self.field(TENANT_FIELD, tenant) }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name, value);
        self
    }

    pub fn record(mut self, id: impl Into<String>) -> Self {
        self.record_id = Some(id.into());
        self
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.stream)?;
        if let Some(id) = &self.record_id {
            write!(f, " {}", id)?;
        }
        Ok(())
    }
}
