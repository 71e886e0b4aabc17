use scopeql::ast::Predicate;
use scopeql::selection::filter::{evaluate_predicate, Error as FilterError};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::feed::StreamBinding;
use crate::keys::{CacheKey, KeyTemplate};
use crate::types::{ChangeEvent, EntityStream, EventMask, MutationKind, ScopeFields, TenantId, TENANT_FIELD};

/// Side effect run for every matching event, independent of invalidation
pub type EventHook = Arc<dyn Fn(&ChangeEvent) + Send + Sync + 'static>;

/// Restricts events to one tenant, optionally narrowed further.
///
/// The tenant clause is not part of the narrowing expression, so a predicate without its tenant cannot be built.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopePredicate {
    tenant: TenantId,
    narrowing: Predicate,
}

impl ScopePredicate {
    pub fn tenant(tenant: impl Into<TenantId>) -> Self { Self { tenant: tenant.into(), narrowing: Predicate::True } }

    /// AND a filter expression onto the scope, e.g. `farmer_id = '7'`
    pub fn narrow(self, selection: &str) -> Result<Self, SyncError> {
        let predicate = scopeql::parse_selection(selection)?;
        self.narrow_with(predicate)
    }

    pub fn narrow_with(self, predicate: Predicate) -> Result<Self, SyncError> {
        for literal in predicate.equalities(TENANT_FIELD) {
            let pinned = literal.as_value();
            if pinned != self.tenant.as_str() {
                return Err(SyncError::CrossTenantFilter { expected: self.tenant, found: pinned });
            }
        }
        Ok(Self { tenant: self.tenant, narrowing: self.narrowing.and(predicate) })
    }

    pub fn tenant_id(&self) -> &TenantId { &self.tenant }

    /// The full filter, tenant clause included, as sent to the backend
    pub fn to_filter(&self) -> Predicate { Predicate::field_eq(TENANT_FIELD, self.tenant.as_str()).and(self.narrowing.clone()) }

    pub fn matches(&self, fields: &ScopeFields) -> bool {
        if fields.get(TENANT_FIELD) != Some(self.tenant.as_str()) {
            return false;
        }
        match evaluate_predicate(fields, &self.narrowing) {
            Ok(matched) => matched,
            Err(FilterError::PropertyNotFound(name)) => {
                debug!("scope filter references {} which the event does not carry", name);
                false
            }
        }
    }
}

impl fmt::Display for ScopePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.to_filter()) }
}

/// One declared subscription interest: which stream, which scope, and which cache keys it invalidates
#[derive(Clone)]
pub struct SubscriptionDescriptor {
    pub stream: EntityStream,
    pub scope: ScopePredicate,
    cache_keys: Vec<KeyTemplate>,
    pub mask: EventMask,
    on_event: Option<EventHook>,
}

impl SubscriptionDescriptor {
    pub fn new(stream: impl Into<EntityStream>, scope: ScopePredicate) -> Self {
        Self { stream: stream.into(), scope, cache_keys: Vec::new(), mask: EventMask::ALL, on_event: None }
    }

    /// Add a key prefix to invalidate. Duplicates are ignored and the first insertion order is kept.
    pub fn invalidates(mut self, key: impl Into<KeyTemplate>) -> Self {
        let key = key.into();
        if !self.cache_keys.contains(&key) {
            self.cache_keys.push(key);
        }
        self
    }

    pub fn on(mut self, mask: EventMask) -> Self {
        self.mask = mask;
        self
    }

    pub fn on_event<F>(mut self, hook: F) -> Self
    where F: Fn(&ChangeEvent) + Send + Sync + 'static {
        self.on_event = Some(Arc::new(hook));
        self
    }

    pub fn cache_keys(&self) -> &[KeyTemplate] { &self.cache_keys }

    pub fn hook(&self) -> Option<&EventHook> { self.on_event.as_ref() }

    pub fn tenant_id(&self) -> &TenantId { self.scope.tenant_id() }

    pub fn accepts(&self, event: &ChangeEvent) -> bool { self.accepts_kind(event.kind) && event.stream == self.stream && self.scope.matches(&event.fields) }

    fn accepts_kind(&self, kind: MutationKind) -> bool { self.mask.contains(kind) }

    /// Concrete keys for one event. Templates the event cannot fill are skipped.
    pub fn keys_for(&self, event: &ChangeEvent) -> Vec<CacheKey> {
        let mut keys = Vec::with_capacity(self.cache_keys.len());
        for template in &self.cache_keys {
            match template.resolve(&event.fields) {
                Some(key) => keys.push(key),
                None => warn!("{}: key template {} has no value in event {}", self.stream, template, event),
            }
        }
        keys
    }

    /// Keys that need no event to resolve, used for manual refresh
    pub fn static_keys(&self) -> impl Iterator<Item = CacheKey> + '_ { self.cache_keys.iter().filter_map(KeyTemplate::as_static) }

    pub fn binding(&self) -> StreamBinding { StreamBinding { stream: self.stream.clone(), filter: self.scope.to_filter(), mask: self.mask } }
}

impl fmt::Debug for SubscriptionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionDescriptor")
            .field("stream", &self.stream)
            .field("scope", &self.scope.to_string())
            .field("cache_keys", &self.cache_keys.iter().map(|k| k.to_string()).collect::<Vec<_>>())
            .field("mask", &self.mask)
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}
