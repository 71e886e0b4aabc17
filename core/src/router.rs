use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

use crate::descriptor::SubscriptionDescriptor;
use crate::keys::CacheKey;
use crate::types::{ChangeEvent, TenantId};

/// A descriptor that accepted an event, with the concrete keys that event resolves to
#[derive(Debug)]
pub struct MatchedDescriptor<'a> {
    pub descriptor: &'a SubscriptionDescriptor,
    pub keys: Vec<CacheKey>,
}

/// Resolves change events to the descriptors of one channel
#[derive(Debug)]
pub struct EventRouter {
    tenant: TenantId,
    descriptors: Vec<SubscriptionDescriptor>,
    dropped: AtomicU64,
}

impl EventRouter {
    pub fn new(tenant: TenantId, descriptors: Vec<SubscriptionDescriptor>) -> Self { Self { tenant, descriptors, dropped: AtomicU64::new(0) } }

    pub fn descriptors(&self) -> &[SubscriptionDescriptor] { &self.descriptors }

    /// Every descriptor whose stream, mask and scope accept the event. No match is a normal outcome.
    ///
    /// `None` when the event does not belong to this channel's tenant. Events without a tenant are malformed:
    /// they are logged, counted and dropped.
    pub fn route(&self, event: &ChangeEvent) -> Option<Vec<MatchedDescriptor<'_>>> {
        let Some(tenant) = event.fields.tenant_id() else {
            warn!("dropping {} event with no tenant scope", event);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        if tenant != self.tenant {
            debug!("ignoring {} event for tenant {} on channel for {}", event, tenant, self.tenant);
            return None;
        }

        let matched: Vec<MatchedDescriptor<'_>> = self
            .descriptors
            .iter()
            .filter(|descriptor| descriptor.accepts(event))
            .map(|descriptor| MatchedDescriptor { descriptor, keys: descriptor.keys_for(event) })
            .collect();
        trace!("{} matched {} descriptor(s)", event, matched.len());
        Some(matched)
    }

    pub fn dropped_events(&self) -> u64 { self.dropped.load(Ordering::Relaxed) }

    /// Distinct streams, in descriptor order
    pub fn streams(&self) -> Vec<crate::types::EntityStream> {
        let mut streams = Vec::new();
        for descriptor in &self.descriptors {
            if !streams.contains(&descriptor.stream) {
                streams.push(descriptor.stream.clone());
            }
        }
        streams
    }
}
