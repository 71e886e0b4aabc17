//! Descriptor sets for the portal's screens.

use crate::descriptor::{ScopePredicate, SubscriptionDescriptor};
use crate::error::SyncError;
use crate::keys::{self, KeyTemplate};
use crate::types::{ScopeId, TenantId};

/// Every table the farmer workspace shows
pub const FARMER_TABLES: [&str; 13] = [
    "farmers",
    "farmer_engagement",
    "farmer_leads",
    "farmer_notes",
    "farmer_segments",
    "farmer_tags",
    "farmer_activities",
    "land_parcels",
    "crop_cycles",
    "schedules",
    "weather_data",
    "finance_data",
    "iot_sensor_data",
];

/// Tenant dashboard: the four headline collections and the aggregates they feed
pub fn tenant_overview(tenant: &TenantId) -> Vec<SubscriptionDescriptor> {
    let scope = ScopePredicate::tenant(tenant.clone());
    vec![
        SubscriptionDescriptor::new("farmers", scope.clone()).invalidates(keys::farmers(tenant)).invalidates(keys::farmer_stats(tenant)),
        SubscriptionDescriptor::new("dealers", scope.clone()).invalidates(keys::dealers(tenant)),
        SubscriptionDescriptor::new("products", scope.clone()).invalidates(keys::products(tenant)),
        SubscriptionDescriptor::new("analytics_reports", scope)
            .invalidates(keys::analytics(tenant))
            .invalidates(keys::dashboard_stats(tenant))
            .invalidates(keys::engagement_stats(tenant)),
    ]
}

/// Farmer workspace: each farmer table invalidates its own list, the affected farmer's detail queries and the
/// tenant aggregates
pub fn farmer_workspace(tenant: &TenantId) -> Vec<SubscriptionDescriptor> {
    let scope = ScopePredicate::tenant(tenant.clone());
    FARMER_TABLES
        .iter()
        .map(|table| {
            SubscriptionDescriptor::new(*table, scope.clone())
                .invalidates(keys::table(table, tenant))
                .invalidates(keys::farmer(tenant))
                .invalidates(keys::farmers(tenant))
                .invalidates(keys::farmer_stats(tenant))
                .invalidates(keys::dashboard_stats(tenant))
        })
        .collect()
}

/// The scope a single farmer's lands are watched under
pub fn farmer_lands_scope(tenant: &TenantId, farmer_id: &str) -> ScopeId { ScopeId::tenant(tenant.clone()).with_resource("farmer", farmer_id) }

/// Lands of one farmer, filtered on the backend to that farmer
pub fn farmer_lands(tenant: &TenantId, farmer_id: &str) -> Result<Vec<SubscriptionDescriptor>, SyncError> {
    let scope = ScopePredicate::tenant(tenant.clone()).narrow(&format!("farmer_id = '{}'", farmer_id.replace('\'', "''")))?;
    let detail: KeyTemplate = keys::farmer(tenant);
    Ok(vec![SubscriptionDescriptor::new("lands", scope).invalidates(keys::farmer_lands(tenant, farmer_id)).invalidates(detail)])
}
