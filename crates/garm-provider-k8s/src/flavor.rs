//! Flavor to resource requirements resolution.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Operator supplied flavor table (flavor name -> requests/limits).
pub type FlavorTable = BTreeMap<String, ResourceRequirements>;

pub const DEFAULT_CPU: &str = "500m";
pub const DEFAULT_MEMORY: &str = "500Mi";

/// Built-in profile used when no flavor table is configured.
#[must_use]
pub fn default_profile() -> ResourceRequirements {
    let quantities = BTreeMap::from([
        ("cpu".to_string(), Quantity(DEFAULT_CPU.to_string())),
        ("memory".to_string(), Quantity(DEFAULT_MEMORY.to_string())),
    ]);

    ResourceRequirements {
        limits: Some(quantities.clone()),
        requests: Some(quantities),
        ..Default::default()
    }
}

/// Resolve the resources for `flavor`.
///
/// Without a table every flavor gets [`default_profile`]. Once a table is
/// configured, listed flavors are returned verbatim and unknown flavors get
/// no constraints at all.
#[must_use]
pub fn resolve(flavor: &str, table: Option<&FlavorTable>) -> ResourceRequirements {
    match table {
        None => default_profile(),
        Some(table) => table.get(flavor).cloned().unwrap_or_default(),
    }
}
