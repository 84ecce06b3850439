//! Label codec: identity, pool membership and OS metadata stored as Pod labels.
//!
//! Labels are the only persistent record this provider keeps. Every value
//! written here goes through [`sanitize_label_value`] so it satisfies the
//! Kubernetes label-value grammar `[A-Za-z0-9]([A-Za-z0-9._-]*[A-Za-z0-9])?`.

use std::collections::BTreeMap;

use crate::params::{BootstrapInstance, InstanceStatus};

pub const RUNNER_NAME_LABEL: &str = "garm/runner-name";
pub const CONTROLLER_ID_LABEL: &str = "garm/controllerID";
pub const POOL_ID_LABEL: &str = "garm/poolID";
pub const FLAVOR_LABEL: &str = "garm/flavour";
pub const OS_TYPE_LABEL: &str = "garm/os_type";
pub const OS_ARCH_LABEL: &str = "garm/os_arch";
pub const RUNNER_GROUP_LABEL: &str = "garm/runner-group";
pub const IMAGE_LABEL: &str = "garm/image";
pub const OS_NAME_LABEL: &str = "garm/os_name";
pub const OS_VERSION_LABEL: &str = "garm/os_version";

/// Labels every runner Pod carries, even when the value is empty.
/// Order matches the values written by [`identity_labels`].
pub const IDENTITY_LABELS: [&str; 7] = [
    RUNNER_NAME_LABEL,
    CONTROLLER_ID_LABEL,
    POOL_ID_LABEL,
    FLAVOR_LABEL,
    OS_TYPE_LABEL,
    OS_ARCH_LABEL,
    RUNNER_GROUP_LABEL,
];

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

/// Turn an arbitrary string into a valid label value.
///
/// Invalid characters become `_`, a non-alphanumeric first character becomes
/// `a` and a non-alphanumeric last character becomes `0`. The result has the
/// same number of characters as the input; empty input stays empty.
#[must_use]
pub fn sanitize_label_value(input: &str) -> String {
    let mut chars: Vec<char> = input
        .chars()
        .map(|c| if is_label_char(c) { c } else { '_' })
        .collect();

    if let Some(first) = chars.first_mut() {
        if !first.is_ascii_alphanumeric() {
            *first = 'a';
        }
    }
    if let Some(last) = chars.last_mut() {
        if !last.is_ascii_alphanumeric() {
            *last = '0';
        }
    }

    chars.into_iter().collect()
}

/// Build the label set written onto a runner Pod.
///
/// The seven identity labels are always present. Image and OS name/version
/// are omitted when their sanitized value is empty.
#[must_use]
pub fn identity_labels(controller_id: &str, bootstrap: &BootstrapInstance) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();

    let required = [
        bootstrap.name.as_str(),
        controller_id,
        bootstrap.pool_id.as_str(),
        bootstrap.flavor.as_str(),
        bootstrap.os_type.as_str(),
        bootstrap.os_arch.as_str(),
        bootstrap.github_runner_group.as_str(),
    ];
    for (key, value) in IDENTITY_LABELS.into_iter().zip(required) {
        labels.insert(key.to_string(), sanitize_label_value(value));
    }

    let extra = bootstrap.extra_specs().unwrap_or_default();
    for (key, value) in [
        (IMAGE_LABEL, bootstrap.image.as_str()),
        (OS_NAME_LABEL, extra.os_name.as_str()),
        (OS_VERSION_LABEL, extra.os_version.as_str()),
    ] {
        let value = sanitize_label_value(value);
        if !value.is_empty() {
            labels.insert(key.to_string(), value);
        }
    }

    labels
}

/// Labels scoping a lookup to one controller and, when known, one pool.
#[must_use]
pub fn scope_selector(controller_id: &str, pool_id: Option<&str>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        CONTROLLER_ID_LABEL.to_string(),
        sanitize_label_value(controller_id),
    );
    if let Some(pool_id) = pool_id.filter(|p| !p.is_empty()) {
        labels.insert(POOL_ID_LABEL.to_string(), sanitize_label_value(pool_id));
    }
    labels
}

/// Render an equality-based label selector (`k1=v1,k2=v2`).
#[must_use]
pub fn to_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Translate a Pod phase into an instance status.
///
/// An explicit override wins; it is used at creation time before the
/// cluster has assigned a phase.
#[must_use]
pub fn decode_status(phase: Option<&str>, status_override: Option<InstanceStatus>) -> InstanceStatus {
    if let Some(status) = status_override {
        return status;
    }
    match phase {
        Some("Running") => InstanceStatus::Running,
        Some("Succeeded") => InstanceStatus::Stopped,
        Some("Pending") => InstanceStatus::PendingCreate,
        Some("Failed") => InstanceStatus::Error,
        _ => InstanceStatus::Unknown,
    }
}
