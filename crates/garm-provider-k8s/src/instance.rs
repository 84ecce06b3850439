//! Pod to `ProviderInstance` mapping.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use crate::error::{ProviderError, Result};
use crate::labels::{
    decode_status, sanitize_label_value, OS_ARCH_LABEL, OS_NAME_LABEL, OS_TYPE_LABEL,
    OS_VERSION_LABEL, RUNNER_NAME_LABEL,
};
use crate::params::{InstanceStatus, OsArch, OsType, ProviderInstance};

/// Convert a Pod read from the cluster into the orchestrator's view.
///
/// The instance name comes from the runner name label. Pods missing that
/// label fall back to their own name; this is the same on every read path.
pub fn to_instance(pod: &Pod, status_override: Option<InstanceStatus>) -> Result<ProviderInstance> {
    let empty = BTreeMap::new();
    let labels = pod.metadata.labels.as_ref().unwrap_or(&empty);
    let label = |key: &str| labels.get(key).cloned().unwrap_or_default();

    let pod_name = pod.metadata.name.clone().filter(|n| !n.is_empty());
    let name = match labels.get(RUNNER_NAME_LABEL).filter(|n| !n.is_empty()) {
        Some(name) => name.clone(),
        None => {
            let fallback = pod_name
                .clone()
                .ok_or(ProviderError::MissingIdentityLabel(RUNNER_NAME_LABEL))?;
            debug!(pod = %fallback, "Pod has no runner name label, using pod name");
            fallback
        }
    };

    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());

    Ok(ProviderInstance {
        provider_id: pod_name.unwrap_or_else(|| name.clone()),
        name,
        os_type: OsType::parse(&label(OS_TYPE_LABEL)),
        os_arch: OsArch::parse(&label(OS_ARCH_LABEL)),
        os_name: label(OS_NAME_LABEL),
        os_version: label(OS_VERSION_LABEL),
        status: decode_status(phase, status_override),
    })
}

/// Whether `pod` is the Pod of instance `instance_id`.
///
/// GARM may address an instance by its name or by its provider id (the
/// lower-cased Pod name), so both are accepted.
#[must_use]
pub fn matches_instance(pod: &Pod, instance_id: &str) -> bool {
    let by_label = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(RUNNER_NAME_LABEL))
        .is_some_and(|name| *name == sanitize_label_value(instance_id));
    let by_name = pod
        .metadata
        .name
        .as_deref()
        .is_some_and(|name| name == instance_id.to_lowercase());
    by_label || by_name
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(name: Option<&str>, labels: &[(&str, &str)], phase: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: name.map(str::to_string),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            status: phase.map(|p| PodStatus {
                phase: Some(p.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_to_instance_reads_labels() {
        let pod = pod(
            Some("garm-abc"),
            &[
                (RUNNER_NAME_LABEL, "garm-ABC"),
                (OS_TYPE_LABEL, "linux"),
                (OS_ARCH_LABEL, "arm64"),
                (OS_NAME_LABEL, "ubuntu"),
                (OS_VERSION_LABEL, "22.04"),
            ],
            Some("Running"),
        );
        let instance = to_instance(&pod, None).unwrap();
        assert_eq!(instance.provider_id, "garm-abc");
        assert_eq!(instance.name, "garm-ABC");
        assert_eq!(instance.os_type, OsType::Linux);
        assert_eq!(instance.os_arch, OsArch::Arm64);
        assert_eq!(instance.os_name, "ubuntu");
        assert_eq!(instance.os_version, "22.04");
        assert_eq!(instance.status, InstanceStatus::Running);
    }

    #[test]
    fn test_status_from_phase_and_override() {
        let pending = pod(Some("p"), &[(RUNNER_NAME_LABEL, "p")], Some("Pending"));
        assert_eq!(
            to_instance(&pending, None).unwrap().status,
            InstanceStatus::PendingCreate
        );
        assert_eq!(
            to_instance(&pending, Some(InstanceStatus::Running)).unwrap().status,
            InstanceStatus::Running
        );

        let no_status = pod(Some("p"), &[(RUNNER_NAME_LABEL, "p")], None);
        assert_eq!(to_instance(&no_status, None).unwrap().status, InstanceStatus::Unknown);
    }

    #[test]
    fn test_missing_label_falls_back_to_pod_name() {
        let pod = pod(Some("garm-abc"), &[], Some("Failed"));
        let instance = to_instance(&pod, None).unwrap();
        assert_eq!(instance.name, "garm-abc");
        assert_eq!(instance.status, InstanceStatus::Error);
        assert_eq!(instance.os_type, OsType::Unknown);
    }

    #[test]
    fn test_missing_identity_fails() {
        let pod = pod(None, &[], None);
        let err = to_instance(&pod, None).unwrap_err();
        assert!(matches!(err, ProviderError::MissingIdentityLabel(_)));
    }

    #[test]
    fn test_matches_instance() {
        let pod = pod(Some("garm-abc"), &[(RUNNER_NAME_LABEL, "garm-ABC")], None);
        assert!(matches_instance(&pod, "garm-ABC"));
        assert!(matches_instance(&pod, "garm-abc"));
        assert!(matches_instance(&pod, "GARM-ABC"));
        assert!(!matches_instance(&pod, "garm-xyz"));
    }
}
