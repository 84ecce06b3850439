//! Strategic merge of the configured Pod template over a generated Pod.
//!
//! Works directly on the JSON tree of the Pod:
//! - objects merge key by key, template values win for scalars;
//! - an explicit `null` in the template removes the field;
//! - lists with a merge key (containers and volumes by `name`, mounts by
//!   `mountPath`, ...) merge element-wise by that key, unmatched template
//!   elements are appended and base elements the template does not mention
//!   are kept; `$patch: delete` on an element removes the matching one;
//! - any other list is replaced by the template's list.

use k8s_openapi::api::core::v1::Pod;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::config::PodTemplate;
use crate::error::{ProviderError, Result};

const PATCH_DIRECTIVE: &str = "$patch";
const PATCH_DELETE: &str = "delete";

/// List fields of a Pod that merge by key, and their key.
const MERGE_KEYS: &[(&str, &str)] = &[
    ("containers", "name"),
    ("initContainers", "name"),
    ("ephemeralContainers", "name"),
    ("volumes", "name"),
    ("env", "name"),
    ("imagePullSecrets", "name"),
    ("resourceClaims", "name"),
    ("volumeMounts", "mountPath"),
    ("volumeDevices", "devicePath"),
    ("ports", "containerPort"),
    ("hostAliases", "ip"),
    ("topologySpreadConstraints", "topologyKey"),
];

fn merge_key(field: &str) -> Option<&'static str> {
    MERGE_KEYS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, key)| *key)
}

/// Merge `template` over `base`.
///
/// An empty template returns `base` unchanged. Pod name, namespace and the
/// labels set on `base` are kept even if the template tries to override them.
pub fn merge_pod_template(base: &Pod, template: &PodTemplate) -> Result<Pod> {
    if template.is_empty() {
        return Ok(base.clone());
    }

    let mut merged = serde_json::to_value(base)
        .map_err(|e| ProviderError::MergeFailure(format!("cannot serialize pod: {e}")))?;
    let root = merged
        .as_object_mut()
        .ok_or_else(|| ProviderError::MergeFailure("pod is not an object".to_string()))?;

    for section in ["metadata", "spec"] {
        let Some(patch) = template.raw().get(section).filter(|p| !p.is_null()) else {
            continue;
        };
        match root.get_mut(section) {
            Some(target) => merge_value(target, patch),
            None => {
                root.insert(section.to_string(), strip_directives(patch));
            }
        }
    }

    let mut pod: Pod = serde_json::from_value(merged)
        .map_err(|e| ProviderError::MergeFailure(format!("merged pod is invalid: {e}")))?;

    pod.metadata.name.clone_from(&base.metadata.name);
    pod.metadata.namespace.clone_from(&base.metadata.namespace);
    if let Some(base_labels) = &base.metadata.labels {
        pod.metadata
            .labels
            .get_or_insert_with(Default::default)
            .extend(base_labels.clone());
    }

    debug!(
        pod = ?pod.metadata.name,
        containers = pod.spec.as_ref().map_or(0, |s| s.containers.len()),
        "Merged pod template"
    );
    Ok(pod)
}

/// Recursively merge `patch` into `target`.
pub fn merge_value(target: &mut JsonValue, patch: &JsonValue) {
    match (target, patch) {
        (JsonValue::Object(target_map), JsonValue::Object(patch_map)) => {
            merge_object(target_map, patch_map);
        }
        (target, patch) => *target = strip_directives(patch),
    }
}

fn merge_object(target: &mut Map<String, JsonValue>, patch: &Map<String, JsonValue>) {
    for (key, patch_value) in patch {
        if key == PATCH_DIRECTIVE {
            continue;
        }
        if patch_value.is_null() {
            target.remove(key);
            continue;
        }

        match (target.get_mut(key), merge_key(key), patch_value) {
            (Some(JsonValue::Array(items)), Some(list_key), JsonValue::Array(patch_items)) => {
                merge_keyed_list(items, patch_items, list_key);
            }
            (Some(existing), _, _) => merge_value(existing, patch_value),
            (None, _, _) => {
                target.insert(key.clone(), strip_directives(patch_value));
            }
        }
    }
}

fn merge_keyed_list(items: &mut Vec<JsonValue>, patch_items: &[JsonValue], key: &str) {
    for patch_item in patch_items {
        let Some(patch_key) = patch_item.get(key) else {
            items.push(strip_directives(patch_item));
            continue;
        };

        let position = items.iter().position(|item| item.get(key) == Some(patch_key));
        let delete = patch_item.get(PATCH_DIRECTIVE).and_then(JsonValue::as_str) == Some(PATCH_DELETE);

        match (position, delete) {
            (Some(index), true) => {
                items.remove(index);
            }
            (None, true) => {}
            (Some(index), false) => merge_value(&mut items[index], patch_item),
            (None, false) => items.push(strip_directives(patch_item)),
        }
    }
}

/// Copy of `value` without `$patch` directives or `null` fields.
fn strip_directives(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .filter(|(key, value)| *key != PATCH_DIRECTIVE && !value.is_null())
                .map(|(key, value)| (key.clone(), strip_directives(value)))
                .collect(),
        ),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(strip_directives).collect()),
        other => other.clone(),
    }
}
