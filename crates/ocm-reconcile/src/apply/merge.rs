//! Pure merge of a desired object onto its observed copy

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use super::{DriftPolicy, Subordinate};

/// Result of merging desired state onto an observed object
#[derive(Clone, Debug)]
pub struct Merged<K> {
    /// The observed object with desired metadata and spec applied
    pub object: K,
    /// Whether `object` differs from the observed object
    pub modified: bool,
}

/// Merge `desired` onto a copy of `existing`
///
/// Desired labels, annotations and owner references are ensured present;
/// entries added by the store or other writers are kept. The kind's
/// user-controlled fields are overlaid from `desired`. For generation-gated
/// kinds a spec difference alone does not mark the result modified, since
/// the server defaults those specs heavily.
pub fn merge<K: Subordinate>(existing: &K, desired: &K) -> Merged<K> {
    let mut object = existing.clone();
    let mut modified = false;
    ensure_object_meta(&mut modified, object.meta_mut(), desired.meta());

    let spec_differs = !existing.spec_matches(desired);
    object.overlay_spec(desired);
    if spec_differs && K::DRIFT_POLICY == DriftPolicy::Semantic {
        modified = true;
    }

    Merged { object, modified }
}

/// Ensure the identifying and user-owned parts of `required` are present in
/// `existing`, setting `modified` when anything had to change
pub fn ensure_object_meta(modified: &mut bool, existing: &mut ObjectMeta, required: &ObjectMeta) {
    set_string_if_set(modified, &mut existing.name, &required.name);
    set_string_if_set(modified, &mut existing.namespace, &required.namespace);
    merge_map(modified, &mut existing.labels, &required.labels);
    merge_map(modified, &mut existing.annotations, &required.annotations);
    merge_owner_refs(modified, &mut existing.owner_references, &required.owner_references);
}

fn set_string_if_set(modified: &mut bool, existing: &mut Option<String>, required: &Option<String>) {
    match required {
        Some(value) if !value.is_empty() && existing.as_ref() != Some(value) => {
            *existing = Some(value.clone());
            *modified = true;
        }
        _ => {}
    }
}

fn merge_map(
    modified: &mut bool,
    existing: &mut Option<BTreeMap<String, String>>,
    required: &Option<BTreeMap<String, String>>,
) {
    let Some(required) = required else {
        return;
    };
    for (key, value) in required {
        let current = existing.get_or_insert_with(BTreeMap::new);
        if current.get(key) != Some(value) {
            current.insert(key.clone(), value.clone());
            *modified = true;
        }
    }
}

fn same_owner(a: &OwnerReference, b: &OwnerReference) -> bool {
    a.kind == b.kind && a.name == b.name && api_group(&a.api_version) == api_group(&b.api_version)
}

fn api_group(api_version: &str) -> &str {
    api_version.rsplit_once('/').map(|(g, _)| g).unwrap_or("")
}

fn merge_owner_refs(
    modified: &mut bool,
    existing: &mut Option<Vec<OwnerReference>>,
    required: &Option<Vec<OwnerReference>>,
) {
    let Some(required) = required else {
        return;
    };
    for owner in required {
        let current = existing.get_or_insert_with(Vec::new);
        match current.iter_mut().find(|o| same_owner(o, owner)) {
            Some(found) if found != owner => {
                *found = owner.clone();
                *modified = true;
            }
            Some(_) => {}
            None => {
                current.push(owner.clone());
                *modified = true;
            }
        }
    }
}
