//! # Ownership Classification
//!
//! Pure predicates over object metadata deciding whether an object belongs to
//! the operator lifecycle manager and whether it already carries the ownership
//! marker. None of these touch the cluster; all of them tolerate missing
//! label, annotation and owner-reference maps.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Label key of the ownership marker
pub const MANAGED_LABEL_KEY: &str = "olm.managed";

/// Label value of the ownership marker
pub const MANAGED_LABEL_VALUE: &str = "true";

/// Field manager attributed to every mutation this crate submits
pub const FIELD_MANAGER: &str = "olm-ownership-labeller";

/// Owner labels recorded on objects that cannot carry an owner reference
pub const OWNER_KEY: &str = "olm.owner";
pub const OWNER_NAMESPACE_KEY: &str = "olm.owner.namespace";
pub const OWNER_KIND: &str = "olm.owner.kind";

/// Prefix reserved for component-identity labels
pub const COMPONENT_LABEL_KEY_PREFIX: &str = "operators.coreos.com/";

/// Annotation prefix stamped on CRDs installed next to an operator
pub const INSTALLED_ALONGSIDE_ANNOTATION_PREFIX: &str = "operatorframework.io/installed-alongside-";

/// API group-versions of the controlling system
pub const OWNER_GROUP_VERSIONS: [&str; 3] = [
    "operators.coreos.com/v1",
    "operators.coreos.com/v1alpha1",
    "operators.coreos.com/v1alpha2",
];

/// Returns `true` iff the labels carry the marker key with the exact marker value
#[must_use]
pub fn is_marked(meta: &ObjectMeta) -> bool {
    meta.labels
        .as_ref()
        .and_then(|labels| labels.get(MANAGED_LABEL_KEY))
        .is_some_and(|value| value == MANAGED_LABEL_VALUE)
}

/// Determines if an object is owned by another object in the OLM groups.
///
/// Checks classical owner references first, then falls back to the owner
/// labels used by cluster-scoped objects. Label values are not inspected.
#[must_use]
pub fn has_owner_ref(meta: &ObjectMeta) -> bool {
    let referenced = meta.owner_references.iter().flatten().any(|owner| {
        OWNER_GROUP_VERSIONS
            .iter()
            .any(|gv| owner.api_version == *gv)
    });
    if referenced {
        return true;
    }

    let Some(labels) = meta.labels.as_ref() else {
        return false;
    };
    [OWNER_KEY, OWNER_NAMESPACE_KEY, OWNER_KIND]
        .iter()
        .all(|key| labels.contains_key(*key))
}

/// Returns `true` if any label key falls under the component label prefix
#[must_use]
pub fn has_component_label(meta: &ObjectMeta) -> bool {
    meta.labels
        .iter()
        .flatten()
        .any(|(key, _)| key.starts_with(COMPONENT_LABEL_KEY_PREFIX))
}

/// Returns `true` if the object was installed alongside an operator
#[must_use]
pub fn is_installed_alongside(meta: &ObjectMeta) -> bool {
    meta.annotations
        .iter()
        .flatten()
        .any(|(key, _)| key.starts_with(INSTALLED_ALONGSIDE_ANNOTATION_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use std::collections::BTreeMap;

    fn labels(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    fn owner(api_version: &str) -> OwnerReference {
        OwnerReference {
            api_version: api_version.to_string(),
            kind: "ClusterServiceVersion".to_string(),
            name: "etcd.v0.9.4".to_string(),
            uid: "4f1c9a".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn marker_requires_exact_value() {
        let marked = ObjectMeta {
            labels: labels(&[(MANAGED_LABEL_KEY, MANAGED_LABEL_VALUE), ("app", "etcd")]),
            ..Default::default()
        };
        let wrong_value = ObjectMeta {
            labels: labels(&[(MANAGED_LABEL_KEY, "false")]),
            ..Default::default()
        };

        assert!(is_marked(&marked));
        assert!(!is_marked(&wrong_value));
        assert!(!is_marked(&ObjectMeta::default()));
    }

    #[test]
    fn owner_reference_in_known_group_version_is_owned() {
        for gv in OWNER_GROUP_VERSIONS {
            let meta = ObjectMeta {
                owner_references: Some(vec![owner("apps/v1"), owner(gv)]),
                ..Default::default()
            };
            assert!(has_owner_ref(&meta), "{gv} should count as owner");
        }
    }

    #[test]
    fn foreign_owner_and_no_labels_is_not_owned() {
        let meta = ObjectMeta {
            owner_references: Some(vec![owner("apps/v1")]),
            labels: labels(&[("app", "etcd")]),
            ..Default::default()
        };
        assert!(!has_owner_ref(&meta));
        assert!(!has_owner_ref(&ObjectMeta::default()));
    }

    #[test]
    fn all_three_owner_labels_mark_ownership_regardless_of_value() {
        let meta = ObjectMeta {
            labels: labels(&[(OWNER_KEY, ""), (OWNER_NAMESPACE_KEY, "x"), (OWNER_KIND, "")]),
            ..Default::default()
        };
        assert!(has_owner_ref(&meta));

        let partial = ObjectMeta {
            labels: labels(&[(OWNER_KEY, "etcd"), (OWNER_KIND, "ClusterServiceVersion")]),
            ..Default::default()
        };
        assert!(!has_owner_ref(&partial));
    }

    #[test]
    fn component_label_prefix_match() {
        let meta = ObjectMeta {
            labels: labels(&[("operators.coreos.com/etcd.operators", "")]),
            ..Default::default()
        };
        assert!(has_component_label(&meta));

        let marker_only = ObjectMeta {
            labels: labels(&[(MANAGED_LABEL_KEY, MANAGED_LABEL_VALUE)]),
            ..Default::default()
        };
        assert!(!has_component_label(&marker_only));
    }

    #[test]
    fn installed_alongside_reads_annotations() {
        let meta = ObjectMeta {
            annotations: labels(&[(
                "operatorframework.io/installed-alongside-96a3d8f",
                "operators/etcd.v0.9.4",
            )]),
            ..Default::default()
        };
        assert!(is_installed_alongside(&meta));
        assert!(!is_installed_alongside(&ObjectMeta::default()));
    }
}
