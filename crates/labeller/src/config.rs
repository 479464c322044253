//! Labeller Configuration
//!
//! Which kinds to label, where to watch them and how the controllers retry.
//! Loaded from a mounted YAML file; every field has a default.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A resource kind the labeller knows how to mark
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelledKind {
    Deployments,
    ServiceAccounts,
    Services,
    Roles,
    RoleBindings,
    ClusterRoles,
    ClusterRoleBindings,
    ConfigMaps,
    CustomResourceDefinitions,
}

impl LabelledKind {
    pub const ALL: [LabelledKind; 9] = [
        LabelledKind::Deployments,
        LabelledKind::ServiceAccounts,
        LabelledKind::Services,
        LabelledKind::Roles,
        LabelledKind::RoleBindings,
        LabelledKind::ClusterRoles,
        LabelledKind::ClusterRoleBindings,
        LabelledKind::ConfigMaps,
        LabelledKind::CustomResourceDefinitions,
    ];

    /// Plural resource name, also used as the completion tracker key
    #[must_use]
    pub fn resource(self) -> &'static str {
        match self {
            LabelledKind::Deployments => "deployments",
            LabelledKind::ServiceAccounts => "serviceaccounts",
            LabelledKind::Services => "services",
            LabelledKind::Roles => "roles",
            LabelledKind::RoleBindings => "rolebindings",
            LabelledKind::ClusterRoles => "clusterroles",
            LabelledKind::ClusterRoleBindings => "clusterrolebindings",
            LabelledKind::ConfigMaps => "configmaps",
            LabelledKind::CustomResourceDefinitions => "customresourcedefinitions",
        }
    }

    /// Whether objects of this kind live in a namespace
    #[must_use]
    pub fn is_namespaced(self) -> bool {
        !matches!(
            self,
            LabelledKind::ClusterRoles
                | LabelledKind::ClusterRoleBindings
                | LabelledKind::CustomResourceDefinitions
        )
    }
}

impl fmt::Display for LabelledKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource())
    }
}

/// Main labeller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabellerConfig {
    /// Namespace to watch for namespaced kinds; all namespaces when unset
    #[serde(default)]
    pub namespace: Option<String>,

    /// Kinds to label
    #[serde(default = "default_kinds")]
    pub kinds: BTreeSet<LabelledKind>,

    /// Seconds before a failed reconciliation is retried
    #[serde(default = "default_retry_seconds")]
    pub retry_seconds: u64,

    /// Maximum concurrent reconciliations per kind
    #[serde(default = "default_concurrency")]
    pub concurrency: u16,
}

fn default_kinds() -> BTreeSet<LabelledKind> {
    LabelledKind::ALL.into_iter().collect()
}

fn default_retry_seconds() -> u64 {
    5
}

fn default_concurrency() -> u16 {
    4
}

impl Default for LabellerConfig {
    fn default() -> Self {
        LabellerConfig {
            namespace: None,
            kinds: default_kinds(),
            retry_seconds: default_retry_seconds(),
            concurrency: default_concurrency(),
        }
    }
}

impl LabellerConfig {
    /// Load configuration from a mounted file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, anyhow::Error> {
        serde_yaml::from_str(yaml).map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.kinds.is_empty() {
            return Err(anyhow::anyhow!(
                "No kinds configured. Provide at least one entry under kinds."
            ));
        }
        if self.retry_seconds == 0 {
            return Err(anyhow::anyhow!("retrySeconds must be greater than zero"));
        }
        if self.concurrency == 0 {
            return Err(anyhow::anyhow!("concurrency must be greater than zero"));
        }
        if self.namespace.as_deref().is_some_and(|ns| ns.trim().is_empty()) {
            return Err(anyhow::anyhow!(
                "namespace must not be blank; omit it to watch all namespaces"
            ));
        }
        Ok(())
    }
}
