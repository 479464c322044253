//! Server-side apply strategy.
//!
//! The applied document carries only identity and the marker label, so the
//! field manager ends up owning the marker and nothing else; labels owned by
//! other managers are left alone by the server.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(test)]
use mockall::automock;

use super::{marker_labels, MarkerWriter};
use crate::error::Result;
use crate::ownership::FIELD_MANAGER;

/// Minimal partial object submitted through server-side apply
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyDescriptor {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
}

impl ApplyDescriptor {
    /// Identity-only descriptor for an object of kind `K`
    #[must_use]
    pub fn for_object<K>(name: &str, namespace: Option<&str>) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
                ..Default::default()
            },
        }
    }

    /// Merge `labels` into the descriptor's label set
    #[must_use]
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels);
        self
    }
}

/// Apply-capable submission for one kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApplyClient: Send + Sync {
    async fn apply(&self, desired: &ApplyDescriptor, params: &PatchParams) -> Result<()>;
}

/// [`ApplyClient`] backed by the cluster API
pub struct KubeApplyClient<K> {
    client: Client,
    api_for: fn(Client, Option<&str>) -> Api<K>,
}

pub(crate) fn namespaced_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    }
}

fn cluster_api<K>(client: Client, _namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>,
{
    Api::all(client)
}

impl<K> KubeApplyClient<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    #[must_use]
    pub fn namespaced(client: Client) -> Self {
        Self {
            client,
            api_for: namespaced_api::<K>,
        }
    }
}

impl<K> KubeApplyClient<K>
where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>,
{
    #[must_use]
    pub fn cluster(client: Client) -> Self {
        Self {
            client,
            api_for: cluster_api::<K>,
        }
    }
}

#[async_trait]
impl<K> ApplyClient for KubeApplyClient<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn apply(&self, desired: &ApplyDescriptor, params: &PatchParams) -> Result<()> {
        let api = (self.api_for)(self.client.clone(), desired.metadata.namespace.as_deref());
        let name = desired.metadata.name.as_deref().unwrap_or_default();
        api.patch(name, params, &Patch::Apply(desired)).await?;
        Ok(())
    }
}

/// Marks objects by applying an identity-plus-marker descriptor
pub struct ApplyWriter<C> {
    client: C,
}

impl<C> ApplyWriter<C> {
    #[must_use]
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<K, C> MarkerWriter<K> for ApplyWriter<C>
where
    K: Resource<DynamicType = ()> + Send + Sync,
    C: ApplyClient,
{
    async fn write_marker(&self, object: &K) -> Result<()> {
        let meta = object.meta();
        let desired = ApplyDescriptor::for_object::<K>(
            meta.name.as_deref().unwrap_or_default(),
            meta.namespace.as_deref(),
        )
        .with_labels(marker_labels());

        self.client
            .apply(&desired, &PatchParams::apply(FIELD_MANAGER))
            .await
    }
}
