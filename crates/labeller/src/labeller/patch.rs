//! Merge-patch strategy for kinds without apply support.
//!
//! Used for CustomResourceDefinitions, which are watched as metadata only.
//! The patch is the diff between two snapshots of the observed metadata:
//! one with `uid`/`resourceVersion` blanked, one with them kept and the marker
//! added. Keeping them in the "after" snapshot makes them show up in the patch
//! as preconditions, so a concurrent writer turns into a conflict instead of a
//! silent overwrite.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use kube::api::{PartialObjectMeta, Patch, PatchParams};
use kube::Api;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use super::merge_patch;
use super::MarkerWriter;
use crate::error::{LabellerError, Result};
use crate::ownership::{FIELD_MANAGER, MANAGED_LABEL_KEY, MANAGED_LABEL_VALUE};

/// Merge-patch submission for one cluster-scoped kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MergePatchClient: Send + Sync {
    async fn merge_patch(&self, name: &str, params: &PatchParams, patch: &Value) -> Result<()>;
}

/// [`MergePatchClient`] patching through the metadata endpoint
pub struct KubeMetadataPatchClient<K> {
    api: Api<K>,
}

impl<K> KubeMetadataPatchClient<K> {
    #[must_use]
    pub fn new(api: Api<K>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl<K> MergePatchClient for KubeMetadataPatchClient<K>
where
    K: Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn merge_patch(&self, name: &str, params: &PatchParams, patch: &Value) -> Result<()> {
        self.api
            .patch_metadata(name, params, &Patch::Merge(patch))
            .await?;
        Ok(())
    }
}

/// Marks metadata-only objects with a synthesized merge patch
pub struct MergePatchWriter<C> {
    client: C,
}

impl<C> MergePatchWriter<C> {
    #[must_use]
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// The merge patch adding the marker to `object`, with `uid` and
    /// `resourceVersion` carried as preconditions.
    pub fn marker_patch<K>(object: &PartialObjectMeta<K>) -> Result<Value>
    where
        K: Clone,
        PartialObjectMeta<K>: Serialize,
    {
        let display = qualified_name(object);
        let uid = object.metadata.uid.clone();
        let resource_version = object.metadata.resource_version.clone();

        let mut previous = object.clone();
        previous.metadata.uid = None;
        previous.metadata.resource_version = None;
        let old_data = serde_json::to_value(&previous).map_err(|source| {
            LabellerError::Serialization {
                name: display.clone(),
                source,
            }
        })?;

        let mut updated = object.clone();
        updated.metadata.uid = uid;
        updated.metadata.resource_version = resource_version;
        updated
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(
                MANAGED_LABEL_KEY.to_string(),
                MANAGED_LABEL_VALUE.to_string(),
            );
        let new_data = serde_json::to_value(&updated)
            .map_err(|source| LabellerError::Serialization { name: display, source })?;

        merge_patch::create(&old_data, &new_data)
    }
}

fn qualified_name<K>(object: &PartialObjectMeta<K>) -> String {
    format!(
        "{}/{}",
        object.metadata.namespace.as_deref().unwrap_or_default(),
        object.metadata.name.as_deref().unwrap_or_default()
    )
}

#[async_trait]
impl<K, C> MarkerWriter<PartialObjectMeta<K>> for MergePatchWriter<C>
where
    K: Clone + Send + Sync,
    PartialObjectMeta<K>: Serialize,
    C: MergePatchClient,
{
    async fn write_marker(&self, object: &PartialObjectMeta<K>) -> Result<()> {
        info!(
            namespace = %object.metadata.namespace.as_deref().unwrap_or_default(),
            name = %object.metadata.name.as_deref().unwrap_or_default(),
            "Patching ownership label"
        );
        let patch = Self::marker_patch(object)?;

        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PatchParams::default()
        };
        self.client
            .merge_patch(
                object.metadata.name.as_deref().unwrap_or_default(),
                &params,
                &patch,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mock_client;
    use http::{Method, StatusCode};
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::core::PartialObjectMetaExt;
    use serde_json::json;

    fn crd(labels: Option<BTreeMap<String, String>>) -> PartialObjectMeta<CustomResourceDefinition> {
        ObjectMeta {
            name: Some("etcdclusters.etcd.database.coreos.com".to_string()),
            uid: Some("7c1e-55".to_string()),
            resource_version: Some("4821".to_string()),
            labels,
            ..Default::default()
        }
        .into_request_partial::<CustomResourceDefinition>()
    }

    #[test]
    fn patch_carries_preconditions_and_marker_only() {
        let object = crd(Some(BTreeMap::from([("a".to_string(), "1".to_string())])));

        let patch = MergePatchWriter::<MockMergePatchClient>::marker_patch(&object).unwrap();

        assert_eq!(
            patch,
            json!({
                "metadata": {
                    "uid": "7c1e-55",
                    "resourceVersion": "4821",
                    "labels": {"olm.managed": "true"}
                }
            })
        );
    }

    #[test]
    fn patch_creates_missing_label_map() {
        let patch = MergePatchWriter::<MockMergePatchClient>::marker_patch(&crd(None)).unwrap();
        assert_eq!(patch["metadata"]["labels"], json!({"olm.managed": "true"}));
    }

    #[test]
    fn applied_patch_only_adds_marker() {
        let object = crd(Some(BTreeMap::from([("a".to_string(), "1".to_string())])));
        let patch = MergePatchWriter::<MockMergePatchClient>::marker_patch(&object).unwrap();

        let mut observed = serde_json::to_value(&object).unwrap();
        json_patch::merge(&mut observed, &patch);

        let mut expected = serde_json::to_value(&object).unwrap();
        expected["metadata"]["labels"]["olm.managed"] = json!("true");
        assert_eq!(observed, expected);
        assert_eq!(observed["metadata"]["uid"], json!("7c1e-55"));
        assert_eq!(observed["metadata"]["resourceVersion"], json!("4821"));
    }

    #[tokio::test]
    async fn writer_submits_merge_patch_by_name() {
        let mut client = MockMergePatchClient::new();
        client
            .expect_merge_patch()
            .withf(|name, params, patch| {
                name.to_string() == "etcdclusters.etcd.database.coreos.com"
                    && params.field_manager.as_deref() == Some(FIELD_MANAGER)
                    && patch["metadata"]["labels"]["olm.managed"] == json!("true")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        MergePatchWriter::new(client)
            .write_marker(&crd(None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn metadata_client_sends_merge_patch_as_field_manager() {
        let object = crd(Some(BTreeMap::from([("a".to_string(), "1".to_string())])));
        let response = serde_json::to_value(&object).unwrap();
        let (client, server) = mock_client();
        let served = tokio::spawn(server.serve(1, move |_| (StatusCode::OK, response.clone())));

        let api = Api::<CustomResourceDefinition>::all(client);
        MergePatchWriter::new(KubeMetadataPatchClient::new(api))
            .write_marker(&object)
            .await
            .unwrap();

        let requests = served.await.unwrap();
        assert_eq!(requests[0].method, Method::PATCH);
        assert_eq!(
            requests[0].path,
            "/apis/apiextensions.k8s.io/v1/customresourcedefinitions/etcdclusters.etcd.database.coreos.com"
        );
        assert!(requests[0]
            .query
            .contains("fieldManager=olm-ownership-labeller"));
        assert_eq!(
            requests[0].content_type.as_deref(),
            Some("application/merge-patch+json")
        );
        assert_eq!(
            requests[0].body,
            json!({
                "metadata": {
                    "uid": "7c1e-55",
                    "resourceVersion": "4821",
                    "labels": {"olm.managed": "true"}
                }
            })
        );
    }
}
