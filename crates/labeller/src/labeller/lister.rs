//! Full listings of a watched kind, used only for completion detection.

use std::fmt::Debug;
use std::hash::Hash;

use async_trait::async_trait;
use kube::api::{ListParams, PartialObjectMeta};
use kube::runtime::reflector::Store;
use kube::{Api, Resource};
use serde::de::DeserializeOwned;

use crate::error::{LabellerError, Result};

/// Lists every object of a kind, with a match-everything selector
#[async_trait]
pub trait ObjectLister<K>: Send + Sync {
    async fn list_all(&self) -> Result<Vec<K>>;
}

#[async_trait]
impl<K> ObjectLister<K> for Api<K>
where
    K: Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn list_all(&self) -> Result<Vec<K>> {
        let list = self.list(&ListParams::default()).await?;
        Ok(list.items)
    }
}

/// Reads the informer cache once its initial listing has landed, so a
/// half-filled cache is never mistaken for a fully labelled kind
#[async_trait]
impl<K> ObjectLister<K> for Store<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    async fn list_all(&self) -> Result<Vec<K>> {
        self.wait_until_ready()
            .await
            .map_err(|e| LabellerError::Cache(e.to_string()))?;
        Ok(self
            .state()
            .into_iter()
            .map(|object| (*object).clone())
            .collect())
    }
}

/// Metadata-only listing for kinds labelled through merge patches
#[derive(Clone)]
pub struct MetadataLister<K> {
    api: Api<K>,
}

impl<K> MetadataLister<K> {
    #[must_use]
    pub fn new(api: Api<K>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl<K> ObjectLister<PartialObjectMeta<K>> for MetadataLister<K>
where
    K: Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn list_all(&self) -> Result<Vec<PartialObjectMeta<K>>> {
        let list = self.api.list_metadata(&ListParams::default()).await?;
        Ok(list.items)
    }
}
