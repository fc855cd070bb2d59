//! Quota guard for the registry's blob-commit path.
//!
//! A manifest upload raises usage through admission on the subsequent image
//! stream mapping create, but by then the layers are already written. This
//! guard runs before a layer is committed so oversize and over-quota uploads
//! can be refused while the storage is still clean. A few caveats apply:
//! the master accounts image sizes from layer contents while the registry
//! sees compressed layers with archive overhead, and only a single layer is
//! checked at a time because layers precede their manifest. The check is
//! therefore most useful when a quota is already nearly exhausted.

use crate::api::{LIMIT_TYPE_IMAGE_SIZE, RESOURCE_IMAGE_STREAM_IMAGES, RESOURCE_STORAGE};
use crate::cache::QuotaEnforcingCaches;
use crate::client::ImageQuotaClient;
use crate::config::Config;
use crate::errors::ClientError;
use crate::quantity::{
    QuantityError, ResourceList, add, less_than_or_equal, mask, parse_quantity, quantity,
    resource_names, subtract,
};
use anyhow::bail;
use k8s_openapi::api::core::v1::{LimitRange, LimitRangeItem, ResourceQuota};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Error, Debug)]
pub enum AdmissionError {
    /// The write must be refused; the message names every exhausted
    /// constraint.
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Registry-side admission check consulted at blob-commit time.
pub struct BlobAdmission<C> {
    client: C,
    caches: QuotaEnforcingCaches,
}

impl<C: ImageQuotaClient> BlobAdmission<C> {
    pub fn new(client: C, config: &Config) -> Self {
        Self {
            client,
            caches: QuotaEnforcingCaches::new(config.project_cache_ttl),
        }
    }

    /// Checks whether a blob of the given provisional size may be committed
    /// to the project's repository without breaking its limit ranges or
    /// image quota. Nothing is persisted here; the real usage increment is
    /// applied later by admission on the image stream mapping create.
    pub async fn admit_blob_write(
        &self,
        namespace: &str,
        size: i64,
    ) -> Result<(), AdmissionError> {
        self.admit_limit_ranges(namespace, size).await?;
        self.admit_quotas(namespace).await
    }

    async fn admit_limit_ranges(&self, namespace: &str, size: i64) -> Result<(), AdmissionError> {
        if size < 1 {
            return Ok(());
        }

        let limit_ranges = match self.limit_ranges(namespace).await {
            Ok(limit_ranges) => limit_ranges,
            Err(err) if err.is_forbidden() => {
                warn!("Failed to list limitranges in {}: {}", namespace, err);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        for limit_range in limit_ranges.iter() {
            debug!(
                "Processing limit range {}/{}",
                namespace,
                limit_range.metadata.name.as_deref().unwrap_or_default()
            );
            let Some(spec) = &limit_range.spec else {
                continue;
            };
            for limit in &spec.limits {
                if let Err(err) = admit_image_size(size, limit) {
                    error!("Refusing to write blob exceeding limit range: {}", err);
                    return Err(AdmissionError::AccessDenied(err.to_string()));
                }
            }
        }

        Ok(())
    }

    async fn admit_quotas(&self, namespace: &str) -> Result<(), AdmissionError> {
        let quotas = match self.resource_quotas(namespace).await {
            Ok(quotas) => quotas,
            Err(err) if err.is_forbidden() => {
                warn!("Failed to list resourcequotas in {}: {}", namespace, err);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        // The probe only asks whether one more image stream image would still
        // fit under the hard limits.
        let probe = ResourceList::from([(RESOURCE_IMAGE_STREAM_IMAGES.to_string(), quantity(1))]);
        let resources = resource_names(&probe);

        for resource_quota in quotas.iter() {
            debug!(
                "Processing resource quota {}/{}",
                namespace,
                resource_quota.metadata.name.as_deref().unwrap_or_default()
            );

            let used = resource_quota
                .status
                .as_ref()
                .and_then(|status| status.used.clone())
                .unwrap_or_default();
            let hard = resource_quota
                .spec
                .as_ref()
                .and_then(|spec| spec.hard.clone())
                .unwrap_or_default();

            let new_used =
                add(&mask(&used, &resources), &probe).map_err(classify_quantity_error)?;
            let hard = mask(&hard, &resources);

            let (allowed, exceeded) =
                less_than_or_equal(&new_used, &hard).map_err(classify_quantity_error)?;
            if !allowed {
                let over = subtract(&new_used, &hard).map_err(classify_quantity_error)?;
                let details: Vec<String> = exceeded
                    .iter()
                    .map(|resource| {
                        format!(
                            "{} limited to {} by {}",
                            resource, hard[resource].0, over[resource].0
                        )
                    })
                    .collect();
                let message = format!(
                    "refusing to write blob exceeding quota: {}",
                    details.join(", ")
                );
                error!("{}", message);
                return Err(AdmissionError::AccessDenied(message));
            }
        }

        Ok(())
    }

    async fn limit_ranges(&self, namespace: &str) -> Result<Arc<Vec<LimitRange>>, ClientError> {
        if let Some(cache) = &self.caches.limit_ranges {
            if let Some(snapshot) = cache.get(namespace) {
                return Ok(snapshot);
            }
        }

        debug!("Listing limit ranges in namespace {}", namespace);
        let snapshot = Arc::new(self.client.list_limit_ranges(namespace).await?);
        if let Some(cache) = &self.caches.limit_ranges {
            cache.add(namespace, snapshot.clone());
        }
        Ok(snapshot)
    }

    async fn resource_quotas(
        &self,
        namespace: &str,
    ) -> Result<Arc<Vec<ResourceQuota>>, ClientError> {
        if let Some(cache) = &self.caches.resource_quotas {
            if let Some(snapshot) = cache.get(namespace) {
                return Ok(snapshot);
            }
        }

        debug!("Listing resource quotas in namespace {}", namespace);
        let snapshot = Arc::new(self.client.list_resource_quotas(namespace).await?);
        if let Some(cache) = &self.caches.resource_quotas {
            cache.add(namespace, snapshot.clone());
        }
        Ok(snapshot)
    }
}

/// Checks a size against a single limit range item. Only image size limits
/// carrying a storage cap participate.
pub fn admit_image_size(size: i64, limit: &LimitRangeItem) -> anyhow::Result<()> {
    if limit.type_ != LIMIT_TYPE_IMAGE_SIZE {
        return Ok(());
    }
    let Some(limit_quantity) = limit.max.as_ref().and_then(|max| max.get(RESOURCE_STORAGE))
    else {
        return Ok(());
    };

    if parse_quantity(limit_quantity)? < size {
        bail!(
            "{} exceeds the maximum {} usage per {} ({})",
            size,
            RESOURCE_STORAGE,
            LIMIT_TYPE_IMAGE_SIZE,
            limit_quantity.0
        );
    }
    Ok(())
}

fn classify_quantity_error(err: QuantityError) -> AdmissionError {
    AdmissionError::Client(ClientError::Other(err.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeFailure, FakeImageQuotaClient};
    use k8s_openapi::api::core::v1::{
        LimitRangeSpec, ResourceQuotaSpec, ResourceQuotaStatus,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn image_size_limit_range(namespace: &str, max_storage: &str) -> LimitRange {
        LimitRange {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some("size-limit".to_string()),
                ..Default::default()
            },
            spec: Some(LimitRangeSpec {
                limits: vec![LimitRangeItem {
                    type_: LIMIT_TYPE_IMAGE_SIZE.to_string(),
                    max: Some(BTreeMap::from([(
                        RESOURCE_STORAGE.to_string(),
                        Quantity(max_storage.to_string()),
                    )])),
                    ..Default::default()
                }],
            }),
        }
    }

    fn image_quota(namespace: &str, hard: i64, used: i64) -> ResourceQuota {
        ResourceQuota {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some("image-quota".to_string()),
                ..Default::default()
            },
            spec: Some(ResourceQuotaSpec {
                hard: Some(BTreeMap::from([(
                    RESOURCE_IMAGE_STREAM_IMAGES.to_string(),
                    quantity(hard),
                )])),
                ..Default::default()
            }),
            status: Some(ResourceQuotaStatus {
                used: Some(BTreeMap::from([(
                    RESOURCE_IMAGE_STREAM_IMAGES.to_string(),
                    quantity(used),
                )])),
                ..Default::default()
            }),
        }
    }

    fn admission(client: FakeImageQuotaClient) -> BlobAdmission<FakeImageQuotaClient> {
        BlobAdmission::new(client, &Config::default())
    }

    #[tokio::test]
    async fn test_admits_when_quota_leaves_room() {
        let client = FakeImageQuotaClient {
            resource_quotas: vec![image_quota("test", 10, 9)],
            ..Default::default()
        };
        admission(client)
            .admit_blob_write("test", 100)
            .await
            .expect("one more image still fits");
    }

    #[tokio::test]
    async fn test_denies_when_quota_is_exhausted() {
        let client = FakeImageQuotaClient {
            resource_quotas: vec![image_quota("test", 10, 10)],
            ..Default::default()
        };
        let err = admission(client)
            .admit_blob_write("test", 100)
            .await
            .expect_err("the quota is full");

        let AdmissionError::AccessDenied(message) = err else {
            panic!("expected access denial, got {:?}", err);
        };
        assert!(
            message.contains(RESOURCE_IMAGE_STREAM_IMAGES),
            "denial should name the exhausted resource: {}",
            message
        );
        assert!(message.contains("limited to 10 by 1"), "message: {}", message);
    }

    #[tokio::test]
    async fn test_quota_in_other_namespace_does_not_apply() {
        let client = FakeImageQuotaClient {
            resource_quotas: vec![image_quota("other", 10, 10)],
            ..Default::default()
        };
        admission(client)
            .admit_blob_write("test", 100)
            .await
            .expect("no quota in this namespace");
    }

    #[tokio::test]
    async fn test_quota_over_unrelated_resources_does_not_apply() {
        let mut quota = image_quota("test", 10, 10);
        let hard = quota.spec.as_mut().unwrap().hard.as_mut().unwrap();
        hard.clear();
        hard.insert("pods".to_string(), quantity(0));

        let client = FakeImageQuotaClient {
            resource_quotas: vec![quota],
            ..Default::default()
        };
        admission(client)
            .admit_blob_write("test", 100)
            .await
            .expect("the quota does not cap image stream images");
    }

    #[tokio::test]
    async fn test_denies_oversize_blob() {
        let client = FakeImageQuotaClient {
            limit_ranges: vec![image_size_limit_range("test", "1Ki")],
            ..Default::default()
        };
        let guard = admission(client);

        guard
            .admit_blob_write("test", 1024)
            .await
            .expect("exactly at the cap");

        let err = guard
            .admit_blob_write("test", 1025)
            .await
            .expect_err("over the cap");
        assert!(matches!(err, AdmissionError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn test_zero_sized_commit_skips_limit_ranges() {
        let client = FakeImageQuotaClient {
            limit_ranges: vec![image_size_limit_range("test", "0")],
            ..Default::default()
        };
        admission(client)
            .admit_blob_write("test", 0)
            .await
            .expect("nothing to check");
    }

    #[tokio::test]
    async fn test_forbidden_listing_is_treated_as_allow() {
        let client = FakeImageQuotaClient {
            list_failure: Some(FakeFailure::Forbidden),
            ..Default::default()
        };
        admission(client)
            .admit_blob_write("test", 100)
            .await
            .expect("rbac regressions must not deny pushes");
    }

    #[tokio::test]
    async fn test_transient_listing_failure_propagates() {
        let client = FakeImageQuotaClient {
            list_failure: Some(FakeFailure::Transient),
            ..Default::default()
        };
        let err = admission(client)
            .admit_blob_write("test", 100)
            .await
            .expect_err("transient failures surface to the caller");
        assert!(matches!(err, AdmissionError::Client(_)));
    }

    #[tokio::test]
    async fn test_snapshots_are_cached_per_project() {
        use std::sync::Arc;
        use std::sync::atomic::Ordering;

        let client = Arc::new(FakeImageQuotaClient {
            resource_quotas: vec![image_quota("test", 10, 9)],
            ..Default::default()
        });
        let guard = BlobAdmission::new(client.clone(), &Config::default());

        guard.admit_blob_write("test", 100).await.expect("allowed");
        guard.admit_blob_write("test", 100).await.expect("allowed");
        // one limit range list and one resource quota list in total
        assert_eq!(client.list_calls.load(Ordering::Relaxed), 2);

        guard.admit_blob_write("other", 100).await.expect("allowed");
        assert_eq!(client.list_calls.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_disabled_caches_list_every_time() {
        use std::sync::Arc;
        use std::sync::atomic::Ordering;

        let client = Arc::new(FakeImageQuotaClient::default());
        let config = Config {
            project_cache_ttl: None,
            ..Default::default()
        };
        let guard = BlobAdmission::new(client.clone(), &config);

        guard.admit_blob_write("test", 100).await.expect("allowed");
        guard.admit_blob_write("test", 100).await.expect("allowed");
        assert_eq!(client.list_calls.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_admit_image_size_ignores_other_limit_types() {
        let limit = LimitRangeItem {
            type_: "Container".to_string(),
            max: Some(BTreeMap::from([(
                RESOURCE_STORAGE.to_string(),
                Quantity("1".to_string()),
            )])),
            ..Default::default()
        };
        admit_image_size(i64::MAX, &limit).expect("unrelated limit types pass");

        let unbounded = LimitRangeItem {
            type_: LIMIT_TYPE_IMAGE_SIZE.to_string(),
            ..Default::default()
        };
        admit_image_size(i64::MAX, &unbounded).expect("no storage cap set");
    }
}
