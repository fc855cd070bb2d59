//! Shared fixtures for the unit tests: deterministic digests, stream
//! builders and an in-memory stand-in for the API server client.

use crate::api::{
    Image, ImageStream, ImageStreamTag, ObjectReference, RESOURCE_IMAGE_STREAM_IMAGES,
    RESOURCE_IMAGE_STREAM_TAGS, TagEvent, TagEventList, TagReference, join_image_stream_tag,
    latest_tag_event,
};
use crate::client::ImageQuotaClient;
use crate::errors::ClientError;
use crate::quantity::{ResourceList, quantity};
use anyhow::anyhow;
use k8s_openapi::api::core::v1::{LimitRange, ResourceQuota};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub(crate) const INTERNAL_REGISTRY_URL: &str = "registry.local:5000";

/// Deterministic digest built from a single hex character.
pub(crate) fn digest(fill: char) -> String {
    assert!(fill.is_ascii_hexdigit() && !fill.is_ascii_uppercase());
    format!("sha256:{}", fill.to_string().repeat(64))
}

/// Pull spec of an image stored in the internal registry.
pub(crate) fn make_docker_image_reference(namespace: &str, name: &str, digest: &str) -> String {
    format!("{}/{}/{}@{}", INTERNAL_REGISTRY_URL, namespace, name, digest)
}

pub(crate) fn object_reference(
    kind: &str,
    namespace: Option<&str>,
    name: &str,
) -> ObjectReference {
    ObjectReference {
        kind: kind.to_string(),
        namespace: namespace.map(|ns| ns.to_string()),
        name: name.to_string(),
    }
}

pub(crate) fn image_stream(namespace: &str, name: &str) -> ImageStream {
    ImageStream {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Appends a status tag whose history holds the given `(pull spec, digest)`
/// events, newest first.
pub(crate) fn add_status_tag(is: &mut ImageStream, tag: &str, events: &[(String, String)]) {
    is.status.tags.insert(
        tag.to_string(),
        TagEventList {
            items: events
                .iter()
                .map(|(reference, image)| TagEvent {
                    docker_image_reference: reference.clone(),
                    image: image.clone(),
                })
                .collect(),
        },
    );
}

pub(crate) fn add_spec_tag(is: &mut ImageStream, tag: &str, from: ObjectReference) {
    is.spec.tags.insert(
        tag.to_string(),
        TagReference {
            name: tag.to_string(),
            from: Some(from),
        },
    );
}

/// The resource list every evaluator reporting both quota resources is
/// expected to produce.
pub(crate) fn expected_usage(spec_refs: u64, status_refs: u64) -> ResourceList {
    ResourceList::from([
        (
            RESOURCE_IMAGE_STREAM_TAGS.to_string(),
            quantity(spec_refs as i64),
        ),
        (
            RESOURCE_IMAGE_STREAM_IMAGES.to_string(),
            quantity(status_refs as i64),
        ),
    ])
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum FakeFailure {
    Forbidden,
    Transient,
}

impl FakeFailure {
    fn to_error(self) -> ClientError {
        match self {
            FakeFailure::Forbidden => {
                ClientError::Forbidden("fake client refuses to list".to_string())
            }
            FakeFailure::Transient => ClientError::Other(anyhow!("fake client is unavailable")),
        }
    }
}

/// In-memory API server: namespaced lookups over fixed object sets, with an
/// optional injected list failure. List calls are counted so tests can
/// observe caching.
#[derive(Default)]
pub(crate) struct FakeImageQuotaClient {
    pub streams: Vec<ImageStream>,
    pub images: Vec<Image>,
    pub limit_ranges: Vec<LimitRange>,
    pub resource_quotas: Vec<ResourceQuota>,
    pub list_failure: Option<FakeFailure>,
    pub list_calls: std::sync::atomic::AtomicUsize,
}

impl FakeImageQuotaClient {
    pub(crate) fn with_streams(streams: Vec<ImageStream>) -> Self {
        Self {
            streams,
            ..Default::default()
        }
    }
}

impl ImageQuotaClient for FakeImageQuotaClient {
    async fn list_image_streams(&self, namespace: &str) -> Result<Vec<ImageStream>, ClientError> {
        self.list_calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if let Some(failure) = self.list_failure {
            return Err(failure.to_error());
        }
        Ok(self
            .streams
            .iter()
            .filter(|is| is.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn get_image_stream(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ImageStream, ClientError> {
        self.streams
            .iter()
            .find(|is| {
                is.metadata.namespace.as_deref() == Some(namespace)
                    && is.metadata.name.as_deref() == Some(name)
            })
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("imagestreams {}/{}", namespace, name)))
    }

    async fn get_image_stream_tag(
        &self,
        namespace: &str,
        name: &str,
        tag: &str,
    ) -> Result<ImageStreamTag, ClientError> {
        let is = self.get_image_stream(namespace, name).await?;
        let event = latest_tag_event(&is, tag).ok_or_else(|| {
            ClientError::NotFound(format!(
                "imagestreamtags {}/{}",
                namespace,
                join_image_stream_tag(name, tag)
            ))
        })?;

        let image = match self.get_image(&event.image).await {
            Ok(image) => Some(image),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };

        Ok(ImageStreamTag {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(join_image_stream_tag(name, tag)),
                ..Default::default()
            },
            tag: is.spec.tags.get(tag).cloned(),
            image,
        })
    }

    async fn get_image(&self, digest: &str) -> Result<Image, ClientError> {
        self.images
            .iter()
            .find(|image| image.metadata.name.as_deref() == Some(digest))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("images {}", digest)))
    }

    async fn list_limit_ranges(&self, namespace: &str) -> Result<Vec<LimitRange>, ClientError> {
        self.list_calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if let Some(failure) = self.list_failure {
            return Err(failure.to_error());
        }
        Ok(self
            .limit_ranges
            .iter()
            .filter(|lr| lr.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn list_resource_quotas(
        &self,
        namespace: &str,
    ) -> Result<Vec<ResourceQuota>, ClientError> {
        self.list_calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if let Some(failure) = self.list_failure {
            return Err(failure.to_error());
        }
        Ok(self
            .resource_quotas
            .iter()
            .filter(|rq| rq.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }
}
