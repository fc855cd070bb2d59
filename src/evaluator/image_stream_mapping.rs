//! Usage evaluation for image stream mapping creation.

use crate::api::{ImageStreamMapping, RESOURCE_IMAGE_STREAM_IMAGES};
use crate::client::ImageQuotaClient;
use crate::errors::ClientError;
use crate::evaluator::{Evaluator, GroupKind, Operation, QuotaObject, require_kind};
use crate::quantity::{ResourceList, quantity};
use crate::reference::is_digest;
use crate::usage::ImageStreamUsageComputer;
use tracing::debug;

const COMPUTE_RESOURCES: &[&str] = &[RESOURCE_IMAGE_STREAM_IMAGES];

/// Handles CREATE admission on the imagestreammappings resource. A mapping
/// appends one status tag event, so it can only ever grow the project's
/// image count by one digest.
pub struct ImageStreamMappingEvaluator<C> {
    client: C,
}

impl<C: ImageQuotaClient> ImageStreamMappingEvaluator<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

impl<C: ImageQuotaClient> Evaluator for ImageStreamMappingEvaluator<C> {
    fn name(&self) -> &'static str {
        "Evaluator.ImageStreamMapping"
    }

    fn group_kind(&self) -> GroupKind {
        GroupKind::image("ImageStreamMapping")
    }

    fn matched_resource_names(&self) -> &'static [&'static str] {
        COMPUTE_RESOURCES
    }

    fn operation_resources(&self, operation: Operation) -> &'static [&'static str] {
        match operation {
            Operation::Create => COMPUTE_RESOURCES,
            Operation::Update => &[],
        }
    }

    fn constraints(&self, _required: &[&str], object: &QuotaObject) -> anyhow::Result<()> {
        require_kind("ImageStreamMapping", object)
    }

    async fn usage(&self, object: &QuotaObject) -> Result<ResourceList, ClientError> {
        let QuotaObject::ImageStreamMapping(ism) = object else {
            return Ok(ResourceList::new());
        };

        let namespace = ism.metadata.namespace.as_deref().unwrap_or_default();
        let name = ism.metadata.name.as_deref().unwrap_or_default();

        // A mapping onto a stream that does not exist will be rejected by
        // the subsequent create; crediting usage for it would leak quota.
        match self.client.get_image_stream(namespace, name).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                debug!("Image stream {}/{} does not exist, not counting the mapping", namespace, name);
                return Ok(images_usage(0));
            }
            Err(err) => return Err(err),
        }

        let digest = ism.image.metadata.name.as_deref().unwrap_or_default();
        if !is_digest(digest) {
            debug!(
                "Mapping onto {}/{} does not carry a digest, not counting it",
                namespace, name
            );
            return Ok(images_usage(0));
        }

        let computer = ImageStreamUsageComputer::new(&self.client);
        let increment = computer
            .usage_increment(namespace, None, None, Some(digest))
            .await?;

        Ok(images_usage(increment.status_refs_increment))
    }
}

fn images_usage(status_refs: u64) -> ResourceList {
    ResourceList::from([(
        RESOURCE_IMAGE_STREAM_IMAGES.to_string(),
        quantity(status_refs as i64),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Image;
    use crate::testutil::{
        FakeImageQuotaClient, add_status_tag, digest, image_stream, make_docker_image_reference,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn mapping(namespace: &str, name: &str, image_digest: &str) -> ImageStreamMapping {
        ImageStreamMapping {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            image: Image {
                metadata: ObjectMeta {
                    name: Some(image_digest.to_string()),
                    ..Default::default()
                },
                docker_image_reference: make_docker_image_reference(
                    namespace,
                    name,
                    image_digest,
                ),
            },
        }
    }

    async fn usage_with(
        streams: Vec<crate::api::ImageStream>,
        ism: ImageStreamMapping,
    ) -> ResourceList {
        let evaluator =
            ImageStreamMappingEvaluator::new(FakeImageQuotaClient::with_streams(streams));
        evaluator
            .usage(&QuotaObject::ImageStreamMapping(ism))
            .await
            .expect("usage")
    }

    #[tokio::test]
    async fn test_mapping_onto_empty_stream() {
        let usage = usage_with(
            vec![image_stream("test", "is")],
            mapping("test", "is", &digest('b')),
        )
        .await;
        assert_eq!(usage, images_usage(1));
    }

    #[tokio::test]
    async fn test_mapping_onto_missing_stream_counts_nothing() {
        let usage = usage_with(Vec::new(), mapping("test", "is", &digest('b'))).await;
        assert_eq!(usage, images_usage(0));
    }

    #[tokio::test]
    async fn test_mapping_with_digest_already_tracked() {
        let base = digest('a');
        let mut is = image_stream("test", "havingtag");
        add_status_tag(
            &mut is,
            "latest",
            &[(make_docker_image_reference("test", "havingtag", &base), base.clone())],
        );

        let usage = usage_with(vec![is], mapping("test", "havingtag", &base)).await;
        assert_eq!(usage, images_usage(0));
    }

    #[tokio::test]
    async fn test_mapping_digest_tracked_in_other_stream() {
        let shared = digest('c');
        let mut other = image_stream("test", "other");
        add_status_tag(
            &mut other,
            "latest",
            &[(make_docker_image_reference("test", "other", &shared), shared.clone())],
        );
        let destis = image_stream("test", "destis");

        let usage = usage_with(vec![other, destis], mapping("test", "destis", &shared)).await;
        assert_eq!(usage, images_usage(0));
    }

    #[tokio::test]
    async fn test_mapping_without_digest_counts_nothing() {
        let usage = usage_with(
            vec![image_stream("test", "is")],
            mapping("test", "is", "not-a-digest"),
        )
        .await;
        assert_eq!(usage, images_usage(0));
    }
}
