//! Usage evaluation for image stream tag updates.

use crate::api::{
    ImageStreamTag, RESOURCE_IMAGE_STREAM_IMAGES, RESOURCE_IMAGE_STREAM_TAGS,
};
use crate::client::ImageQuotaClient;
use crate::errors::ClientError;
use crate::evaluator::{
    Evaluator, GroupKind, Operation, QuotaObject, require_kind, usage_list,
};
use crate::normalize::canonical_ref_for_object_reference;
use crate::quantity::ResourceList;
use crate::reference::parse_image_stream_tag_name;
use crate::usage::ImageStreamUsageComputer;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::debug;

const COMPUTE_RESOURCES: &[&str] = &[RESOURCE_IMAGE_STREAM_TAGS, RESOURCE_IMAGE_STREAM_IMAGES];

/// Handles UPDATE admission on the imagestreamtags resource: a tag update
/// adds one spec reference, and one status reference when the new source
/// carries a concrete digest not yet tagged in the project.
pub struct ImageStreamTagEvaluator<C> {
    client: C,
}

impl<C: ImageQuotaClient> ImageStreamTagEvaluator<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Fetches the current image stream tag. A tag that does not exist yet
    /// resolves to an empty object so that the admission plugin can treat
    /// first-time tagging like any other update.
    pub async fn get(&self, namespace: &str, id: &str) -> Result<ImageStreamTag, ClientError> {
        let (name, tag) = parse_image_stream_tag_name(id)
            .map_err(|err| ClientError::Other(err.into()))?;

        match self.client.get_image_stream_tag(namespace, name, tag).await {
            Ok(ist) => Ok(ist),
            Err(err) if err.is_not_found() => Ok(ImageStreamTag {
                metadata: ObjectMeta {
                    namespace: Some(namespace.to_string()),
                    name: Some(id.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }),
            Err(err) => Err(err),
        }
    }
}

impl<C: ImageQuotaClient> Evaluator for ImageStreamTagEvaluator<C> {
    fn name(&self) -> &'static str {
        "Evaluator.ImageStreamTag"
    }

    fn group_kind(&self) -> GroupKind {
        GroupKind::image("ImageStreamTag")
    }

    fn matched_resource_names(&self) -> &'static [&'static str] {
        COMPUTE_RESOURCES
    }

    fn operation_resources(&self, operation: Operation) -> &'static [&'static str] {
        match operation {
            Operation::Update => COMPUTE_RESOURCES,
            Operation::Create => &[],
        }
    }

    fn constraints(&self, _required: &[&str], object: &QuotaObject) -> anyhow::Result<()> {
        require_kind("ImageStreamTag", object)
    }

    async fn usage(&self, object: &QuotaObject) -> Result<ResourceList, ClientError> {
        let QuotaObject::ImageStreamTag(ist) = object else {
            return Ok(ResourceList::new());
        };

        let namespace = ist.metadata.namespace.as_deref().unwrap_or_default();
        let name = ist.metadata.name.as_deref().unwrap_or_default();

        let Some(tag_reference) = &ist.tag else {
            debug!("Nothing to tag to {}/{}", namespace, name);
            return Ok(usage_list(0, 0));
        };

        if let Err(err) = parse_image_stream_tag_name(name) {
            debug!("Malformed image stream tag name {}/{}: {}", namespace, name, err);
            return Ok(usage_list(0, 0));
        }

        let Some(from) = &tag_reference.from else {
            debug!("From unspecified in tag reference of istag {}/{}, skipping", namespace, name);
            return Ok(usage_list(0, 0));
        };

        let reference = match canonical_ref_for_object_reference(namespace, from) {
            Ok(reference) => reference,
            Err(err) => {
                debug!(
                    "Failed to resolve source of istag {}/{}: {}",
                    namespace, name, err
                );
                return Ok(usage_list(0, 0));
            }
        };

        let computer = ImageStreamUsageComputer::new(&self.client);
        let increment = computer
            .usage_increment(namespace, None, Some(&reference), None)
            .await?;

        Ok(usage_list(
            increment.spec_refs_increment,
            increment.status_refs_increment,
        ))
    }
}
