//! Usage evaluation for image streams, in two flavours: per-stream counting
//! for the resource quota controller and increment computation for the
//! admission plugin.

use crate::api::{
    ImageStream, RESOURCE_IMAGE_STREAM_IMAGES, RESOURCE_IMAGE_STREAM_TAGS,
};
use crate::client::ImageQuotaClient;
use crate::errors::ClientError;
use crate::evaluator::{
    Evaluator, GroupKind, NamespaceEvaluator, Operation, QuotaObject, SharedContextEvaluator,
    UsageComputerContext, require_kind, usage_list,
};
use crate::quantity::ResourceList;
use crate::usage::{ImageStreamUsageComputer, process_image_stream_references};
use std::collections::BTreeSet;

const COMPUTE_RESOURCES: &[&str] = &[RESOURCE_IMAGE_STREAM_TAGS, RESOURCE_IMAGE_STREAM_IMAGES];

/// Evaluates create and update operations on image streams by computing the
/// project-wide usage increment the submitted stream would cause.
pub struct ImageStreamAdmissionEvaluator<C> {
    client: C,
}

impl<C: ImageQuotaClient> ImageStreamAdmissionEvaluator<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Fetches the stored stream, for admission plugins that need the old
    /// object of an update.
    pub async fn get(&self, namespace: &str, name: &str) -> Result<ImageStream, ClientError> {
        self.client.get_image_stream(namespace, name).await
    }
}

impl<C: ImageQuotaClient> Evaluator for ImageStreamAdmissionEvaluator<C> {
    fn name(&self) -> &'static str {
        "Evaluator.ImageStream.Admission"
    }

    fn group_kind(&self) -> GroupKind {
        GroupKind::image("ImageStream")
    }

    fn matched_resource_names(&self) -> &'static [&'static str] {
        COMPUTE_RESOURCES
    }

    fn operation_resources(&self, operation: Operation) -> &'static [&'static str] {
        match operation {
            Operation::Create | Operation::Update => COMPUTE_RESOURCES,
        }
    }

    fn constraints(&self, _required: &[&str], object: &QuotaObject) -> anyhow::Result<()> {
        require_kind("ImageStream", object)
    }

    async fn usage(&self, object: &QuotaObject) -> Result<ResourceList, ClientError> {
        let QuotaObject::ImageStream(is) = object else {
            return Ok(ResourceList::new());
        };

        let namespace = is.metadata.namespace.as_deref().unwrap_or_default();
        let computer = ImageStreamUsageComputer::new(&self.client);
        let increment = computer
            .usage_increment(namespace, Some(is), None, None)
            .await?;

        Ok(usage_list(
            increment.spec_refs_increment,
            increment.status_refs_increment,
        ))
    }
}

impl<C: ImageQuotaClient> NamespaceEvaluator for ImageStreamAdmissionEvaluator<C> {
    async fn list(&self, namespace: &str) -> Result<Vec<QuotaObject>, ClientError> {
        let streams = self.client.list_image_streams(namespace).await?;
        Ok(streams.into_iter().map(QuotaObject::ImageStream).collect())
    }
}

/// Deduplication state shared across the streams of one namespace while the
/// controller folds usage.
#[derive(Default)]
pub struct StreamReferenceContext {
    spec_refs: BTreeSet<String>,
    status_refs: BTreeSet<String>,
}

impl UsageComputerContext for StreamReferenceContext {
    async fn usage(&mut self, object: &QuotaObject) -> Result<ResourceList, ClientError> {
        let QuotaObject::ImageStream(is) = object else {
            return Ok(ResourceList::new());
        };

        let mut spec_refs = 0;
        let mut status_refs = 0;
        process_image_stream_references(is, false, |reference, in_spec, in_status| {
            if in_spec && self.spec_refs.insert(reference.to_string()) {
                spec_refs += 1;
            }
            if in_status && self.status_refs.insert(reference.to_string()) {
                status_refs += 1;
            }
        });

        Ok(usage_list(spec_refs, status_refs))
    }
}

/// Controller-side image stream evaluator.
pub type ImageStreamEvaluator<C> =
    SharedContextEvaluator<ImageStreamAdmissionEvaluator<C>, fn() -> StreamReferenceContext>;

/// Builds the evaluator the resource quota controller registers. It shares
/// its deduplication context across a namespace scan and never participates
/// in admission.
pub fn image_stream_evaluator<C: ImageQuotaClient>(client: C) -> ImageStreamEvaluator<C> {
    SharedContextEvaluator::new(
        ImageStreamAdmissionEvaluator::new(client),
        StreamReferenceContext::default as fn() -> StreamReferenceContext,
    )
}
