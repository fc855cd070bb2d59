//! Evaluator bundles for the two callers of the engine.
//!
//! The resource quota controller and the admission plugin need different
//! evaluator sets: the controller enumerates image streams and sums real
//! usage, while admission charges increments for every mutating kind. The
//! two registries here mirror that split.

use crate::client::ImageQuotaClient;
use crate::config::Config;
use crate::errors::ClientError;
use crate::evaluator::{
    Evaluator, GroupKind, ImageStreamAdmissionEvaluator, ImageStreamEvaluator,
    ImageStreamImportEvaluator, ImageStreamMappingEvaluator, ImageStreamTagEvaluator, Operation,
    QuotaObject, image_stream_evaluator,
};
use crate::quantity::ResourceList;

/// Evaluators registered with the resource quota controller. Only image
/// streams are evaluated there; the virtual kinds exist solely during
/// admission.
pub struct ControllerQuotaRegistry<C> {
    pub image_stream: ImageStreamEvaluator<C>,
}

impl<C: ImageQuotaClient> ControllerQuotaRegistry<C> {
    pub fn new(client: C) -> Self {
        Self {
            image_stream: image_stream_evaluator(client),
        }
    }

    pub fn group_kinds(&self) -> Vec<GroupKind> {
        vec![self.image_stream.group_kind()]
    }

    pub fn evaluates(&self, group_kind: GroupKind) -> bool {
        self.group_kinds().contains(&group_kind)
    }
}

/// Evaluators registered with the quota admission plugin. These return usage
/// increments and must not be handed to the controller.
pub struct AdmissionQuotaRegistry<C> {
    pub image_stream: ImageStreamAdmissionEvaluator<C>,
    pub image_stream_tag: ImageStreamTagEvaluator<C>,
    pub image_stream_mapping: ImageStreamMappingEvaluator<C>,
    pub image_stream_import: ImageStreamImportEvaluator<C>,
}

impl<C: ImageQuotaClient + Clone> AdmissionQuotaRegistry<C> {
    pub fn new(client: C, config: &Config) -> Self {
        Self {
            image_stream: ImageStreamAdmissionEvaluator::new(client.clone()),
            image_stream_tag: ImageStreamTagEvaluator::new(client.clone()),
            image_stream_mapping: ImageStreamMappingEvaluator::new(client.clone()),
            image_stream_import: ImageStreamImportEvaluator::new(
                client,
                config.max_images_bulk_imported_per_repository,
            ),
        }
    }

    pub fn group_kinds(&self) -> Vec<GroupKind> {
        vec![
            self.image_stream.group_kind(),
            self.image_stream_tag.group_kind(),
            self.image_stream_mapping.group_kind(),
            self.image_stream_import.group_kind(),
        ]
    }

    pub fn evaluates(&self, group_kind: GroupKind) -> bool {
        self.group_kinds().contains(&group_kind)
    }

    /// Routes an admitted object to its evaluator. Objects of a kind the
    /// operation does not charge produce no usage.
    pub async fn usage(
        &self,
        operation: Operation,
        object: &QuotaObject,
    ) -> Result<ResourceList, ClientError> {
        match object {
            QuotaObject::ImageStream(_) => {
                evaluate(&self.image_stream, operation, object).await
            }
            QuotaObject::ImageStreamTag(_) => {
                evaluate(&self.image_stream_tag, operation, object).await
            }
            QuotaObject::ImageStreamMapping(_) => {
                evaluate(&self.image_stream_mapping, operation, object).await
            }
            QuotaObject::ImageStreamImport(_) => {
                evaluate(&self.image_stream_import, operation, object).await
            }
        }
    }
}

async fn evaluate<E: Evaluator>(
    evaluator: &E,
    operation: Operation,
    object: &QuotaObject,
) -> Result<ResourceList, ClientError> {
    if !evaluator.handles_operation(operation) {
        return Ok(ResourceList::new());
    }
    evaluator.usage(object).await
}
