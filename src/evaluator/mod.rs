//! Usage evaluators for the object kinds that mutate image references.
//!
//! One evaluator exists per admitted kind, each wrapping the usage computer
//! with the wrapping rules of its kind. Controller-side evaluation
//! additionally shares a deduplication context across all streams of a
//! namespace, which is what [`SharedContextEvaluator`] provides.

pub mod image_stream;
pub mod image_stream_import;
pub mod image_stream_mapping;
pub mod image_stream_tag;

pub use image_stream::{
    ImageStreamAdmissionEvaluator, ImageStreamEvaluator, image_stream_evaluator,
};
pub use image_stream_import::ImageStreamImportEvaluator;
pub use image_stream_mapping::ImageStreamMappingEvaluator;
pub use image_stream_tag::ImageStreamTagEvaluator;

use crate::api::{
    API_GROUP, ImageStream, ImageStreamImport, ImageStreamMapping, ImageStreamTag,
    RESOURCE_IMAGE_STREAM_IMAGES, RESOURCE_IMAGE_STREAM_TAGS,
};
use crate::errors::ClientError;
use crate::quantity::{ResourceList, add, quantity, zeroed};
use anyhow::bail;
use std::fmt;

/// Admission operations an evaluator can participate in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupKind {
    pub group: &'static str,
    pub kind: &'static str,
}

impl GroupKind {
    pub const fn image(kind: &'static str) -> Self {
        Self {
            group: API_GROUP,
            kind,
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

/// An object submitted for quota evaluation.
#[derive(Clone, Debug)]
pub enum QuotaObject {
    ImageStream(ImageStream),
    ImageStreamTag(ImageStreamTag),
    ImageStreamMapping(ImageStreamMapping),
    ImageStreamImport(ImageStreamImport),
}

impl QuotaObject {
    pub fn kind(&self) -> &'static str {
        match self {
            QuotaObject::ImageStream(_) => "ImageStream",
            QuotaObject::ImageStreamTag(_) => "ImageStreamTag",
            QuotaObject::ImageStreamMapping(_) => "ImageStreamMapping",
            QuotaObject::ImageStreamImport(_) => "ImageStreamImport",
        }
    }
}

/// Aggregated usage over a namespace.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UsageStats {
    pub used: ResourceList,
}

/// Uniform surface the quota controller and the admission plugin program
/// against.
pub trait Evaluator {
    fn name(&self) -> &'static str;

    fn group_kind(&self) -> GroupKind;

    /// Quota resources this evaluator contributes to.
    fn matched_resource_names(&self) -> &'static [&'static str];

    /// Resources charged for the given admission operation; empty when the
    /// evaluator does not participate in it.
    fn operation_resources(&self, operation: Operation) -> &'static [&'static str];

    fn handles_operation(&self, operation: Operation) -> bool {
        !self.operation_resources(operation).is_empty()
    }

    /// Rejects objects of a kind this evaluator does not understand.
    fn constraints(&self, required: &[&str], object: &QuotaObject) -> anyhow::Result<()>;

    /// Quota scopes never narrow image reference accounting.
    fn matches_scope(&self, _scope: &str, _object: &QuotaObject) -> bool {
        true
    }

    /// Computes the usage the given object stands for. For admission
    /// evaluators this is the increment against the current project state.
    async fn usage(&self, object: &QuotaObject) -> Result<ResourceList, ClientError>;
}

/// Controller-side extension: evaluators that can enumerate the objects of a
/// namespace.
pub trait NamespaceEvaluator: Evaluator {
    async fn list(&self, namespace: &str) -> Result<Vec<QuotaObject>, ClientError>;
}

/// Context shared while a namespace is being folded; implementations keep
/// whatever deduplication state they need between `usage` calls.
pub trait UsageComputerContext {
    async fn usage(&mut self, object: &QuotaObject) -> Result<ResourceList, ClientError>;
}

/// Wraps a namespace evaluator so that usage across a single project shares
/// one context object. The context is produced by the factory once per
/// [`SharedContextEvaluator::usage_stats`] call and dropped when the
/// namespace is processed; per-object [`Evaluator::usage`] calls get a fresh
/// context, which yields conservative upper bounds acceptable for admission.
pub struct SharedContextEvaluator<E, F> {
    inner: E,
    factory: F,
}

impl<E, F, Ctx> SharedContextEvaluator<E, F>
where
    E: NamespaceEvaluator,
    F: Fn() -> Ctx,
    Ctx: UsageComputerContext,
{
    pub fn new(inner: E, factory: F) -> Self {
        Self { inner, factory }
    }

    /// Folds usage over every object of the namespace matching the scopes,
    /// reusing one freshly created context for the whole pass.
    pub async fn usage_stats(
        &self,
        namespace: &str,
        scopes: &[&str],
    ) -> Result<UsageStats, ClientError> {
        let mut used = zeroed(self.inner.matched_resource_names());

        let items = self.inner.list(namespace).await.map_err(|err| match err {
            ClientError::Other(err) => ClientError::Other(err.context(format!(
                "{}: failed to list {}",
                self.inner.name(),
                self.inner.group_kind()
            ))),
            other => other,
        })?;
        let mut context = (self.factory)();
        for item in &items {
            if !scopes.iter().all(|scope| self.inner.matches_scope(scope, item)) {
                continue;
            }
            let item_usage = context.usage(item).await?;
            used = add(&used, &item_usage).map_err(|err| ClientError::Other(err.into()))?;
        }

        Ok(UsageStats { used })
    }
}

impl<E, F, Ctx> Evaluator for SharedContextEvaluator<E, F>
where
    E: NamespaceEvaluator,
    F: Fn() -> Ctx,
    Ctx: UsageComputerContext,
{
    fn name(&self) -> &'static str {
        "Evaluator.ImageStream.Controller"
    }

    fn group_kind(&self) -> GroupKind {
        self.inner.group_kind()
    }

    fn matched_resource_names(&self) -> &'static [&'static str] {
        self.inner.matched_resource_names()
    }

    /// Controller evaluators take no part in admission.
    fn operation_resources(&self, _operation: Operation) -> &'static [&'static str] {
        &[]
    }

    fn constraints(&self, required: &[&str], object: &QuotaObject) -> anyhow::Result<()> {
        self.inner.constraints(required, object)
    }

    async fn usage(&self, object: &QuotaObject) -> Result<ResourceList, ClientError> {
        let mut context = (self.factory)();
        context.usage(object).await
    }
}

impl<E, F, Ctx> NamespaceEvaluator for SharedContextEvaluator<E, F>
where
    E: NamespaceEvaluator,
    F: Fn() -> Ctx,
    Ctx: UsageComputerContext,
{
    async fn list(&self, namespace: &str) -> Result<Vec<QuotaObject>, ClientError> {
        self.inner.list(namespace).await
    }
}

/// Both quota resources set from reference counts.
pub(crate) fn usage_list(spec_refs: u64, status_refs: u64) -> ResourceList {
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

pub(crate) fn require_kind(expected: &'static str, object: &QuotaObject) -> anyhow::Result<()> {
    if object.kind() != expected {
        bail!("unexpected input object of kind {}", object.kind());
    }
    Ok(())
}
