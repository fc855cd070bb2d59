//! Usage evaluation for bulk imports.
//!
//! Explicit images are accounted one by one. A repository import cannot know
//! how many tags the remote side will deliver, so it assumes the configured
//! worst-case fan-out, reduced by the references to the same repository
//! already tagged in the project.

use crate::api::{
    ImageStreamImport, RESOURCE_IMAGE_STREAM_IMAGES, RESOURCE_IMAGE_STREAM_TAGS,
};
use crate::client::ImageQuotaClient;
use crate::errors::ClientError;
use crate::evaluator::{
    Evaluator, GroupKind, Operation, QuotaObject, require_kind, usage_list,
};
use crate::normalize::{KIND_DOCKER_IMAGE, canonical_ref_for_object_reference};
use crate::quantity::ResourceList;
use crate::reference::ImageReference;
use crate::usage::process_image_stream_references;
use std::collections::BTreeSet;
use tracing::debug;

const COMPUTE_RESOURCES: &[&str] = &[RESOURCE_IMAGE_STREAM_TAGS, RESOURCE_IMAGE_STREAM_IMAGES];

/// Handles CREATE admission on the imagestreamimports resource.
pub struct ImageStreamImportEvaluator<C> {
    client: C,
    max_images_per_repository: u64,
}

impl<C: ImageQuotaClient> ImageStreamImportEvaluator<C> {
    pub fn new(client: C, max_images_per_repository: u64) -> Self {
        Self {
            client,
            max_images_per_repository,
        }
    }
}

impl<C: ImageQuotaClient> Evaluator for ImageStreamImportEvaluator<C> {
    fn name(&self) -> &'static str {
        "Evaluator.ImageStreamImport"
    }

    fn group_kind(&self) -> GroupKind {
        GroupKind::image("ImageStreamImport")
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
        require_kind("ImageStreamImport", object)
    }

    async fn usage(&self, object: &QuotaObject) -> Result<ResourceList, ClientError> {
        let QuotaObject::ImageStreamImport(isi) = object else {
            return Ok(ResourceList::new());
        };

        if !isi.spec.import || (isi.spec.images.is_empty() && isi.spec.repository.is_none()) {
            return Ok(usage_list(0, 0));
        }

        let namespace = isi.metadata.namespace.as_deref().unwrap_or_default();
        let streams = self.client.list_image_streams(namespace).await?;

        let mut context = ImportReferenceContext::default();
        for is in &streams {
            process_image_stream_references(is, false, |reference, in_spec, in_status| {
                if in_spec {
                    context.spec_refs.insert(reference.to_string());
                }
                if in_status {
                    context.status_refs.insert(reference.to_string());
                }
            });
        }

        // individual images first so the repository pass sees their refs
        let (image_spec_refs, image_status_refs) = context.fold_images(isi);
        let repository_refs = context.repository_increment(isi, self.max_images_per_repository);

        Ok(usage_list(
            image_spec_refs + repository_refs,
            image_status_refs + repository_refs,
        ))
    }
}

/// References already tagged in the project, extended as import entries are
/// folded in.
#[derive(Default)]
struct ImportReferenceContext {
    spec_refs: BTreeSet<String>,
    status_refs: BTreeSet<String>,
}

impl ImportReferenceContext {
    /// Accounts the explicitly listed images. Every new spec reference also
    /// counts one image, unless it names a digest the project already
    /// tracks.
    fn fold_images(&mut self, isi: &ImageStreamImport) -> (u64, u64) {
        let namespace = isi.metadata.namespace.as_deref().unwrap_or_default();
        let name = isi.metadata.name.as_deref().unwrap_or_default();

        let mut spec_refs_increment = 0;
        let mut status_refs_increment = 0;
        for image in &isi.spec.images {
            if image.from.kind != KIND_DOCKER_IMAGE {
                continue;
            }
            let reference = match canonical_ref_for_object_reference(namespace, &image.from) {
                Ok(reference) => reference,
                Err(err) => {
                    debug!(
                        "Failed to resolve image spec.from of import {}/{}: {}",
                        namespace, name, err
                    );
                    continue;
                }
            };

            if !self.spec_refs.insert(reference.clone()) {
                continue;
            }
            spec_refs_increment += 1;

            let id = ImageReference::parse(&reference)
                .map(|parsed| parsed.id)
                .unwrap_or_default();
            if id.is_empty() || self.status_refs.insert(id) {
                status_refs_increment += 1;
            }
        }

        (spec_refs_increment, status_refs_increment)
    }

    /// Worst-case expansion of a repository import: the maximal fan-out,
    /// minus one for every reference to the same repository already tagged
    /// in some spec. Never negative.
    fn repository_increment(&self, isi: &ImageStreamImport, max_fan_out: u64) -> u64 {
        let Some(repository) = &isi.spec.repository else {
            return 0;
        };
        if repository.from.kind != KIND_DOCKER_IMAGE {
            return 0;
        }

        let namespace = isi.metadata.namespace.as_deref().unwrap_or_default();
        let name = isi.metadata.name.as_deref().unwrap_or_default();
        let repository_ref = match canonical_ref_for_object_reference(namespace, &repository.from)
        {
            Ok(reference) => reference,
            Err(err) => {
                debug!(
                    "Failed to resolve spec.repository.from of import {}/{}: {}",
                    namespace, name, err
                );
                return 0;
            }
        };

        let mut fan_out = max_fan_out;
        for reference in &self.spec_refs {
            if fan_out == 0 {
                break;
            }
            let Ok(mut parsed) = ImageReference::parse(reference) else {
                continue;
            };
            if !parsed.id.is_empty() {
                continue;
            }
            parsed.tag.clear();
            if parsed.daemon_minimal().exact() == repository_ref {
                fan_out -= 1;
            }
        }

        fan_out
    }
}
