//! Reference counting over a project's image streams.
//!
//! Deduplication keys on canonical reference strings: spec tags resolve
//! through the normaliser, status tags contribute bare digests. The two sets
//! are disjoint by construction and a reference occurring in both the spec
//! and the status of any stream counts once in each.

use crate::api::ImageStream;
use crate::client::ImageQuotaClient;
use crate::errors::ClientError;
use crate::normalize::canonical_ref_for_object_reference;
use crate::reference::ImageReference;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Where a canonical reference was observed within one image stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct RefSources {
    in_spec: bool,
    in_status: bool,
}

/// Current usage of a project.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProjectUsage {
    pub spec_refs: u64,
    pub status_refs: u64,
}

/// Usage of a project next to the growth a mutation would cause.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsageIncrement {
    pub spec_refs: u64,
    pub spec_refs_increment: u64,
    pub status_refs: u64,
    pub status_refs_increment: u64,
}

/// Walks the unique canonical references one image stream contributes,
/// invoking the handler exactly once per reference with the sources it
/// appeared in. References that fail to normalise are skipped.
pub fn process_image_stream_references<F>(is: &ImageStream, spec_only: bool, mut handler: F)
where
    F: FnMut(&str, bool, bool),
{
    let namespace = is.metadata.namespace.as_deref().unwrap_or_default();
    let name = is.metadata.name.as_deref().unwrap_or_default();
    let mut references: BTreeMap<String, RefSources> = BTreeMap::new();

    for (tag, tag_reference) in &is.spec.tags {
        let Some(from) = &tag_reference.from else {
            continue;
        };
        match canonical_ref_for_object_reference(namespace, from) {
            Ok(reference) => references.entry(reference).or_default().in_spec = true,
            Err(err) => debug!(
                "Skipping spec tag {} of image stream {}/{}: {}",
                tag, namespace, name, err
            ),
        }
    }

    if !spec_only {
        for history in is.status.tags.values() {
            for item in &history.items {
                if item.image.is_empty() {
                    continue;
                }
                references.entry(item.image.clone()).or_default().in_status = true;
            }
        }
    }

    for (reference, sources) in &references {
        handler(reference, sources.in_spec, sources.in_status);
    }
}

/// Computes reference usage across all image streams of a project. One
/// instance serves a single evaluation and is discarded afterwards.
pub struct ImageStreamUsageComputer<'a, C> {
    client: &'a C,
}

impl<'a, C: ImageQuotaClient> ImageStreamUsageComputer<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Counts the distinct spec and status references tagged in the project.
    pub async fn project_usage(&self, namespace: &str) -> Result<ProjectUsage, ClientError> {
        let streams = self.client.list_image_streams(namespace).await?;

        let mut spec_refs = BTreeSet::new();
        let mut status_refs = BTreeSet::new();
        for is in &streams {
            process_image_stream_references(is, false, |reference, in_spec, in_status| {
                if in_spec {
                    spec_refs.insert(reference.to_string());
                }
                if in_status {
                    status_refs.insert(reference.to_string());
                }
            });
        }

        Ok(ProjectUsage {
            spec_refs: spec_refs.len() as u64,
            status_refs: status_refs.len() as u64,
        })
    }

    /// Computes how much a mutation grows the project's reference usage.
    ///
    /// The baseline covers every stream except the candidate, which is
    /// matched by name so that an update replaces the stored stream rather
    /// than double-counting it. On top of the baseline the candidate stream,
    /// a single new spec reference and a single new status digest can each be
    /// folded in; deduplication ensures references already tagged elsewhere
    /// in the project do not count again.
    pub async fn usage_increment(
        &self,
        namespace: &str,
        candidate: Option<&ImageStream>,
        new_spec_ref: Option<&str>,
        new_status_digest: Option<&str>,
    ) -> Result<UsageIncrement, ClientError> {
        let streams = self.client.list_image_streams(namespace).await?;

        let mut spec_refs = BTreeSet::new();
        let mut status_refs = BTreeSet::new();
        for is in &streams {
            if let Some(candidate) = candidate {
                if candidate.metadata.name == is.metadata.name {
                    continue;
                }
            }
            process_image_stream_references(is, false, |reference, in_spec, in_status| {
                if in_spec {
                    spec_refs.insert(reference.to_string());
                }
                if in_status {
                    status_refs.insert(reference.to_string());
                }
            });
        }

        let mut increment = UsageIncrement {
            spec_refs: spec_refs.len() as u64,
            status_refs: status_refs.len() as u64,
            ..Default::default()
        };

        if let Some(is) = candidate {
            process_image_stream_references(is, false, |reference, in_spec, in_status| {
                if in_status && status_refs.insert(reference.to_string()) {
                    increment.status_refs_increment += 1;
                }
                if in_spec && spec_refs.insert(reference.to_string()) {
                    increment.spec_refs_increment += 1;
                    increment.status_refs_increment +=
                        claim_embedded_digest(reference, &mut status_refs);
                }
            });
        }

        if let Some(reference) = new_spec_ref {
            if spec_refs.insert(reference.to_string()) {
                increment.spec_refs_increment += 1;
                increment.status_refs_increment += claim_embedded_digest(reference, &mut status_refs);
            }
        }

        if let Some(digest) = new_status_digest {
            if status_refs.insert(digest.to_string()) {
                increment.status_refs_increment += 1;
            }
        }

        Ok(increment)
    }
}

/// A spec reference carrying a concrete digest implies a forthcoming status
/// entry; claim the digest so it is not counted twice. Returns the number of
/// status references gained (0 or 1).
fn claim_embedded_digest(reference: &str, status_refs: &mut BTreeSet<String>) -> u64 {
    let Ok(parsed) = ImageReference::parse(reference) else {
        return 0;
    };
    if !parsed.id.is_empty() && status_refs.insert(parsed.id) {
        1
    } else {
        0
    }
}
