//! Resolution of object references to canonical reference strings.
//!
//! The canonical form is what project-wide deduplication keys on: a fully
//! defaulted docker pull spec for direct image references, or
//! `namespace/isName:tag` / `namespace/isName@digest` for references into
//! image streams.

use crate::api::ObjectReference;
use crate::reference::{ImageReference, ReferenceError};

pub const KIND_DOCKER_IMAGE: &str = "DockerImage";
pub const KIND_IMAGE_STREAM_TAG: &str = "ImageStreamTag";
pub const KIND_IMAGE_STREAM_IMAGE: &str = "ImageStreamImage";

/// Resolves an object reference against its enclosing namespace to the
/// canonical reference string. Callers treat an error as "skip this
/// reference".
pub fn canonical_ref_for_object_reference(
    enclosing_namespace: &str,
    obj_ref: &ObjectReference,
) -> Result<String, ReferenceError> {
    match obj_ref.kind.as_str() {
        KIND_DOCKER_IMAGE => {
            let reference = ImageReference::parse(&obj_ref.name)?;
            Ok(reference.docker_client_defaults().daemon_minimal().exact())
        }

        KIND_IMAGE_STREAM_IMAGE => {
            let mut reference = ImageReference::parse(&obj_ref.name)?;
            if !reference.tag.is_empty() {
                return Err(ReferenceError::UnexpectedTag(obj_ref.name.clone()));
            }
            if reference.id.is_empty() {
                return Err(ReferenceError::MissingId(obj_ref.name.clone()));
            }
            if reference.namespace.is_empty() {
                reference.namespace = fallback_namespace(obj_ref, enclosing_namespace);
            }
            Ok(reference.exact())
        }

        KIND_IMAGE_STREAM_TAG => {
            let (is_name, tag) = crate::reference::parse_image_stream_tag_name(&obj_ref.name)?;
            let namespace = fallback_namespace(obj_ref, enclosing_namespace);
            if namespace.is_empty() {
                Ok(format!("{}:{}", is_name, tag))
            } else {
                Ok(format!("{}/{}:{}", namespace, is_name, tag))
            }
        }

        other => Err(ReferenceError::UnsupportedKind(other.to_string())),
    }
}

fn fallback_namespace(obj_ref: &ObjectReference, enclosing_namespace: &str) -> String {
    match obj_ref.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => ns.to_string(),
        _ => enclosing_namespace.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{INTERNAL_REGISTRY_URL, digest};

    fn object_reference(kind: &str, namespace: Option<&str>, name: String) -> ObjectReference {
        ObjectReference {
            kind: kind.to_string(),
            namespace: namespace.map(|ns| ns.to_string()),
            name,
        }
    }

    #[test]
    fn test_canonical_ref_for_object_reference() {
        let base_digest = digest('a');
        for (name, namespace, obj_ref, expected) in [
            (
                "isimage without namespace",
                "",
                object_reference(KIND_IMAGE_STREAM_IMAGE, None, format!("is@{}", base_digest)),
                Ok(format!("is@{}", base_digest)),
            ),
            (
                "isimage with a fallback namespace",
                "fallback",
                object_reference(KIND_IMAGE_STREAM_IMAGE, None, format!("is@{}", base_digest)),
                Ok(format!("fallback/is@{}", base_digest)),
            ),
            (
                "isimage with namespace set",
                "fallback",
                object_reference(
                    KIND_IMAGE_STREAM_IMAGE,
                    Some("ns"),
                    format!("is@{}", base_digest),
                ),
                Ok(format!("ns/is@{}", base_digest)),
            ),
            (
                "isimage missing id",
                "",
                object_reference(
                    KIND_IMAGE_STREAM_IMAGE,
                    None,
                    format!("{}/is", INTERNAL_REGISTRY_URL),
                ),
                Err(()),
            ),
            (
                "isimage with a tag",
                "",
                object_reference(
                    KIND_IMAGE_STREAM_IMAGE,
                    None,
                    format!("{}/is:latest", INTERNAL_REGISTRY_URL),
                ),
                Err(()),
            ),
            (
                "istag without namespace",
                "",
                object_reference(KIND_IMAGE_STREAM_TAG, None, "is:latest".to_string()),
                Ok("is:latest".to_string()),
            ),
            (
                "istag with fallback namespace",
                "fallback",
                object_reference(KIND_IMAGE_STREAM_TAG, None, "is:latest".to_string()),
                Ok("fallback/is:latest".to_string()),
            ),
            (
                "istag with namespace set",
                "fallback",
                object_reference(KIND_IMAGE_STREAM_TAG, Some("ns"), "is:latest".to_string()),
                Ok("ns/is:latest".to_string()),
            ),
            (
                "istag with missing tag",
                "",
                object_reference(KIND_IMAGE_STREAM_TAG, None, "is".to_string()),
                Err(()),
            ),
            (
                "istag with image id",
                "",
                object_reference(KIND_IMAGE_STREAM_TAG, None, format!("is@{}", base_digest)),
                Err(()),
            ),
            (
                "dockerimage without registry url",
                "",
                object_reference(
                    KIND_DOCKER_IMAGE,
                    Some("ns"),
                    format!("repo@{}", base_digest),
                ),
                Ok(format!("docker.io/repo@{}", base_digest)),
            ),
            (
                "dockerimage with a default tag",
                "",
                object_reference(KIND_DOCKER_IMAGE, Some("ns"), "library/repo:latest".to_string()),
                Ok("docker.io/repo".to_string()),
            ),
            (
                "dockerimage with a non-default tag",
                "",
                object_reference(KIND_DOCKER_IMAGE, Some("ns"), "repo:tag".to_string()),
                Ok("docker.io/repo:tag".to_string()),
            ),
            (
                "dockerimage referencing docker hub alias",
                "",
                object_reference(
                    KIND_DOCKER_IMAGE,
                    None,
                    format!("index.docker.io/repo@{}", base_digest),
                ),
                Ok(format!("docker.io/repo@{}", base_digest)),
            ),
            (
                "dockerimage without tag or id",
                "",
                object_reference(KIND_DOCKER_IMAGE, None, "index.docker.io/user/repo".to_string()),
                Ok("docker.io/user/repo".to_string()),
            ),
            (
                "dockerimage with internal registry",
                "",
                object_reference(
                    KIND_DOCKER_IMAGE,
                    None,
                    format!("{}/test/is@{}", INTERNAL_REGISTRY_URL, base_digest),
                ),
                Ok(format!("{}/test/is@{}", INTERNAL_REGISTRY_URL, base_digest)),
            ),
            (
                "kind match is case sensitive",
                "",
                object_reference("dockerImage", None, "docker.io/repo".to_string()),
                Err(()),
            ),
        ] {
            let result = canonical_ref_for_object_reference(namespace, &obj_ref);
            match expected {
                Ok(expected) => {
                    assert_eq!(result.as_deref(), Ok(expected.as_str()), "case {:?}", name)
                }
                Err(()) => assert!(result.is_err(), "case {:?} should fail, got {:?}", name, result),
            }
        }
    }
}
