//! Typed objects for image streams and the virtual kinds that mutate them.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

pub const API_GROUP: &str = "image.imagequota.io";
pub const API_VERSION: &str = "v1";

/// Number of distinct image references recorded in the spec sections of all
/// image streams in a project.
pub const RESOURCE_IMAGE_STREAM_TAGS: &str = "imagequota.io/imagestreamtags";
/// Number of distinct image digests recorded in the status sections of all
/// image streams in a project.
pub const RESOURCE_IMAGE_STREAM_IMAGES: &str = "imagequota.io/imagestreamimages";

/// Limit range type constraining the size of a single image.
pub const LIMIT_TYPE_IMAGE_SIZE: &str = "imagequota.io/ImageSize";
/// Resource name carrying the byte cap inside an image size limit.
pub const RESOURCE_STORAGE: &str = "storage";

/// A named, namespaced collection of tagged references to images. The spec
/// holds user intent, the status holds what the resolver recorded.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImageStream {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ImageStreamSpec,
    #[serde(default)]
    pub status: ImageStreamStatus,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImageStreamSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, TagReference>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImageStreamStatus {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, TagEventList>,
}

/// Desired source of a single spec tag. Carries no digest of its own;
/// resolving the reference is the engine's job.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TagReference {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ObjectReference>,
}

/// Ordered history of resolved entries for one status tag. The resolver
/// prepends events, so the first item is the current image.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TagEventList {
    #[serde(default)]
    pub items: Vec<TagEvent>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagEvent {
    /// Pull spec the image was resolved from.
    #[serde(default)]
    pub docker_image_reference: String,
    /// Digest of the image stored in the registry.
    #[serde(default)]
    pub image: String,
}

/// Reference to an image source. Interpretation depends on `kind`:
/// `DockerImage` names a registry pull spec, `ImageStreamTag` an
/// `isName:tag` pair and `ImageStreamImage` an `isName@digest` pair, the
/// latter two optionally qualified by a namespace.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObjectReference {
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: String,
}

/// An image stored in the internal registry. Its metadata name is the digest.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub docker_image_reference: String,
}

/// Virtual object handled during admission of tag updates. The metadata name
/// is `isName:tag`; applying it adds or replaces the spec tag.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImageStreamTag {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TagReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
}

/// Virtual object handled during admission of manifest uploads. Creating it
/// appends a status tag event carrying the image digest to the stream named
/// by the metadata.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImageStreamMapping {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub image: Image,
}

/// Bulk import request. Explicit images become individual spec tags; a
/// repository import fans out to at most the configured number of tags.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImageStreamImport {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ImageStreamImportSpec,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImageStreamImportSpec {
    #[serde(default)]
    pub import: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageImportSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryImportSpec>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImageImportSpec {
    pub from: ObjectReference,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RepositoryImportSpec {
    pub from: ObjectReference,
}

/// Returns the most recent status event recorded for the given tag.
pub fn latest_tag_event<'a>(is: &'a ImageStream, tag: &str) -> Option<&'a TagEvent> {
    is.status.tags.get(tag).and_then(|history| history.items.first())
}

/// Joins a stream name and a tag into the `isName:tag` form used by image
/// stream tag objects.
pub fn join_image_stream_tag(name: &str, tag: &str) -> String {
    format!("{}:{}", name, tag)
}

macro_rules! impl_resource {
    ($type:ty, $kind:literal, $plural:literal, $scope:ty) => {
        impl kube::core::Resource for $type {
            type DynamicType = ();
            type Scope = $scope;

            fn kind(_: &()) -> Cow<'_, str> {
                $kind.into()
            }

            fn group(_: &()) -> Cow<'_, str> {
                API_GROUP.into()
            }

            fn version(_: &()) -> Cow<'_, str> {
                API_VERSION.into()
            }

            fn plural(_: &()) -> Cow<'_, str> {
                $plural.into()
            }

            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

impl_resource!(ImageStream, "ImageStream", "imagestreams", NamespaceResourceScope);
impl_resource!(ImageStreamTag, "ImageStreamTag", "imagestreamtags", NamespaceResourceScope);
impl_resource!(Image, "Image", "images", ClusterResourceScope);
