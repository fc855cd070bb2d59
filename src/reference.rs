//! Docker pull spec parsing and normalisation.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

pub const DEFAULT_IMAGE_TAG: &str = "latest";
pub const DOCKER_DEFAULT_REGISTRY: &str = "docker.io";
pub const DOCKER_DEFAULT_NAMESPACE: &str = "library";

static DIGEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^sha256:[a-f0-9]{64}$").expect("invalid digest regex"));

/// Returns true if the string is a well-formed content digest.
pub fn is_digest(s: &str) -> bool {
    DIGEST_RE.is_match(s)
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("invalid image reference format: {0}")]
    InvalidFormat(String),

    #[error("reference {0} is missing a tag")]
    MissingTag(String),

    #[error("reference {0} is missing an id")]
    MissingId(String),

    #[error("reference {0} must not carry a tag")]
    UnexpectedTag(String),

    #[error("reference {0} must not carry an id")]
    UnexpectedId(String),

    #[error("unsupported object reference kind {0}")]
    UnsupportedKind(String),
}

/// Parsed docker-style image reference. Components that are absent stay
/// empty, mirroring how the pull spec grammar treats them as optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub namespace: String,
    pub name: String,
    pub tag: String,
    pub id: String,
}

impl ImageReference {
    /// Parses a pull spec of the form `[registry/][namespace/]name[:tag][@id]`.
    ///
    /// The first path segment is taken for a registry host when it contains a
    /// dot or a port, or equals `localhost`; everything between the registry
    /// and the final segment forms the namespace.
    pub fn parse(spec: &str) -> Result<Self, ReferenceError> {
        let (remainder, id) = match spec.split_once('@') {
            Some((remainder, id)) => (remainder, id.to_string()),
            None => (spec, String::new()),
        };

        // A colon after the last slash separates the tag; earlier colons
        // belong to a registry port.
        let (path, tag) = match remainder.rfind(':') {
            Some(pos) if pos >= remainder.rfind('/').map_or(0, |s| s) => {
                (&remainder[..pos], remainder[pos + 1..].to_string())
            }
            _ => (remainder, String::new()),
        };

        if path.is_empty() {
            return Err(ReferenceError::InvalidFormat(spec.to_string()));
        }

        let mut segments: Vec<&str> = path.split('/').collect();
        let registry = if segments.len() > 1 && is_registry_segment(segments[0]) {
            segments.remove(0).to_string()
        } else {
            String::new()
        };

        let name = segments.pop().unwrap_or_default().to_string();
        let namespace = segments.join("/");

        if name.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(ReferenceError::InvalidFormat(spec.to_string()));
        }

        Ok(ImageReference {
            registry,
            namespace,
            name,
            tag,
            id,
        })
    }

    /// Applies the defaults the docker client assumes: a missing registry is
    /// docker hub and a missing namespace on docker hub is `library`.
    pub fn docker_client_defaults(mut self) -> Self {
        if self.registry.is_empty() {
            self.registry = DOCKER_DEFAULT_REGISTRY.to_string();
        }
        if self.namespace.is_empty() && is_docker_hub_registry(&self.registry) {
            self.namespace = DOCKER_DEFAULT_NAMESPACE.to_string();
        }
        self
    }

    /// Clears defaults the docker daemon would re-add on its own: docker hub
    /// aliases collapse to `docker.io`, a `library` namespace on docker hub is
    /// dropped, and so is a `latest` tag.
    pub fn daemon_minimal(mut self) -> Self {
        if is_docker_hub_registry(&self.registry) {
            self.registry = DOCKER_DEFAULT_REGISTRY.to_string();
            if self.namespace == DOCKER_DEFAULT_NAMESPACE {
                self.namespace.clear();
            }
        }
        self.minimal()
    }

    /// Drops the default tag.
    pub fn minimal(mut self) -> Self {
        if self.tag == DEFAULT_IMAGE_TAG {
            self.tag.clear();
        }
        self
    }

    /// Renders the reference with every present component spelled out.
    pub fn exact(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.registry.is_empty() {
            write!(f, "{}/", self.registry)?;
        }
        if !self.namespace.is_empty() {
            write!(f, "{}/", self.namespace)?;
        }
        write!(f, "{}", self.name)?;
        if !self.tag.is_empty() {
            write!(f, ":{}", self.tag)?;
        }
        if !self.id.is_empty() {
            write!(f, "@{}", self.id)?;
        }
        Ok(())
    }
}

fn is_registry_segment(segment: &str) -> bool {
    segment == "localhost" || segment.contains('.') || segment.contains(':')
}

fn is_docker_hub_registry(registry: &str) -> bool {
    matches!(
        registry,
        "docker.io" | "index.docker.io" | "registry-1.docker.io"
    )
}

/// Splits an `isName:tag` pair. The tag is mandatory and a digest in place of
/// the tag is rejected.
pub fn parse_image_stream_tag_name(name: &str) -> Result<(&str, &str), ReferenceError> {
    if name.contains('@') {
        return Err(ReferenceError::UnexpectedId(name.to_string()));
    }
    let (is_name, tag) = name
        .split_once(':')
        .ok_or_else(|| ReferenceError::MissingTag(name.to_string()))?;
    if is_name.is_empty() || tag.is_empty() || tag.contains(':') {
        return Err(ReferenceError::InvalidFormat(name.to_string()));
    }
    Ok((is_name, tag))
}
