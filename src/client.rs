//! Access to the API server resources the quota engine consumes.

use crate::api::{Image, ImageStream, ImageStreamTag, join_image_stream_tag, latest_tag_event};
use crate::errors::ClientError;
use k8s_openapi::api::core::v1::{LimitRange, ResourceQuota};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::ListParams;
use kube::{Api, Client};
use tracing::info;

/// Typed list/get operations the evaluators and the blob admission guard
/// need. Every method may block on I/O and honours the caller's cancellation
/// by being dropped; the engine adds no retries of its own.
pub trait ImageQuotaClient: Send + Sync {
    async fn list_image_streams(&self, namespace: &str) -> Result<Vec<ImageStream>, ClientError>;

    async fn get_image_stream(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ImageStream, ClientError>;

    async fn get_image_stream_tag(
        &self,
        namespace: &str,
        name: &str,
        tag: &str,
    ) -> Result<ImageStreamTag, ClientError>;

    async fn get_image(&self, digest: &str) -> Result<Image, ClientError>;

    async fn list_limit_ranges(&self, namespace: &str) -> Result<Vec<LimitRange>, ClientError>;

    async fn list_resource_quotas(
        &self,
        namespace: &str,
    ) -> Result<Vec<ResourceQuota>, ClientError>;
}

impl<C: ImageQuotaClient> ImageQuotaClient for std::sync::Arc<C> {
    async fn list_image_streams(&self, namespace: &str) -> Result<Vec<ImageStream>, ClientError> {
        (**self).list_image_streams(namespace).await
    }

    async fn get_image_stream(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ImageStream, ClientError> {
        (**self).get_image_stream(namespace, name).await
    }

    async fn get_image_stream_tag(
        &self,
        namespace: &str,
        name: &str,
        tag: &str,
    ) -> Result<ImageStreamTag, ClientError> {
        (**self).get_image_stream_tag(namespace, name, tag).await
    }

    async fn get_image(&self, digest: &str) -> Result<Image, ClientError> {
        (**self).get_image(digest).await
    }

    async fn list_limit_ranges(&self, namespace: &str) -> Result<Vec<LimitRange>, ClientError> {
        (**self).list_limit_ranges(namespace).await
    }

    async fn list_resource_quotas(
        &self,
        namespace: &str,
    ) -> Result<Vec<ResourceQuota>, ClientError> {
        (**self).list_resource_quotas(namespace).await
    }
}

/// API server access over an in-cluster or kubeconfig-derived client.
#[derive(Clone)]
pub struct KubeImageQuotaClient {
    client: Client,
}

impl KubeImageQuotaClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from the default environment, the same way a
    /// controller process bootstraps itself.
    pub async fn connect() -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        let api_server_info = client.apiserver_version().await?;
        info!(
            "Connected to Kubernetes API server with version {}.{}",
            api_server_info.major, api_server_info.minor
        );
        Ok(Self { client })
    }
}

impl ImageQuotaClient for KubeImageQuotaClient {
    async fn list_image_streams(&self, namespace: &str) -> Result<Vec<ImageStream>, ClientError> {
        let api: Api<ImageStream> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(classify_kube_error)?;
        Ok(list.items)
    }

    async fn get_image_stream(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ImageStream, ClientError> {
        let api: Api<ImageStream> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await.map_err(classify_kube_error)
    }

    async fn get_image_stream_tag(
        &self,
        namespace: &str,
        name: &str,
        tag: &str,
    ) -> Result<ImageStreamTag, ClientError> {
        // Image stream tags are served off the stream's latest status event
        // plus the stored image object.
        let is = self.get_image_stream(namespace, name).await?;
        let event = latest_tag_event(&is, tag).ok_or_else(|| {
            ClientError::NotFound(format!(
                "imagestreamtags {}/{}",
                namespace,
                join_image_stream_tag(name, tag)
            ))
        })?;

        let image = match self.get_image(&event.image).await {
            Ok(image) => Some(image),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };

        Ok(ImageStreamTag {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(join_image_stream_tag(name, tag)),
                ..Default::default()
            },
            tag: is.spec.tags.get(tag).cloned(),
            image,
        })
    }

    async fn get_image(&self, digest: &str) -> Result<Image, ClientError> {
        let api: Api<Image> = Api::all(self.client.clone());
        api.get(digest).await.map_err(classify_kube_error)
    }

    async fn list_limit_ranges(&self, namespace: &str) -> Result<Vec<LimitRange>, ClientError> {
        let api: Api<LimitRange> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(classify_kube_error)?;
        Ok(list.items)
    }

    async fn list_resource_quotas(
        &self,
        namespace: &str,
    ) -> Result<Vec<ResourceQuota>, ClientError> {
        let api: Api<ResourceQuota> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(classify_kube_error)?;
        Ok(list.items)
    }
}

fn classify_kube_error(err: kube::Error) -> ClientError {
    match err {
        kube::Error::Api(response) if response.code == 404 => {
            ClientError::NotFound(response.message)
        }
        kube::Error::Api(response) if response.code == 403 => {
            ClientError::Forbidden(response.message)
        }
        other => ClientError::Other(other.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    #[test]
    fn test_classify_kube_error() {
        let not_found = classify_kube_error(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "imagestreams \"is\" not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        }));
        assert!(not_found.is_not_found());

        let forbidden = classify_kube_error(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "cannot list resourcequotas".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        }));
        assert!(forbidden.is_forbidden());

        let other = classify_kube_error(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "conflict".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        }));
        assert!(!other.is_not_found() && !other.is_forbidden());
    }
}
