use thiserror::Error;

/// Part of the error message produced by the resource quota admission plugin
/// when a request would overflow a hard limit.
const QUOTA_EXCEEDED_MESSAGE: &str = "exceeded quota:";

/// Classified failure of an API server operation. The engine only ever needs
/// to distinguish "the object is not there", "we are not allowed to look" and
/// "something else went wrong", so the transport error is classified once at
/// the client boundary and handled uniformly afterwards.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, ClientError::Forbidden(_))
    }
}

/// Returns true if the given error stands for a denied request caused by
/// detected quota abuse. The admission plugin rejects such requests with a
/// forbidden error carrying a well-known message substring.
pub fn is_error_quota_exceeded(err: &ClientError) -> bool {
    match err {
        ClientError::Forbidden(reason) => {
            reason.to_lowercase().contains(QUOTA_EXCEEDED_MESSAGE)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_quota_exceeded_recognition() {
        for (name, err, should_match) in [
            (
                "unrelated error",
                ClientError::Other(anyhow!("unrelated")),
                false,
            ),
            (
                "right message, wrong class",
                ClientError::Other(anyhow!("{}", QUOTA_EXCEEDED_MESSAGE)),
                false,
            ),
            (
                "not found with the message",
                ClientError::NotFound(QUOTA_EXCEEDED_MESSAGE.to_string()),
                false,
            ),
            (
                "unrelated forbidden error",
                ClientError::Forbidden("unrelated".to_string()),
                false,
            ),
            (
                "quota exceeded error",
                ClientError::Forbidden(format!(
                    "imagestreams \"is\" is forbidden: {} imagequota.io/imagestreamimages=10",
                    QUOTA_EXCEEDED_MESSAGE
                )),
                true,
            ),
            (
                "case insensitive match",
                ClientError::Forbidden("Exceeded Quota: too many".to_string()),
                true,
            ),
        ] {
            assert_eq!(
                is_error_quota_exceeded(&err),
                should_match,
                "unexpected result for case {:?}",
                name
            );
        }
    }
}
