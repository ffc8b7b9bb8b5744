use crate::provider::ProviderError;

/// Extension methods for Kubernetes API errors.
pub(crate) trait ExtKubeApiError {
    fn is_not_found(&self) -> bool;
    fn is_conflict(&self) -> bool;
    fn is_invalid(&self) -> bool;
}

impl ExtKubeApiError for kube::Error {
    fn is_not_found(&self) -> bool {
        match self {
            kube::Error::Api(e) if e.code == 404 || e.code == 410 => true,
            _ => false,
        }
    }

    fn is_conflict(&self) -> bool {
        match self {
            // A failed `test` operation of a JSON patch is reported as 422.
            kube::Error::Api(e) if e.code == 409 || e.code == 422 => true,
            _ => false,
        }
    }

    fn is_invalid(&self) -> bool {
        match self {
            kube::Error::Api(e) if e.code == 400 => true,
            _ => false,
        }
    }
}

/// Errors of the object store (Kubernetes API) boundary.
#[derive(thiserror::Error, Debug)]
pub(crate) enum StoreError {
    /// The object does not exist (anymore).
    #[error("object not found")]
    NotFound,
    /// Optimistic concurrency check failed, the object was modified concurrently.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Kubernetes API error
    #[error("{0}")]
    KubeApi(kube::Error),
    /// Serialization errors
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
    /// The request was rejected as invalid.
    #[error("{0}")]
    Invalid(String),
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        if e.is_not_found() {
            StoreError::NotFound
        } else if e.is_conflict() {
            StoreError::Conflict(e.to_string())
        } else if e.is_invalid() {
            StoreError::Invalid(e.to_string())
        } else {
            StoreError::KubeApi(e)
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum ControllerError {
    /// Object store (Kubernetes API) error
    #[error("{0}")]
    Store(#[from] StoreError),
    /// Cloud provider error
    #[error("{0}")]
    Provider(#[from] ProviderError),
    /// A safety check refused to let the reconciliation proceed.
    #[error("{0}")]
    ReferenceCheck(String),
    /// Serialization errors
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
}

impl ControllerError {
    pub(crate) fn is_temporary(&self) -> bool {
        match self {
            ControllerError::Serde(_) => false,
            ControllerError::Store(StoreError::Serde(_) | StoreError::Invalid(_)) => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(
            serde_json::from_value(serde_json::json!({
                "status": "Failure",
                "message": "x",
                "reason": "x",
                "code": code,
            }))
            .unwrap(),
        )
    }

    #[test]
    fn classify_kube_errors() {
        assert!(matches!(StoreError::from(api_error(404)), StoreError::NotFound));
        assert!(matches!(StoreError::from(api_error(410)), StoreError::NotFound));
        assert!(matches!(
            StoreError::from(api_error(409)),
            StoreError::Conflict(_)
        ));
        assert!(matches!(
            StoreError::from(api_error(422)),
            StoreError::Conflict(_)
        ));
        assert!(matches!(
            StoreError::from(api_error(400)),
            StoreError::Invalid(_)
        ));
        assert!(matches!(
            StoreError::from(api_error(500)),
            StoreError::KubeApi(_)
        ));
    }

    #[test]
    fn temporary_errors() {
        assert!(ControllerError::Store(StoreError::Conflict("x".into())).is_temporary());
        assert!(!ControllerError::Store(StoreError::Invalid("x".into())).is_temporary());
    }
}
