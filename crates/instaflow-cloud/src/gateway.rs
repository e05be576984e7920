//! Remote gateway responses
//!
//! Gateways hand back the raw status code and body of each call; the
//! reconcilers only branch on the status class.

use crate::error::{CloudError, Result};
use serde::de::DeserializeOwned;

/// How the reconcilers interpret a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    NotFound,
    Other,
}

impl StatusClass {
    pub fn from_code(status: u16) -> Self {
        match status {
            200..=299 => StatusClass::Success,
            404 => StatusClass::NotFound,
            _ => StatusClass::Other,
        }
    }
}

/// Outcome of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Deleted,
    AlreadyAbsent,
}

/// Status and body of one gateway call.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: String,
}

impl GatewayResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn class(&self) -> StatusClass {
        StatusClass::from_code(self.status)
    }

    /// Body of a successful response; any other status is an error.
    pub fn into_success(self, operation: &str) -> Result<String> {
        match self.class() {
            StatusClass::Success => Ok(self.body),
            _ => Err(CloudError::gateway(operation, self.status, self.body)),
        }
    }

    /// Body of a successful response, `None` when the resource is missing.
    pub fn into_found(self, operation: &str) -> Result<Option<String>> {
        match self.class() {
            StatusClass::Success => Ok(Some(self.body)),
            StatusClass::NotFound => Ok(None),
            StatusClass::Other => Err(CloudError::gateway(operation, self.status, self.body)),
        }
    }

    /// Interpret the response to a delete call; a missing resource counts
    /// as already removed.
    pub fn into_removal(self, operation: &str) -> Result<Removal> {
        match self.class() {
            StatusClass::Success => Ok(Removal::Deleted),
            StatusClass::NotFound => Ok(Removal::AlreadyAbsent),
            StatusClass::Other => Err(CloudError::gateway(operation, self.status, self.body)),
        }
    }

    /// Decode a successful JSON response.
    pub fn json<T: DeserializeOwned>(self, operation: &str) -> Result<T> {
        let body = self.into_success(operation)?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Decode a JSON response, `None` when the resource is missing.
    pub fn json_if_found<T: DeserializeOwned>(self, operation: &str) -> Result<Option<T>> {
        match self.into_found(operation)? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Created {
        id: String,
    }

    #[test]
    fn test_status_class() {
        assert_eq!(StatusClass::from_code(200), StatusClass::Success);
        assert_eq!(StatusClass::from_code(202), StatusClass::Success);
        assert_eq!(StatusClass::from_code(404), StatusClass::NotFound);
        assert_eq!(StatusClass::from_code(400), StatusClass::Other);
        assert_eq!(StatusClass::from_code(500), StatusClass::Other);
    }

    #[test]
    fn test_gateway_error_keeps_status_and_body() {
        let err = GatewayResponse::new(500, "boom")
            .into_success("Create cluster")
            .unwrap_err();
        match err {
            CloudError::Gateway {
                operation,
                status,
                body,
            } => {
                assert_eq!(operation, "Create cluster");
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Gateway error, got {other:?}"),
        }
    }

    #[test]
    fn test_not_found_is_a_signal() {
        let found = GatewayResponse::new(404, "")
            .json_if_found::<Created>("Get cluster")
            .unwrap();
        assert!(found.is_none());

        let removal = GatewayResponse::new(404, "").into_removal("Delete cluster").unwrap();
        assert_eq!(removal, Removal::AlreadyAbsent);
    }

    #[test]
    fn test_not_found_on_create_is_an_error() {
        let err = GatewayResponse::new(404, "no such datacenter")
            .json::<Created>("Create peering")
            .unwrap_err();
        assert!(matches!(err, CloudError::Gateway { status: 404, .. }));
    }

    #[test]
    fn test_json_decoding() {
        let created: Created = GatewayResponse::new(202, r#"{"id":"X123"}"#)
            .json("Create cluster")
            .unwrap();
        assert_eq!(created, Created { id: "X123".to_string() });
    }
}
