use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage::repository::{MinisterDirectory, StorageError};
use trust_core::model::{MinisterStatus, UserId};

use crate::error::MinisterRpcError;

#[derive(Clone, Debug, Deserialize)]
pub struct RpcMinisterConfig {
    /// Project URL of the hosted backend, e.g. `https://xyz.supabase.co`.
    pub base_url: String,
    /// Name of the remote procedure.
    #[serde(default = "default_function")]
    pub function: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_function() -> String {
    "get_minister_status".into()
}

/// Minister lookup over the backend's HTTP RPC endpoint.
///
/// Posts `{"user_id": ...}` to `<base_url>/rest/v1/rpc/<function>`.
#[derive(Clone)]
pub struct RpcMinisterDirectory {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct LookupRequest {
    user_id: UserId,
}

impl RpcMinisterDirectory {
    /// # Errors
    ///
    /// Returns `MinisterRpcError::InvalidEndpoint` for a blank base URL or
    /// function name.
    pub fn new(config: RpcMinisterConfig) -> Result<Self, MinisterRpcError> {
        let base = config.base_url.trim().trim_end_matches('/');
        let function = config.function.trim();
        if base.is_empty() || function.is_empty() {
            return Err(MinisterRpcError::InvalidEndpoint(format!(
                "{base}/rest/v1/rpc/{function}"
            )));
        }
        Ok(Self {
            client: Client::new(),
            endpoint: format!("{base}/rest/v1/rpc/{function}"),
            api_key: config
                .api_key
                .filter(|key| !key.trim().is_empty()),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn lookup(&self, user_id: UserId) -> Result<Option<MinisterStatus>, MinisterRpcError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&LookupRequest { user_id });
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(MinisterRpcError::HttpStatus(response.status()));
        }

        let body: Value = response.json().await?;
        decode_lookup(body).map_err(|e| MinisterRpcError::Decode(e.to_string()))
    }
}

/// Table-returning procedures answer with an array; scalar ones with an object.
fn decode_lookup(body: Value) -> Result<Option<MinisterStatus>, serde_json::Error> {
    let record = match body {
        Value::Null => return Ok(None),
        Value::Array(rows) => match rows.into_iter().next() {
            Some(row) => row,
            None => return Ok(None),
        },
        other => other,
    };
    serde_json::from_value(record).map(Some)
}

#[async_trait]
impl MinisterDirectory for RpcMinisterDirectory {
    async fn minister_status(
        &self,
        user_id: UserId,
    ) -> Result<Option<MinisterStatus>, StorageError> {
        self.lookup(user_id).await.map_err(|err| match err {
            MinisterRpcError::Decode(msg) => StorageError::Serialization(msg),
            other => StorageError::Connection(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_rest_rpc_endpoint() {
        let directory = RpcMinisterDirectory::new(RpcMinisterConfig {
            base_url: "https://project.example.co/".into(),
            function: default_function(),
            api_key: Some("  ".into()),
        })
        .unwrap();
        assert_eq!(
            directory.endpoint(),
            "https://project.example.co/rest/v1/rpc/get_minister_status"
        );
        assert!(directory.api_key.is_none());
    }

    #[test]
    fn rejects_blank_base_url() {
        assert!(
            RpcMinisterDirectory::new(RpcMinisterConfig {
                base_url: " ".into(),
                function: default_function(),
                api_key: None,
            })
            .is_err()
        );
    }

    #[test]
    fn decodes_object_array_and_empty_payloads() {
        let object = json!({"is_minister": true, "minister_name": "Rev. Jane", "certificate_url": null});
        let status = decode_lookup(object.clone()).unwrap().unwrap();
        assert_eq!(status.minister_name.as_deref(), Some("Rev. Jane"));

        assert_eq!(decode_lookup(json!([object])).unwrap(), Some(status));
        assert_eq!(decode_lookup(json!([])).unwrap(), None);
        assert_eq!(decode_lookup(Value::Null).unwrap(), None);
        assert!(decode_lookup(json!({"is_minister": "yes"})).is_err());
    }
}
