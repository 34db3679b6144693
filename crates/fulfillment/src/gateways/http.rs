//! JSON-over-HTTP plumbing shared by the module clients.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::GatewayError;

/// Connection settings for one external module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Sent as a bearer token when present.
    pub token: Option<String>,
    pub timeout: Duration,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Error body shapes the modules answer with.
#[derive(serde::Deserialize)]
struct ErrorBody {
    #[serde(alias = "message", alias = "erro")]
    error: String,
}

/// Thin reqwest wrapper bound to one module's base URL.
#[derive(Debug, Clone)]
pub(crate) struct JsonClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    module: &'static str,
    timeout: Duration,
}

impl JsonClient {
    pub(crate) fn new(module: &'static str, config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable {
                module,
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            module,
            timeout: config.timeout,
        })
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let req = self.client.get(self.url(path)).query(query);
        let body = self.send(req, path).await?;
        self.decode(&body)
    }

    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let req = self.client.post(self.url(path)).json(body);
        let body = self.send(req, path).await?;
        self.decode(&body)
    }

    /// POSTs and ignores whatever body comes back.
    pub(crate) async fn post_ignoring_body<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), GatewayError> {
        let req = self.client.post(self.url(path)).json(body);
        self.send(req, path).await.map(|_| ())
    }

    /// PUTs and ignores whatever body comes back.
    pub(crate) async fn put_ignoring_body<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), GatewayError> {
        let req = self.client.put(self.url(path)).json(body);
        self.send(req, path).await.map(|_| ())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_header(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {}", t))
    }

    async fn send(&self, mut req: RequestBuilder, path: &str) -> Result<Vec<u8>, GatewayError> {
        if let Some(auth) = self.auth_header() {
            req = req.header(reqwest::header::AUTHORIZATION, auth);
        }

        let response = req.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        if status.is_success() {
            return Ok(body.to_vec());
        }

        let text = String::from_utf8_lossy(&body).into_owned();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or(text);
        tracing::debug!(module = self.module, %status, path, %message, "module returned an error");

        Err(match status {
            StatusCode::NOT_FOUND => GatewayError::NotFound {
                module: self.module,
                resource: path.to_string(),
            },
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
                GatewayError::Unavailable {
                    module: self.module,
                    message: format!("{status}: {message}"),
                }
            }
            _ => GatewayError::Rejected {
                module: self.module,
                status: status.as_u16(),
                message,
            },
        })
    }

    fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, GatewayError> {
        serde_json::from_slice(body).map_err(|e| GatewayError::Decode {
            module: self.module,
            message: e.to_string(),
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout {
                module: self.module,
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            GatewayError::Unavailable {
                module: self.module,
                message: e.to_string(),
            }
        }
    }
}

/// Deserializers for ids that modules send either as numbers or strings.
pub(crate) mod external_id {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    impl From<RawId> for String {
        fn from(raw: RawId) -> Self {
            match raw {
                RawId::Text(s) => s,
                RawId::Number(n) => n.to_string(),
            }
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        RawId::deserialize(d).map(String::from)
    }

    pub(crate) fn deserialize_option<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<String>, D::Error> {
        Ok(Option::<RawId>::deserialize(d)?.map(String::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize)]
    struct Doc {
        #[serde(deserialize_with = "external_id::deserialize")]
        id: String,
        #[serde(default, deserialize_with = "external_id::deserialize_option")]
        parent: Option<String>,
    }

    #[test]
    fn test_ids_accept_numbers_and_strings() {
        let doc: Doc = serde_json::from_str(r#"{"id": 42, "parent": "NF-9"}"#).unwrap();
        assert_eq!(doc.id, "42");
        assert_eq!(doc.parent.as_deref(), Some("NF-9"));

        let doc: Doc = serde_json::from_str(r#"{"id": "A-1", "parent": null}"#).unwrap();
        assert_eq!(doc.id, "A-1");
        assert!(doc.parent.is_none());

        let doc: Doc = serde_json::from_str(r#"{"id": "A-2"}"#).unwrap();
        assert!(doc.parent.is_none());
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let client = JsonClient::new("sales", &GatewayConfig::new("http://localhost:3003/")).unwrap();
        assert_eq!(client.base_url, "http://localhost:3003");
        assert_eq!(client.url("/api/vendas/pedidos/1"), "http://localhost:3003/api/vendas/pedidos/1");
    }
}
