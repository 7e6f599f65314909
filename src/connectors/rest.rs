//! REST connector
//!
//! Stateless HTTP adapter. Statements are pseudo-SQL of the form
//! `"<METHOD> <path>"`, e.g. `GET /orders`; the first positional parameter is
//! sent as the JSON request body.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use url::Url;

use crate::connectors::dialect::Dialect;
use crate::connectors::trait_::{Connector, ConnectorError, QueryResult};

/// Upper bound on the error body echoed back in [`ConnectorError::Http`].
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Authentication applied to every request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestAuthMode {
    None,
    Basic,
    Bearer,
}

/// Connection parameters for REST data sources
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestParams {
    #[serde(alias = "url")]
    pub base_url: String,
    pub auth_mode: Option<RestAuthMode>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub timeout_ms: Option<u64>,
}

impl RestParams {
    /// Effective auth mode; basic when credentials are present and no mode is given.
    pub fn effective_auth_mode(&self) -> RestAuthMode {
        match self.auth_mode {
            Some(mode) => mode,
            None if self.username.is_some() && self.password.is_some() => RestAuthMode::Basic,
            None => RestAuthMode::None,
        }
    }
}

#[derive(Clone)]
enum Auth {
    None,
    Basic { username: String, password: String },
    Bearer(String),
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Basic { username, .. } => write!(f, "Basic({}:***)", username),
            Auth::Bearer(_) => f.write_str("Bearer(***)"),
        }
    }
}

/// Connector over an HTTP JSON API
#[derive(Debug, Clone)]
pub struct RestConnector {
    client: reqwest::Client,
    base_url: Url,
    auth: Auth,
}

impl RestConnector {
    /// Build a connector. `default_timeout` applies when the params carry none.
    pub fn new(params: &RestParams, default_timeout: Duration) -> Result<Self, ConnectorError> {
        let base_url = Url::parse(&params.base_url).map_err(|e| ConnectorError::Configuration {
            details: format!("invalid baseUrl '{}': {}", params.base_url, e),
        })?;

        let auth = match params.effective_auth_mode() {
            RestAuthMode::None => Auth::None,
            RestAuthMode::Basic => match (&params.username, &params.password) {
                (Some(username), Some(password)) => Auth::Basic {
                    username: username.clone(),
                    password: password.clone(),
                },
                _ => {
                    return Err(ConnectorError::Configuration {
                        details: "basic auth requires username and password".to_string(),
                    });
                }
            },
            RestAuthMode::Bearer => match &params.token {
                Some(token) => Auth::Bearer(token.clone()),
                None => {
                    return Err(ConnectorError::Configuration {
                        details: "bearer auth requires token".to_string(),
                    });
                }
            },
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &params.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ConnectorError::Configuration {
                    details: format!("invalid header name '{}': {}", name, e),
                }
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| ConnectorError::Configuration {
                details: format!("invalid value for header '{}': {}", name, e),
            })?;
            headers.insert(name, value);
        }

        let timeout = params
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default_timeout);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::Configuration {
                details: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    fn resolve_url(&self, path: &str) -> Result<Url, ConnectorError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path).map_err(|e| ConnectorError::Query {
                backend: "rest",
                details: format!("invalid url '{}': {}", path, e),
            });
        }

        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| ConnectorError::Query {
            backend: "rest",
            details: format!("invalid path '{}': {}", path, e),
        })
    }
}

/// Split `"<METHOD> <path>"` into its parts.
pub(crate) fn parse_statement(statement: &str) -> Result<(Method, &str), ConnectorError> {
    let mut tokens = statement.split_whitespace();
    let (Some(method), Some(path), None) = (tokens.next(), tokens.next(), tokens.next()) else {
        return Err(ConnectorError::Query {
            backend: "rest",
            details: format!("expected '<METHOD> <path>', got '{}'", statement),
        });
    };

    let method = match method.to_ascii_uppercase().as_str() {
        "GET" => Method::GET,
        "POST" => Method::POST,
        "PUT" => Method::PUT,
        "PATCH" => Method::PATCH,
        "DELETE" => Method::DELETE,
        "HEAD" => Method::HEAD,
        other => {
            return Err(ConnectorError::Query {
                backend: "rest",
                details: format!("unsupported HTTP method '{}'", other),
            });
        }
    };

    Ok((method, path))
}

#[async_trait]
impl Connector for RestConnector {
    async fn connect(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn query(
        &self,
        statement: &str,
        params: &[JsonValue],
    ) -> Result<QueryResult, ConnectorError> {
        let (method, path) = parse_statement(statement)?;
        let url = self.resolve_url(path)?;
        debug!(method = %method, url = %url, "Issuing REST request");

        let body = params.first().cloned().unwrap_or_else(|| JsonValue::Object(Default::default()));
        let mut request = self.client.request(method, url).json(&body);
        request = match &self.auth {
            Auth::None => request,
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
            Auth::Bearer(token) => request.bearer_auth(token),
        };

        let response = request.send().await.map_err(|e| ConnectorError::Network {
            details: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ConnectorError::Network {
            details: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(http_error(status, &text));
        }

        if text.trim().is_empty() {
            return Ok(QueryResult::default());
        }

        let payload: JsonValue = serde_json::from_str(&text).map_err(|e| ConnectorError::Query {
            backend: "rest",
            details: format!("invalid JSON response: {}", e),
        })?;

        let rows = match payload {
            JsonValue::Array(items) => items,
            other => vec![other],
        };
        Ok(QueryResult::from_rows(rows))
    }

    async fn test(&self) -> bool {
        match self.query("GET /", &[]).await {
            Ok(_) => true,
            Err(err) => {
                warn!(base_url = %self.base_url, error = %err, "REST connection test failed");
                false
            }
        }
    }

    fn dialect(&self) -> Option<Dialect> {
        None
    }
}

fn http_error(status: StatusCode, body: &str) -> ConnectorError {
    let trimmed = body.trim();
    let body = if trimmed.is_empty() {
        status.canonical_reason().map(str::to_string)
    } else {
        Some(trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect())
    };
    ConnectorError::Http {
        status: status.as_u16(),
        body,
    }
}
