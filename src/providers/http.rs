//! JSON REST control plane
//!
//! ```text
//! POST   {endpoint}/resources        {type, logical_name, properties, idempotency_token}
//! GET    {endpoint}/resources/{id}
//! PUT    {endpoint}/resources/{id}   {properties}
//! DELETE {endpoint}/resources/{id}
//! ```
//!
//! Create, read and update answer with `{id?, attributes}`. The server is
//! expected to honour `Idempotency-Key` on create.

use super::catalog;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reconcile::{
    Attributes, CreateRequest, Created, Properties, Provider, ProviderError, UpdateBehavior,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Connection shared by every per-type provider
pub struct HttpClient {
    agent: ureq::Agent,
    endpoint: String,
    token: Option<String>,
}

impl HttpClient {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self::with_agent(ureq::Agent::new_with_defaults(), endpoint, token)
    }

    pub fn with_agent(agent: ureq::Agent, endpoint: impl Into<String>, token: Option<String>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            agent,
            endpoint,
            token,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, id: Option<&str>) -> String {
        match id {
            Some(id) => format!(
                "{}/resources/{}",
                self.endpoint,
                utf8_percent_encode(id, SEGMENT)
            ),
            None => format!("{}/resources", self.endpoint),
        }
    }

    fn authorize<B>(&self, request: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        let request = request
            .header("Accept", "application/json")
            .header("User-Agent", concat!("cairn/", env!("CARGO_PKG_VERSION")));
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }
}

#[derive(Serialize)]
struct CreateBody<'a> {
    #[serde(rename = "type")]
    resource_type: &'a str,
    logical_name: &'a str,
    properties: &'a Properties,
    idempotency_token: &'a str,
}

#[derive(Serialize)]
struct UpdateBody<'a> {
    properties: &'a Properties,
}

#[derive(Deserialize)]
struct ResourceBody {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    attributes: Attributes,
}

/// Map an HTTP status to a provider error
pub fn status_error(status: u16, subject: &str) -> ProviderError {
    let message = format!("HTTP {status} for {subject}");
    match status {
        404 | 410 => ProviderError::NotFound(message),
        408 => ProviderError::Timeout(message),
        429 => ProviderError::Throttled(message),
        401 | 403 => ProviderError::Permission(message),
        409 | 412 => ProviderError::Conflict(message),
        500..=599 => ProviderError::Unavailable(message),
        _ => ProviderError::Validation(message),
    }
}

fn call_error(err: ureq::Error, subject: &str) -> ProviderError {
    match err {
        ureq::Error::StatusCode(status) => status_error(status, subject),
        ureq::Error::Timeout(_) => ProviderError::Timeout(format!("{subject}: {err}")),
        other => ProviderError::Unavailable(format!("{subject}: {other}")),
    }
}

/// Everything but RFC 3986 unreserved characters; ids may be ARNs
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Provider for one resource type backed by [`HttpClient`]
pub struct HttpProvider {
    client: Arc<HttpClient>,
    resource_type: String,
}

impl HttpProvider {
    pub fn new(client: Arc<HttpClient>, resource_type: impl Into<String>) -> Self {
        Self {
            client,
            resource_type: resource_type.into(),
        }
    }
}

impl Provider for HttpProvider {
    fn create(&self, request: &CreateRequest) -> Result<Created, ProviderError> {
        let subject = format!("create {}", request.logical_name);
        let body = CreateBody {
            resource_type: &self.resource_type,
            logical_name: &request.logical_name,
            properties: &request.properties,
            idempotency_token: &request.idempotency_token,
        };
        let response: ResourceBody = self
            .client
            .authorize(self.client.agent.post(self.client.url(None)))
            .header("Idempotency-Key", request.idempotency_token.as_str())
            .send_json(&body)
            .map_err(|e| call_error(e, &subject))?
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Unavailable(format!("{subject}: {e}")))?;

        let external_id = response.id.ok_or_else(|| {
            ProviderError::Unavailable(format!("{subject}: response carried no id"))
        })?;
        log::debug!("POST created {external_id} for {}", request.logical_name);
        Ok(Created {
            external_id,
            attributes: response.attributes,
        })
    }

    fn read(&self, external_id: &str) -> Result<Attributes, ProviderError> {
        let subject = format!("read {external_id}");
        let response: ResourceBody = self
            .client
            .authorize(self.client.agent.get(self.client.url(Some(external_id))))
            .call()
            .map_err(|e| call_error(e, &subject))?
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Unavailable(format!("{subject}: {e}")))?;
        Ok(response.attributes)
    }

    fn update(&self, external_id: &str, properties: &Properties) -> Result<Attributes, ProviderError> {
        let subject = format!("update {external_id}");
        let response: ResourceBody = self
            .client
            .authorize(self.client.agent.put(self.client.url(Some(external_id))))
            .send_json(&UpdateBody { properties })
            .map_err(|e| call_error(e, &subject))?
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Unavailable(format!("{subject}: {e}")))?;
        Ok(response.attributes)
    }

    fn delete(&self, external_id: &str) -> Result<(), ProviderError> {
        let subject = format!("delete {external_id}");
        self.client
            .authorize(self.client.agent.delete(self.client.url(Some(external_id))))
            .call()
            .map_err(|e| call_error(e, &subject))?;
        Ok(())
    }

    fn update_behavior(&self, property: &str) -> UpdateBehavior {
        match catalog::find(&self.resource_type) {
            Some(spec) if spec.requires_replacement(property) => UpdateBehavior::Replace,
            _ => UpdateBehavior::InPlace,
        }
    }
}
