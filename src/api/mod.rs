//! HTTP client for the Squadcast REST (v3) and GraphQL APIs.

mod graphql;
mod rotations;
mod schedules;
mod webforms;

pub use graphql::{Operation, OperationKind};
pub use rotations::{
    CustomPeriod, Participant, ParticipantGroup, Rotation, RotationInput, Timeslot,
};
pub use schedules::{
    OwnerRef, Schedule, ScheduleInput, ScheduleOwner, ScheduleRequest, ScheduleTag, ScheduleV2,
};
pub use webforms::{Webform, WebformRequest, WebformService, WebformServiceRef, WebformSeverity};

use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::ProviderError;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("hemmer-provider-squadcast/", env!("CARGO_PKG_VERSION"));

/// Authenticated Squadcast API client.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    api_base: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    meta: ErrorMeta,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorMeta {
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
}

impl Client {
    /// Exchange the configured refresh token for an access token.
    pub async fn connect(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        let url = format!("{}/oauth/access-token", config.auth_base_url());
        debug!(region = %config.region, "Requesting Squadcast access token");
        let response = http
            .get(&url)
            .header("X-Refresh-Token", &config.refresh_token)
            .send()
            .await?;
        let token: AccessToken = parse_envelope(response).await?;

        if let Some(kind) = token.token_type.as_deref() {
            if !kind.eq_ignore_ascii_case("bearer") {
                warn!(token_type = kind, "Unexpected access token type");
            }
        }

        Ok(Self {
            http,
            api_base: config.api_base_url(),
            access_token: token.access_token,
        })
    }

    /// Build a client around an access token that was obtained elsewhere.
    pub fn with_access_token(
        config: &ProviderConfig,
        access_token: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            api_base: config.api_base_url(),
            access_token: access_token.into(),
        })
    }

    fn v3(&self, path: &str) -> String {
        format!("{}/v3{}", self.api_base, path)
    }

    fn authorized(&self, method: Method, path: &str, query: &[(&str, &str)]) -> RequestBuilder {
        self.http
            .request(method, self.v3(path))
            .bearer_auth(&self.access_token)
            .query(query)
    }

    /// Send a REST request and unwrap the `data` envelope of the response.
    pub(crate) async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T, ProviderError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(%method, path, "Squadcast API request");
        let mut builder = self.authorized(method, path, query);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        parse_envelope(builder.send().await?).await
    }

    /// Send a REST request whose response body is not needed.
    pub(crate) async fn request_unit<B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<(), ProviderError>
    where
        B: Serialize + ?Sized,
    {
        debug!(%method, path, "Squadcast API request");
        let mut builder = self.authorized(method, path, query);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(status_error(status.as_u16(), &text))
    }

    /// Run a GraphQL operation and deserialize its top-level field.
    pub(crate) async fn graphql<T: DeserializeOwned>(
        &self,
        operation: &Operation,
    ) -> Result<T, ProviderError> {
        debug!(field = operation.field(), "Squadcast GraphQL request");
        let response = self
            .authorized(Method::POST, "/graphql", &[])
            .json(&operation.body())
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), &text));
        }
        graphql::extract(operation, &text)
    }
}

async fn parse_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(status_error(status.as_u16(), &text));
    }
    let envelope: Envelope<T> = serde_json::from_str(&text)?;
    Ok(envelope.data)
}

fn status_error(status: u16, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.meta.error_message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("request failed with status {}", status)
            } else {
                body.trim().to_string()
            }
        });
    warn!(status, message = %message, "Squadcast API returned an error");
    ProviderError::from_status(status, message)
}

/// Deserialize `null` as the type's default value.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse a numeric platform identifier kept as a string in state.
pub fn parse_numeric_id(kind: &str, id: &str) -> Result<i64, ProviderError> {
    id.trim().parse::<i64>().map_err(|_| {
        ProviderError::Validation(format!("{} id '{}' is not a valid integer", kind, id))
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::{client_for, config_for};
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_connect_exchanges_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/access-token"))
            .and(header("X-Refresh-Token", "test-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"access_token": "abc", "token_type": "Bearer", "expires_at": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/schedules"))
            .and(header("Authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::connect(&config_for(&server)).await.unwrap();
        let schedules: Vec<Schedule> = client
            .request::<(), _>(Method::GET, "/schedules", &[], None)
            .await
            .unwrap();
        assert!(schedules.is_empty());
    }

    #[tokio::test]
    async fn test_connect_rejected_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/access-token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "meta": {"status": 401, "error_message": "invalid refresh token"}
            })))
            .mount(&server)
            .await;

        let err = Client::connect(&config_for(&server)).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::PermissionDenied(ref m) if m == "invalid refresh token"
        ));
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "meta": {"status": 404, "error_message": "webform not found"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/broken"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .request::<(), Value>(Method::GET, "/missing", &[], None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.message(), "webform not found");

        let err = client
            .request::<(), Value>(Method::GET, "/broken", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(ref m) if m == "bad gateway"));
    }

    #[tokio::test]
    async fn test_request_sends_query_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/things"))
            .and(query_param("owner_id", "team-1"))
            .and(body_partial_json(json!({"name": "x"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"data": {"ok": true}})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v3/things/1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let created: Value = client
            .request(
                Method::POST,
                "/things",
                &[("owner_id", "team-1")],
                Some(&json!({"name": "x"})),
            )
            .await
            .unwrap();
        assert_eq!(created["ok"], true);

        tokio_test::assert_ok!(
            client
                .request_unit::<()>(Method::DELETE, "/things/1", &[], None)
                .await
        );
    }

    #[test]
    fn test_parse_numeric_id() {
        assert_eq!(parse_numeric_id("schedule", "42").unwrap(), 42);
        let err = parse_numeric_id("schedule", "abc").unwrap_err();
        assert!(err.to_string().contains("schedule id 'abc'"));
    }

    #[test]
    fn test_nullable_collections() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(default, deserialize_with = "nullable")]
            items: Vec<String>,
        }
        let held: Holder = serde_json::from_value(json!({"items": null})).unwrap();
        assert!(held.items.is_empty());
        let held: Holder = serde_json::from_value(json!({})).unwrap();
        assert!(held.items.is_empty());
    }
}
