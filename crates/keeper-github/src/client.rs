//! Installation-scoped GitHub API client

use crate::cache::{response_key, token_key, CacheValue, CachedResponse, SharedCache};
use crate::{AppIdentity, GitHubError, InstallationToken, RateLimit, Result};
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::header::{
    HeaderMap, ACCEPT, AUTHORIZATION, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

const MEDIA_TYPE: &str = "application/vnd.github+json";
const API_VERSION_HEADER: &str = "x-github-api-version";
const API_VERSION: &str = "2022-11-28";

#[derive(Deserialize)]
struct GraphQlResponse<D> {
    data: Option<D>,
    #[serde(default)]
    errors: Vec<GraphQlMessage>,
}

#[derive(Deserialize)]
struct GraphQlMessage {
    message: String,
}

/// Client acting as one App installation over one network session.
///
/// The installation token is fetched on first use and then served from the
/// shared cache until it is about to expire.
#[derive(Debug)]
pub struct GitHubClient {
    session: Client,
    identity: AppIdentity,
    installation_id: u64,
    cache: SharedCache,
    rate_limit: Mutex<Option<RateLimit>>,
}

impl GitHubClient {
    pub fn new(
        installation_id: u64,
        session: Client,
        identity: AppIdentity,
        cache: SharedCache,
    ) -> Self {
        Self {
            session,
            identity,
            installation_id,
            cache,
            rate_limit: Mutex::new(None),
        }
    }

    pub fn installation_id(&self) -> u64 {
        self.installation_id
    }

    /// `owner/name` of the repository this App maintains
    pub fn repository(&self) -> &str {
        self.identity.repository()
    }

    /// Quota snapshot from the last API response, if any call was made
    pub fn rate_limit(&self) -> Option<RateLimit> {
        *self.rate_limit.lock()
    }

    /// API path below the configured repository, e.g. `repo_path("issues")`
    pub fn repo_path(&self, suffix: &str) -> String {
        let suffix = suffix.trim_start_matches('/');
        if suffix.is_empty() {
            format!("repos/{}", self.repository())
        } else {
            format!("repos/{}/{}", self.repository(), suffix)
        }
    }

    /// Current installation access token, minting a new one when needed
    #[instrument(skip(self), fields(installation_id = self.installation_id))]
    pub async fn access_token(&self) -> Result<Secret<String>> {
        let key = token_key(self.installation_id);
        if let Some(CacheValue::Token(token)) = self.cache.get(&key) {
            if token.is_fresh(Utc::now()) {
                return Ok(token.token);
            }
            debug!(expires_at = %token.expires_at, "Installation token expired");
        }

        let jwt = self.identity.credentials().jwt(Utc::now())?;
        let url = self.url(&format!(
            "app/installations/{}/access_tokens",
            self.installation_id
        ))?;

        let response = self
            .session
            .post(url)
            .bearer_auth(jwt)
            .header(ACCEPT, MEDIA_TYPE)
            .header(API_VERSION_HEADER, API_VERSION)
            .send()
            .await?;

        self.record_rate_limit(response.headers());
        let body = self.finish(response).await?;
        let token: InstallationToken = serde_json::from_slice(&body)?;
        debug!(expires_at = %token.expires_at, "Minted installation token");

        let secret = token.token.clone();
        self.cache.put(key, CacheValue::Token(token));
        Ok(secret)
    }

    /// GET with conditional revalidation against the shared cache
    #[instrument(skip(self), fields(installation_id = self.installation_id))]
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        let key = response_key(self.installation_id, url.as_str());
        let cached = match self.cache.get(&key) {
            Some(CacheValue::Response(cached)) => Some(cached),
            _ => None,
        };

        let mut request = self.authorized(self.session.get(url)).await?;
        if let Some(cached) = &cached {
            if let Some(etag) = &cached.etag {
                request = request.header(IF_NONE_MATCH, etag.as_str());
            }
            if let Some(last_modified) = &cached.last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified.as_str());
            }
        }

        let response = request.send().await?;
        self.record_rate_limit(response.headers());

        if response.status() == StatusCode::NOT_MODIFIED {
            if let Some(cached) = cached {
                debug!("Serving cached response");
                return decode(&cached.body);
            }
        }

        let entry_headers = (
            header_string(response.headers(), ETAG.as_str()),
            header_string(response.headers(), LAST_MODIFIED.as_str()),
        );
        let body = self.finish(response).await?;

        let entry = CachedResponse {
            etag: entry_headers.0,
            last_modified: entry_headers.1,
            body: Arc::from(body.as_slice()),
        };
        if entry.is_revalidatable() {
            self.cache.put(key, CacheValue::Response(entry));
        }

        decode(&body)
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::POST, path, Some(body)).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::PATCH, path, Some(body)).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send::<Value, Value>(Method::DELETE, path, None)
            .await
            .map(|_| ())
    }

    /// Run a GraphQL query; any entry in `errors` fails the call.
    #[instrument(skip(self, query, variables), fields(installation_id = self.installation_id))]
    pub async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let request = json!({ "query": query, "variables": variables });
        let response: GraphQlResponse<T> = self.send(Method::POST, "graphql", Some(&request)).await?;

        if !response.errors.is_empty() {
            let messages: Vec<_> = response.errors.into_iter().map(|e| e.message).collect();
            return Err(GitHubError::GraphQl(messages.join("; ")));
        }

        response
            .data
            .ok_or_else(|| GitHubError::GraphQl("response carried no data".to_string()))
    }

    async fn send<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.url(path)?;
        debug!(%method, %url, "GitHub request");

        let mut request = self.authorized(self.session.request(method, url)).await?;
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        self.record_rate_limit(response.headers());

        let body = self.finish(response).await?;
        decode(&body)
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.access_token().await?;
        Ok(request
            .header(AUTHORIZATION, format!("token {}", token.expose_secret()))
            .header(ACCEPT, MEDIA_TYPE)
            .header(API_VERSION_HEADER, API_VERSION))
    }

    /// Absolute URLs are used as given; anything else is relative to the API root.
    fn url(&self, path: &str) -> Result<Url> {
        if path.starts_with("https://") || path.starts_with("http://") {
            return Ok(Url::parse(path)?);
        }
        Ok(self.identity.base_url().join(path.trim_start_matches('/'))?)
    }

    fn record_rate_limit(&self, headers: &HeaderMap) {
        if let Some(rate_limit) = RateLimit::from_headers(headers) {
            *self.rate_limit.lock() = Some(rate_limit);
        }
    }

    /// Read the body of a response, turning error statuses into errors
    async fn finish(&self, response: Response) -> Result<Vec<u8>> {
        let status = response.status();
        let rate_limit = RateLimit::from_headers(response.headers());
        let body = response.bytes().await?.to_vec();

        if status.is_success() {
            Ok(body)
        } else {
            Err(error_from(status, rate_limit, &body))
        }
    }
}

fn error_from(status: StatusCode, rate_limit: Option<RateLimit>, body: &[u8]) -> GitHubError {
    let message = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("message")?.as_str().map(String::from))
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());

    match status {
        StatusCode::UNAUTHORIZED => GitHubError::Auth(message),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
            if rate_limit.map_or(false, |r| r.is_exhausted()) =>
        {
            GitHubError::RateLimited {
                reset_at: rate_limit.map(|r| r.reset_at),
            }
        }
        _ => GitHubError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

/// An empty body decodes as JSON `null`.
fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_value(Value::Null)?);
    }
    Ok(serde_json::from_slice(body)?)
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(String::from)
}
