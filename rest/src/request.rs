use crate::{Result, Route};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

/// A request to the API, relative to the dispatcher's base url.
#[derive(Clone, Debug)]
pub struct Request {
    pub(crate) route: Route,
    pub(crate) body: Option<Vec<u8>>,
    pub(crate) reason: Option<String>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            route: Route::new(method, path),
            body: None,
            reason: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_vec(body)?);
        Ok(self)
    }

    /// Appends query parameters to the path. They do not affect bucketing.
    pub fn query<'a, I>(self, params: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();

        if query.is_empty() {
            return self;
        }

        let path = self.route.path();
        let separator = if path.contains('?') { '&' } else { '?' };
        let path = format!("{path}{separator}{query}");

        Self {
            route: Route::new(self.route.method().clone(), path),
            ..self
        }
    }

    /// Sets the audit log reason.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn route(&self) -> &Route {
        &self.route
    }
}

/// Fully built request handed to a [`Transport`](crate::Transport). Retries
/// resend the same value.
#[derive(Clone, Debug)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }
}

/// Successful response to a dispatched request.
#[derive(Clone, Debug)]
pub struct Response {
    raw: RawResponse,
}

impl Response {
    pub(crate) fn new(raw: RawResponse) -> Self {
        Self { raw }
    }

    pub fn status(&self) -> StatusCode {
        self.raw.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.raw.headers
    }

    pub fn bytes(&self) -> &[u8] {
        &self.raw.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let body: &[u8] = if self.raw.body.is_empty() {
            b"null"
        } else {
            &self.raw.body
        };

        Ok(serde_json::from_slice(body)?)
    }

    pub fn into_raw(self) -> RawResponse {
        self.raw
    }
}

/// Error body returned alongside 4xx responses.
#[derive(Deserialize, Debug, Default)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiErrorBody {
    pub(crate) fn parse(status: StatusCode, body: &[u8]) -> (Option<u64>, String) {
        match serde_json::from_slice::<ApiErrorBody>(body) {
            Ok(parsed) => (
                parsed.code,
                parsed
                    .message
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or_default().to_owned()),
            ),
            Err(_) => (None, String::from_utf8_lossy(body).into_owned()),
        }
    }
}
