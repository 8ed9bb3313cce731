//! HTTP side channel used for the session cookie and token endpoints.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClientError, ClientResult};

/// Whether the shared cookie jar takes part in a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credentials {
    Include,
    Omit,
}

/// Redirect handling for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectPolicy {
    Follow,
    /// Return the 3xx response as-is.
    Manual,
}

/// A request handed to an [`HttpRequester`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub credentials: Credentials,
    pub redirect: RedirectPolicy,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            credentials: Credentials::Omit,
            redirect: RedirectPolicy::Follow,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Serialize `body` as JSON and set the content type.
    pub fn with_json<T: Serialize>(self, body: &T) -> ClientResult<Self> {
        let body = serde_json::to_string(body)?;
        let mut request = self.with_header("Content-Type", "application/json");
        request.body = Some(body);
        Ok(request)
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_redirect(mut self, redirect: RedirectPolicy) -> Self {
        self.redirect = redirect;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let status_text = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            status,
            status_text,
            body: body.into(),
        }
    }

    /// True for 2xx.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True for 3xx.
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Future returned by [`HttpRequester::request`].
pub type HttpFuture = Pin<Box<dyn Future<Output = ClientResult<HttpResponse>> + Send>>;

/// Performs HTTP requests on behalf of the client.
///
/// Implementations resolve with any status; only transport failures are errors.
pub trait HttpRequester: Send + Sync {
    fn request(&self, request: HttpRequest) -> HttpFuture;
}

/// Perform `request` and turn a non-2xx status into [`ClientError::Http`].
pub async fn fetch(http: &dyn HttpRequester, request: HttpRequest) -> ClientResult<HttpResponse> {
    let response = http.request(request).await?;
    if !response.ok() {
        return Err(ClientError::Http {
            status: response.status,
            message: response.status_text.clone(),
        });
    }
    Ok(response)
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`HttpRequester`] backed by `reqwest` with one shared cookie jar.
#[derive(Clone)]
pub struct ReqwestRequester {
    jar: Arc<Jar>,
    cookies_follow: Client,
    cookies_manual: Client,
    plain_follow: Client,
    plain_manual: Client,
}

impl ReqwestRequester {
    pub fn new() -> ClientResult<Self> {
        Self::with_jar(Arc::new(Jar::default()))
    }

    /// Build clients around an existing cookie jar.
    pub fn with_jar(jar: Arc<Jar>) -> ClientResult<Self> {
        let build = |cookies: bool, follow: bool| -> ClientResult<Client> {
            let policy = if follow {
                Policy::default()
            } else {
                Policy::none()
            };
            let mut builder = Client::builder()
                .redirect(policy)
                .connect_timeout(CONNECT_TIMEOUT);
            if cookies {
                builder = builder.cookie_provider(jar.clone());
            }
            Ok(builder.build()?)
        };

        Ok(Self {
            cookies_follow: build(true, true)?,
            cookies_manual: build(true, false)?,
            plain_follow: build(false, true)?,
            plain_manual: build(false, false)?,
            jar,
        })
    }

    pub fn jar(&self) -> Arc<Jar> {
        self.jar.clone()
    }

    fn client_for(&self, credentials: Credentials, redirect: RedirectPolicy) -> &Client {
        match (credentials, redirect) {
            (Credentials::Include, RedirectPolicy::Follow) => &self.cookies_follow,
            (Credentials::Include, RedirectPolicy::Manual) => &self.cookies_manual,
            (Credentials::Omit, RedirectPolicy::Follow) => &self.plain_follow,
            (Credentials::Omit, RedirectPolicy::Manual) => &self.plain_manual,
        }
    }
}

impl HttpRequester for ReqwestRequester {
    fn request(&self, request: HttpRequest) -> HttpFuture {
        let client = self
            .client_for(request.credentials, request.redirect)
            .clone();

        Box::pin(async move {
            let mut builder = client.request(request.method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await?;
            let status = response.status();
            let body = response.bytes().await?;

            Ok(HttpResponse {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body: body.to_vec(),
            })
        })
    }
}
