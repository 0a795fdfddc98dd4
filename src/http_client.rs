use std::thread;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::error::{AuthError, Result};

const MAX_REDIRECTS: usize = 5;
const DEFAULT_RETRIES: u32 = 5;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Body>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            body: Some(Body::Json(body)),
        }
    }

    pub fn post_form<K, V>(url: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: Some(Body::Form(
                fields
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            )),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    #[cfg(test)]
    pub fn form_value(&self, name: &str) -> Option<&str> {
        match &self.body {
            Some(Body::Form(fields)) => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn json_body(&self) -> Option<&serde_json::Value> {
        match &self.body {
            Some(Body::Json(value)) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// URL the response was served from, after redirects.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            AuthError::protocol(format!(
                "invalid JSON from {} (status {}): {}",
                self.url, self.status, e
            ))
        })
    }

    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(AuthError::protocol(format!(
                "{} returned HTTP {}",
                self.url, self.status
            )))
        }
    }
}

pub trait Transport: Send + Sync {
    fn request(&self, request: HttpRequest) -> Result<HttpResponse>;
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
    retries: u32,
    backoff: Duration,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Self::with_retry(DEFAULT_RETRIES, DEFAULT_BACKOFF)
    }

    pub fn with_retry(retries: u32, backoff: Duration) -> Result<Self> {
        Ok(Self {
            client: create_http_client_with_redirects()?,
            retries,
            backoff,
        })
    }

    fn send_once(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, reqwest::Error> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            Some(Body::Json(value)) => builder.json(value),
            Some(Body::Form(fields)) => builder.form(fields),
            None => builder,
        };

        let response = builder.send()?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.text()?;

        Ok(HttpResponse {
            status,
            url,
            headers,
            body,
        })
    }
}

impl Transport for HttpTransport {
    fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut attempt = 0;
        loop {
            log::debug!("{} {}", request.method, request.url);
            match self.send_once(&request) {
                Ok(response) => {
                    log::debug!("{} {} -> {}", request.method, request.url, response.status);
                    return Ok(response);
                }
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.retries => {
                    attempt += 1;
                    log::warn!(
                        "request to {} failed ({}), retry {}/{}",
                        request.url,
                        e,
                        attempt,
                        self.retries
                    );
                    thread::sleep(self.backoff);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

pub fn create_http_client_with_redirects() -> Result<reqwest::blocking::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("aws-okta-auth/", env!("CARGO_PKG_VERSION"))),
    );
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

    let client = reqwest::blocking::Client::builder()
        .default_headers(headers)
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::custom(|attempt| {
            if attempt.previous().len() > MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else {
                attempt.follow()
            }
        }))
        .build()?;
    Ok(client)
}
