use async_trait::async_trait;
use reqwest::{Client, Url};
use std::collections::BTreeMap;
use std::error::Error as _;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::error::{TransportError, TransportErrorKind};

pub type HeaderMap = BTreeMap<String, String>;
pub type CookieJar = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub cookies: CookieJar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    /// Raw response headers; names are lower-cased and may repeat.
    pub headers: Vec<(String, String)>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `name=value` pairs from every `Set-Cookie` header.
    pub fn set_cookies(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("set-cookie"))
            .filter_map(|(_, value)| {
                let pair = value.split(';').next()?;
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.trim().to_string()))
            })
    }
}

/// Static headers and cookies injected into outgoing requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub headers: HeaderMap,
    pub cookies: CookieJar,
}

impl RequestContext {
    pub fn new(headers: HeaderMap, cookies: CookieJar) -> Self {
        Self { headers, cookies }
    }

    pub fn request(&self, url: Url) -> FetchRequest {
        FetchRequest {
            url,
            headers: self.headers.clone(),
            cookies: self.cookies.clone(),
        }
    }

    /// Context for the request following `resp`: cookies set by the response
    /// override ours, headers stay as configured.
    pub fn carry_forward(&self, resp: &FetchResponse) -> RequestContext {
        let mut next = self.clone();
        for (name, value) in resp.set_cookies() {
            next.cookies.insert(name, value);
        }
        next
    }
}

/// The transport collaborator. Retries and backoff are its business, not the
/// caller's.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse, TransportError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetcher").finish_non_exhaustive()
    }
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| TransportError::new(TransportErrorKind::Other, e.to_string()))?;
        Ok(Self { http })
    }

    pub fn build_request(&self, req: &FetchRequest) -> Result<reqwest::Request, TransportError> {
        let mut builder = self.http.get(req.url.clone());
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(cookie) = cookie_header(&req.cookies) {
            builder = builder.header("cookie", cookie);
        }
        builder.build().map_err(classify)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse, TransportError> {
        let request = self.build_request(req)?;
        debug!(url = %request.url(), "GET");
        let res = self.http.execute(request).await.map_err(classify)?;

        let status = res.status().as_u16();
        let headers = res
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = res.text().await.map_err(classify)?;
        Ok(FetchResponse {
            status,
            body,
            headers,
        })
    }
}

/// `k=v; k2=v2`, or nothing for an empty jar.
pub fn cookie_header(cookies: &CookieJar) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

fn classify(err: reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() && mentions_dns(&err) {
        TransportErrorKind::Dns
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, err.to_string())
}

fn mentions_dns(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        let msg = e.to_string().to_ascii_lowercase();
        if msg.contains("dns") || msg.contains("lookup address") || msg.contains("resolve") {
            return true;
        }
        source = e.source();
    }
    false
}
