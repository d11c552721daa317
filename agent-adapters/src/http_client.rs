//! Shared HTTP(S) transport for JSON and protobuf services.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::to_bytes;
use hyper::client::HttpConnector;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue, RETRY_AFTER};
use hyper::{Body, Client, Request, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use tokio::time::timeout;
use webpki_roots::TLS_SERVER_ROOTS;

use crate::traits::{AdapterError, AdapterResult};

type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

/// JSON-over-HTTP transport accepting both `http://` and `https://` targets.
#[derive(Clone)]
pub struct HttpTransport {
    client: HyperClient,
    timeout: Duration,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Builds a transport with rustls and the bundled web PKI roots.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let mut roots = RootCertStore::empty();
        roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                anchor.subject,
                anchor.spki,
                anchor.name_constraints,
            )
        }));

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let connector = HttpsConnector::from((http, Arc::new(config)));

        Self {
            client: Client::builder().build::<_, Body>(connector),
            timeout,
        }
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POSTs a JSON body and returns the raw response body on success.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Transport`] on connection failures or timeouts,
    /// [`AdapterError::RateLimited`] on `429`, and [`AdapterError::Response`]
    /// for any other non-success status.
    pub async fn post_json(
        &self,
        uri: &Uri,
        body: Vec<u8>,
        bearer: Option<&str>,
    ) -> AdapterResult<Vec<u8>> {
        self.post(uri, "application/json", body, bearer).await
    }

    /// POSTs `body` with the given content type and returns the raw response
    /// body on success.
    ///
    /// # Errors
    ///
    /// Fails like [`HttpTransport::post_json`].
    pub async fn post(
        &self,
        uri: &Uri,
        content_type: &str,
        body: Vec<u8>,
        bearer: Option<&str>,
    ) -> AdapterResult<Vec<u8>> {
        let mut builder = Request::post(uri.clone()).header(CONTENT_TYPE, content_type);
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let request = builder
            .body(Body::from(body))
            .map_err(|err| AdapterError::transport(format!("failed to build request: {err}")))?;

        let response = timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| AdapterError::transport(format!("request to {uri} timed out")))?
            .map_err(|err| AdapterError::transport(format!("request to {uri} failed: {err}")))?;

        let status = response.status();
        let retry_after = response.headers().get(RETRY_AFTER).and_then(parse_retry_after);
        let bytes = to_bytes(response.into_body())
            .await
            .map_err(|err| AdapterError::transport(format!("failed to read response: {err}")))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AdapterError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let reason = String::from_utf8_lossy(&bytes);
            return Err(AdapterError::response(format!("{uri} returned {status}: {reason}")));
        }

        Ok(bytes.to_vec())
    }
}

fn parse_retry_after(value: &HeaderValue) -> Option<Duration> {
    value
        .to_str()
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Normalises a base URL so that relative paths can be appended.
///
/// # Errors
///
/// Returns [`AdapterError::Configuration`] when the scheme is missing or the
/// URL does not parse.
pub fn sanitize_base_url(input: &str) -> AdapterResult<String> {
    let mut base = input.trim().to_owned();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(AdapterError::configuration(
            "base URL must start with http:// or https://",
        ));
    }
    if !base.ends_with('/') {
        base.push('/');
    }
    base.parse::<Uri>()
        .map_err(|err| AdapterError::configuration(format!("invalid base URL: {err}")))?;
    Ok(base)
}
