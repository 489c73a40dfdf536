//! HTTP reverse-geocoding client with per-call retry and exponential backoff.

use std::future::Future;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

use geozip_shared::{Credential, GeoResult, GeocoderConfig, GeozipError, NoResultReason, Result};

use crate::retry::RetryPolicy;

/// User-Agent string for provider requests.
const USER_AGENT: &str = concat!("geozip/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// ReverseGeocoder
// ---------------------------------------------------------------------------

/// Anything that can turn a coordinate pair into a [`GeoResult`].
///
/// Implementations own their retry behavior and never fail: transient errors
/// are folded into [`GeoResult::Failed`].
pub trait ReverseGeocoder: Send + Sync {
    /// Look up the postal code for a coordinate pair.
    fn lookup(
        &self,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> impl Future<Output = GeoResult> + Send;
}

// ---------------------------------------------------------------------------
// Provider payload
// ---------------------------------------------------------------------------

/// Reverse address search response. Only the fields we read are modeled.
#[derive(Debug, Deserialize)]
struct ReverseResponse {
    addresses: Vec<AddressCandidate>,
}

#[derive(Debug, Deserialize)]
struct AddressCandidate {
    #[serde(default)]
    address: Option<Address>,
}

#[derive(Debug, Deserialize)]
struct Address {
    #[serde(rename = "postalCode", default)]
    postal_code: Option<String>,
}

/// Extract the first candidate's postal code from a response body.
///
/// `Ok(None)` means the payload was well-formed but carried no usable
/// candidate; `Err` means the payload was empty or malformed.
fn parse_postal_code(body: &str) -> Result<Option<String>> {
    if body.trim().is_empty() {
        return Err(GeozipError::parse("empty response body"));
    }

    let response: ReverseResponse = serde_json::from_str(body)
        .map_err(|e| GeozipError::parse(format!("malformed response body: {e}")))?;

    Ok(response
        .addresses
        .into_iter()
        .next()
        .and_then(|candidate| candidate.address)
        .and_then(|address| address.postal_code)
        .map(|code| code.trim().to_string())
        .filter(|code| !code.is_empty()))
}

// ---------------------------------------------------------------------------
// GeoClient
// ---------------------------------------------------------------------------

/// Reverse-geocoding client. Cheap to share behind an `Arc`.
pub struct GeoClient {
    client: Client,
    endpoint: Url,
    api_version: String,
    language: String,
    credential: Credential,
    retry: RetryPolicy,
}

impl std::fmt::Debug for GeoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("language", &self.language)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl GeoClient {
    /// Create a client from the immutable run configuration.
    pub fn new(config: &GeocoderConfig, retry: RetryPolicy, credential: Credential) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            GeozipError::config(format!("invalid geocoder endpoint '{}': {e}", config.endpoint))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()
            .map_err(|e| GeozipError::Network(format!("failed to build HTTP client: {e}")))?;

        debug!(
            endpoint = %endpoint,
            max_attempts = retry.max_attempts(),
            backoff_base_ms = retry.backoff_base().as_millis() as u64,
            "geocoder client ready"
        );

        Ok(Self {
            client,
            endpoint,
            api_version: config.api_version.clone(),
            language: config.language.clone(),
            credential,
            retry,
        })
    }

    /// Perform a single request/response exchange.
    async fn fetch_once(&self, latitude: f64, longitude: f64) -> Result<Option<String>> {
        let query = format!("{latitude},{longitude}");

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("api-version", self.api_version.as_str()),
                ("subscription-key", self.credential.expose()),
                ("language", self.language.as_str()),
                ("query", query.as_str()),
            ])
            .send()
            .await
            // The request URL carries the subscription key; keep it out of logs.
            .map_err(|e| GeozipError::Network(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeozipError::Network(format!("HTTP {status}")));
        }

        let body = response.text().await.map_err(|e| {
            GeozipError::Network(format!("failed to read body: {}", e.without_url()))
        })?;

        parse_postal_code(&body)
    }
}

impl ReverseGeocoder for GeoClient {
    #[instrument(skip(self))]
    async fn lookup(&self, latitude: Option<f64>, longitude: Option<f64>) -> GeoResult {
        // NaN and infinities are as unusable as a blank cell.
        let (Some(latitude), Some(longitude)) = (
            latitude.filter(|v| v.is_finite()),
            longitude.filter(|v| v.is_finite()),
        ) else {
            debug!("missing coordinate, skipping lookup");
            return GeoResult::no_result(NoResultReason::MissingCoordinates);
        };

        let max_attempts = self.retry.max_attempts();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.fetch_once(latitude, longitude).await {
                Ok(Some(zip_code)) => return GeoResult::found(zip_code),
                Ok(None) => {
                    debug!(attempt, "no candidate address in response");
                    return GeoResult::no_result(NoResultReason::NoCandidates);
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "reverse geocoding attempt failed");
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(self.retry.delay_before_retry(attempt)).await;
                    }
                }
            }
        }

        GeoResult::Failed {
            attempts: max_attempts,
            error: last_error,
        }
    }
}
