//! Reverse geocoding: coordinate → display address, via an ordered chain.
//!
//! Chain: Google Geocoding (only with an API key) → Nominatim → BigDataCloud.
//! The first provider that yields a non-empty display string wins; every
//! other outcome is a soft failure and the chain moves on.

use super::http::{urlencod, HttpClient, HttpRequest};
use super::types::{AddressComponents, Coordinate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_GEOCODE_TIMEOUT: Duration = Duration::from_secs(10);

/// A reverse geocoding hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodedAddress {
    pub formatted_address: String,
    pub components: AddressComponents,
    pub provider: String,
}

/// One entry of the reverse geocoding chain.
pub trait GeocodeProvider: Send + Sync {
    fn name(&self) -> &str;

    fn timeout(&self) -> Duration;

    /// `None` means the provider is not configured and is skipped entirely.
    fn request(&self, at: Coordinate) -> Option<HttpRequest>;

    /// Extract a display string and components. `None` on an unusable payload.
    fn parse(&self, raw: &Value) -> Option<(String, AddressComponents)>;
}

/// Reverse geocoder that walks its providers strictly in order.
pub struct GeocodingResolver {
    http: Arc<dyn HttpClient>,
    providers: Vec<Box<dyn GeocodeProvider>>,
}

impl GeocodingResolver {
    pub fn new(http: Arc<dyn HttpClient>, providers: Vec<Box<dyn GeocodeProvider>>) -> Self {
        Self { http, providers }
    }

    /// The standard chain. Google is included but stays dormant without a key.
    pub fn standard(
        http: Arc<dyn HttpClient>,
        google_api_key: Option<String>,
        user_agent: &str,
        timeout: Duration,
    ) -> Self {
        Self::new(
            http,
            vec![
                Box::new(GoogleGeocoder::new(google_api_key, timeout)),
                Box::new(NominatimReverse::new(user_agent, timeout)),
                Box::new(BigDataCloudReverse::new(timeout)),
            ],
        )
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub async fn reverse_geocode(&self, at: Coordinate) -> Option<GeocodedAddress> {
        self.reverse_geocode_cancellable(at, &CancellationToken::new()).await
    }

    /// Walk the chain. Returns `None` when every provider failed or the token
    /// was cancelled; no provider is started after cancellation.
    pub async fn reverse_geocode_cancellable(
        &self,
        at: Coordinate,
        cancel: &CancellationToken,
    ) -> Option<GeocodedAddress> {
        for provider in &self.providers {
            if cancel.is_cancelled() {
                debug!("reverse geocoding cancelled before {}", provider.name());
                return None;
            }

            let Some(request) = provider.request(at) else {
                debug!("skipping {}: not configured", provider.name());
                continue;
            };

            debug!("reverse geocoding {} via {}", at, request.host());
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("reverse geocoding cancelled during {}", provider.name());
                    return None;
                }
                r = tokio::time::timeout(provider.timeout(), self.http.get_json(&request)) => r,
            };

            let raw = match outcome {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => {
                    warn!("{} reverse geocoding failed: {}", provider.name(), e);
                    continue;
                }
                Err(_) => {
                    warn!("{} reverse geocoding timed out after {:?}", provider.name(), provider.timeout());
                    continue;
                }
            };

            match provider.parse(&raw) {
                Some((formatted, components)) if !formatted.trim().is_empty() => {
                    info!("{} resolved {} -> {}", provider.name(), at, formatted);
                    return Some(GeocodedAddress {
                        formatted_address: formatted.trim().to_string(),
                        components,
                        provider: provider.name().to_string(),
                    });
                }
                _ => warn!("{} returned no usable address", provider.name()),
            }
        }

        info!("all reverse geocoding providers failed for {}", at);
        None
    }
}

// ─── Payload helpers ────────────────────────────────────────────

/// Non-empty trimmed string at `v`.
fn text(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ─── Google Geocoding ───────────────────────────────────────────

/// Key-gated commercial provider.
pub struct GoogleGeocoder {
    api_key: Option<String>,
    timeout: Duration,
}

impl GoogleGeocoder {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        Self { api_key, timeout }
    }
}

#[derive(Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    results: Vec<GoogleResult>,
    status: String,
}

#[derive(Deserialize)]
struct GoogleResult {
    #[serde(default)]
    formatted_address: String,
    #[serde(default)]
    address_components: Vec<GoogleComponent>,
}

#[derive(Deserialize)]
struct GoogleComponent {
    #[serde(default)]
    long_name: String,
    #[serde(default)]
    types: Vec<String>,
}

impl GeocodeProvider for GoogleGeocoder {
    fn name(&self) -> &str {
        "google"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn request(&self, at: Coordinate) -> Option<HttpRequest> {
        let key = self.api_key.as_deref()?;
        let url = format!(
            "https://maps.googleapis.com/maps/api/geocode/json?latlng={},{}&key={}",
            at.latitude,
            at.longitude,
            urlencod(key),
        );
        Some(HttpRequest::get(url, self.timeout))
    }

    fn parse(&self, raw: &Value) -> Option<(String, AddressComponents)> {
        let response = GoogleResponse::deserialize(raw).ok()?;
        if response.status != "OK" {
            debug!("google geocoding status {}", response.status);
            return None;
        }
        let first = response.results.into_iter().next()?;

        let mut components = AddressComponents::default();
        for c in first.address_components {
            let value = Some(c.long_name).filter(|s| !s.is_empty());
            let has = |t: &str| c.types.iter().any(|x| x == t);
            if has("locality") {
                components.city = value;
            } else if has("administrative_area_level_1") {
                components.state = value;
            } else if has("country") {
                components.country = value;
            } else if has("postal_code") {
                components.postal_code = value;
            }
        }

        Some((first.formatted_address, components))
    }
}

// ─── Nominatim reverse ──────────────────────────────────────────

/// OpenStreetMap Nominatim. Requires an identifying User-Agent.
pub struct NominatimReverse {
    user_agent: String,
    timeout: Duration,
}

impl NominatimReverse {
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            timeout,
        }
    }
}

impl GeocodeProvider for NominatimReverse {
    fn name(&self) -> &str {
        "nominatim"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn request(&self, at: Coordinate) -> Option<HttpRequest> {
        let url = format!(
            "https://nominatim.openstreetmap.org/reverse?format=jsonv2&lat={}&lon={}&addressdetails=1",
            at.latitude, at.longitude,
        );
        Some(HttpRequest::get(url, self.timeout).header("User-Agent", &self.user_agent))
    }

    fn parse(&self, raw: &Value) -> Option<(String, AddressComponents)> {
        let display = text(raw.get("display_name"))?;
        let address = raw.get("address");
        let field = |names: &[&str]| {
            names
                .iter()
                .find_map(|n| text(address.and_then(|a| a.get(*n))))
        };

        let components = AddressComponents {
            city: field(&["city", "town", "village"]),
            state: field(&["state", "province"]),
            country: field(&["country"]),
            postal_code: field(&["postcode"]),
        };
        Some((display, components))
    }
}

// ─── BigDataCloud reverse ───────────────────────────────────────

/// BigDataCloud client-side reverse geocoding. Coarser, keyless.
pub struct BigDataCloudReverse {
    timeout: Duration,
}

impl BigDataCloudReverse {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl GeocodeProvider for BigDataCloudReverse {
    fn name(&self) -> &str {
        "bigdatacloud"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn request(&self, at: Coordinate) -> Option<HttpRequest> {
        let url = format!(
            "https://api.bigdatacloud.net/data/reverse-geocode-client?latitude={}&longitude={}&localityLanguage=en",
            at.latitude, at.longitude,
        );
        Some(HttpRequest::get(url, self.timeout))
    }

    fn parse(&self, raw: &Value) -> Option<(String, AddressComponents)> {
        let info = raw.get("localityInfo")?;
        let nth_name = |list: &str, i: usize| {
            text(info.get(list).and_then(|l| l.get(i)).and_then(|e| e.get("name")))
        };

        let city = nth_name("locality", 0).or_else(|| nth_name("administrative", 2));
        let state = nth_name("administrative", 1);
        let country = nth_name("administrative", 0);
        let locality = text(raw.get("locality"));

        let mut parts: Vec<&str> = Vec::new();
        for part in [&locality, &city, &state, &country].into_iter().flatten() {
            if !parts.contains(&part.as_str()) {
                parts.push(part);
            }
        }
        let display = parts.join(", ");

        let components = AddressComponents {
            city,
            state,
            country,
            postal_code: text(raw.get("postcode")),
        };
        Some((display, components))
    }
}
