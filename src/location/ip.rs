//! IP-based geolocation, the approximate tier used after device positioning
//! failed.
//!
//! Chain: ipapi.co → ip-api.com → db-ip. A provider only counts when it
//! returns latitude, longitude, city and country together.

use super::http::{FetchError, HttpClient, HttpRequest};
use super::types::{AddressComponents, Coordinate, LocationResult, SourceTag};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Hard per-provider deadline.
pub const DEFAULT_IP_TIMEOUT: Duration = Duration::from_secs(8);

/// Normalized provider output. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IpFields {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
}

impl IpFields {
    /// Build a result only from a complete record.
    fn into_result(self) -> Option<LocationResult> {
        let (Some(lat), Some(lon), Some(city), Some(country)) =
            (self.latitude, self.longitude, self.city, self.country)
        else {
            return None;
        };
        let coordinate = Coordinate::new(lat, lon).ok()?;
        let address = format!("{}, {}", city, country);
        let components = AddressComponents {
            city: Some(city),
            state: self.region,
            country: Some(country),
            postal_code: None,
        };
        Some(LocationResult::new(
            coordinate,
            address,
            Some(components),
            SourceTag::IpApproximate,
        ))
    }
}

/// One entry of the IP chain.
pub trait IpProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Request for the caller's own egress address, or for `ip` when given.
    fn request(&self, ip: Option<IpAddr>, timeout: Duration) -> HttpRequest;

    fn parse(&self, raw: &Value) -> IpFields;
}

/// IP geolocation over an ordered provider list.
pub struct IpLocationResolver {
    http: Arc<dyn HttpClient>,
    providers: Vec<Box<dyn IpProvider>>,
    timeout: Duration,
}

impl IpLocationResolver {
    pub fn new(http: Arc<dyn HttpClient>, providers: Vec<Box<dyn IpProvider>>, timeout: Duration) -> Self {
        Self { http, providers, timeout }
    }

    pub fn standard(http: Arc<dyn HttpClient>, timeout: Duration) -> Self {
        Self::new(
            http,
            vec![Box::new(IpApiCo), Box::new(IpApiCom), Box::new(DbIp)],
            timeout,
        )
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Locate the caller's own network address.
    pub async fn ip_location(&self) -> Option<LocationResult> {
        self.locate(None, &CancellationToken::new()).await
    }

    /// Locate a specific address, e.g. the client of an HTTP request.
    pub async fn ip_location_for(&self, ip: IpAddr) -> Option<LocationResult> {
        self.locate(Some(ip), &CancellationToken::new()).await
    }

    pub async fn locate(&self, ip: Option<IpAddr>, cancel: &CancellationToken) -> Option<LocationResult> {
        for provider in &self.providers {
            if cancel.is_cancelled() {
                debug!("ip lookup cancelled before {}", provider.name());
                return None;
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("ip lookup cancelled during {}", provider.name());
                    return None;
                }
                r = self.query(provider.as_ref(), ip) => r,
            };

            match outcome {
                Ok(result) => {
                    info!("ip location via {}: {}", provider.name(), result.formatted_address);
                    return Some(result);
                }
                Err(e) => warn!("ip service {} {}", provider.name(), e),
            }
        }

        info!("all ip geolocation services failed");
        None
    }

    /// Run every provider in order, recording each outcome. Used to diagnose
    /// which services are reachable; nothing short-circuits.
    pub async fn check_providers(&self, ip: Option<IpAddr>) -> Vec<ProviderCheck> {
        let mut checks = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let start = Instant::now();
            let outcome = self.query(provider.as_ref(), ip).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;
            let check = match outcome {
                Ok(result) => ProviderCheck {
                    provider: provider.name().to_string(),
                    ok: true,
                    location: Some(result.formatted_address),
                    error: None,
                    elapsed_ms,
                },
                Err(e) => ProviderCheck {
                    provider: provider.name().to_string(),
                    ok: false,
                    location: None,
                    error: Some(e.to_string()),
                    elapsed_ms,
                },
            };
            debug!("ip service check {}: ok={}", check.provider, check.ok);
            checks.push(check);
        }
        checks
    }

    async fn query(&self, provider: &dyn IpProvider, ip: Option<IpAddr>) -> Result<LocationResult, LookupFailure> {
        let request = provider.request(ip, self.timeout);
        debug!("trying ip service {}", request.url);

        let raw = tokio::time::timeout(self.timeout, self.http.get_json(&request))
            .await
            .map_err(|_| LookupFailure::TimedOut(self.timeout))?
            .map_err(LookupFailure::Fetch)?;

        provider.parse(&raw).into_result().ok_or(LookupFailure::Incomplete)
    }
}

/// Outcome of one provider in [`IpLocationResolver::check_providers`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderCheck {
    pub provider: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug)]
enum LookupFailure {
    Fetch(FetchError),
    TimedOut(Duration),
    Incomplete,
}

impl fmt::Display for LookupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "failed: {}", e),
            Self::TimedOut(d) => write!(f, "timed out after {:?}", d),
            Self::Incomplete => write!(f, "returned an incomplete record"),
        }
    }
}

// ─── Payload helpers ────────────────────────────────────────────

fn text(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Number that some services send as a JSON string.
fn number(raw: &Value, key: &str) -> Option<f64> {
    match raw.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ─── Providers ──────────────────────────────────────────────────

/// ipapi.co: `latitude`, `longitude`, `country_name`, `region`.
pub struct IpApiCo;

impl IpProvider for IpApiCo {
    fn name(&self) -> &str {
        "ipapi.co"
    }

    fn request(&self, ip: Option<IpAddr>, timeout: Duration) -> HttpRequest {
        let url = match ip {
            Some(ip) => format!("https://ipapi.co/{}/json/", ip),
            None => "https://ipapi.co/json/".to_string(),
        };
        HttpRequest::get(url, timeout)
    }

    fn parse(&self, raw: &Value) -> IpFields {
        IpFields {
            latitude: number(raw, "latitude"),
            longitude: number(raw, "longitude"),
            city: text(raw, "city"),
            country: text(raw, "country_name"),
            region: text(raw, "region"),
        }
    }
}

/// ip-api.com: `lat`, `lon`, `country`, `regionName`.
pub struct IpApiCom;

impl IpProvider for IpApiCom {
    fn name(&self) -> &str {
        "ip-api.com"
    }

    fn request(&self, ip: Option<IpAddr>, timeout: Duration) -> HttpRequest {
        // The free tier is served over plain HTTP only.
        let url = match ip {
            Some(ip) => format!("http://ip-api.com/json/{}", ip),
            None => "http://ip-api.com/json/".to_string(),
        };
        HttpRequest::get(url, timeout)
    }

    fn parse(&self, raw: &Value) -> IpFields {
        if raw.get("status").and_then(Value::as_str) == Some("fail") {
            return IpFields::default();
        }
        IpFields {
            latitude: number(raw, "lat"),
            longitude: number(raw, "lon"),
            city: text(raw, "city"),
            country: text(raw, "country"),
            region: text(raw, "regionName"),
        }
    }
}

/// db-ip free tier: string coordinates, `countryName`, `stateProv`.
pub struct DbIp;

impl IpProvider for DbIp {
    fn name(&self) -> &str {
        "db-ip"
    }

    fn request(&self, ip: Option<IpAddr>, timeout: Duration) -> HttpRequest {
        let target = ip.map(|ip| ip.to_string()).unwrap_or_else(|| "self".into());
        HttpRequest::get(format!("https://api.db-ip.com/v2/free/{}", target), timeout)
    }

    fn parse(&self, raw: &Value) -> IpFields {
        IpFields {
            latitude: number(raw, "latitude"),
            longitude: number(raw, "longitude"),
            city: text(raw, "city"),
            country: text(raw, "countryName"),
            region: text(raw, "stateProv"),
        }
    }
}
