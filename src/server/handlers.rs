use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::location::orchestrator::position_provider;
use crate::location::permission::check_support;
use crate::location::{
    AddressComponents, Coordinate, ErrorKind, LocationOrchestrator, LocationResult, PlatformFamily,
    PositionSource, ReportedPosition, ResolutionError, SupportReport,
};

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

pub(super) struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.1,
            code: self.0.as_u16(),
        };
        (self.0, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> Response {
    ApiError(status, msg.into()).into_response()
}

fn coordinate(lat: f64, lon: f64) -> Result<Coordinate, Response> {
    Coordinate::new(lat, lon).map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))
}

fn user_agent(headers: &HeaderMap) -> &str {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

// ─── Reported fix ────────────────────────────────────────────────

/// A device fix the client reports about itself.
#[derive(Deserialize)]
pub struct FixQuery {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// `high` (default) or `low`.
    pub accuracy: Option<String>,
    /// Uncertainty radius in metres.
    pub accuracy_m: Option<f64>,
}

fn reported_position(params: &FixQuery) -> Result<ReportedPosition, Response> {
    match (params.lat, params.lon) {
        (Some(lat), Some(lon)) => {
            let c = coordinate(lat, lon)?;
            match params.accuracy.as_deref() {
                Some("low") => Ok(ReportedPosition::coarse(c.latitude, c.longitude, params.accuracy_m)),
                Some("high") | None => Ok(ReportedPosition::precise(c.latitude, c.longitude, params.accuracy_m)),
                Some(other) => Err(api_error(
                    StatusCode::BAD_REQUEST,
                    format!("Unknown accuracy '{}'. Use 'high' or 'low'.", other),
                )),
            }
        }
        (None, None) => Ok(ReportedPosition::none()),
        _ => Err(api_error(StatusCode::BAD_REQUEST, "Provide both 'lat' and 'lon' or neither")),
    }
}

// ─── GET /api/location ───────────────────────────────────────────

#[derive(Serialize)]
struct TierFailure {
    kind: ErrorKind,
    error: String,
    guidance: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'static str>,
    /// Where the client should go next.
    next: &'static str,
}

fn tier_failure(e: &ResolutionError, headers: &HeaderMap) -> Response {
    let instructions = (e.kind == ErrorKind::PermissionDenied)
        .then(|| PlatformFamily::from_user_agent(user_agent(headers)).instructions());
    let body = TierFailure {
        kind: e.kind,
        error: e.to_string(),
        guidance: e.guidance(),
        instructions,
        next: if e.escalates_to_ip() { "/api/ip-location" } else { "" },
    };
    (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
}

pub async fn current_location(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<FixQuery>,
) -> Result<Json<LocationResult>, Response> {
    let start = Instant::now();

    let source: Arc<dyn PositionSource> = Arc::new(reported_position(&params)?);
    let orchestrator = LocationOrchestrator::new(
        position_provider(&state.config, source),
        state.geocoder.clone(),
        state.ip.clone(),
    );

    match orchestrator.current_location_with_address().await {
        Ok(result) => {
            info!(
                "GET /api/location -> {} [{}] ({:.1}ms)",
                result.formatted_address,
                result.source,
                start.elapsed().as_secs_f64() * 1000.0,
            );
            Ok(Json(result))
        }
        Err(e) => {
            info!("GET /api/location -> {} ({:.1}ms)", e.kind, start.elapsed().as_secs_f64() * 1000.0);
            Err(tier_failure(&e, &headers))
        }
    }
}

// ─── GET /api/ip-location ────────────────────────────────────────

#[derive(Deserialize)]
pub struct IpQuery {
    pub ip: Option<String>,
}

#[derive(Serialize)]
struct ManualRequired {
    manual_required: bool,
    error: &'static str,
}

/// First hop of `X-Forwarded-For`, when present and parseable.
fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Whether an address can be geolocated at all. Loopback, private and
/// link-local addresses only say where the server is.
fn is_routable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified() || v4.is_broadcast())
        }
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_routable(IpAddr::V4(v4)),
            None => {
                let first = v6.segments()[0];
                !(v6.is_loopback()
                    || v6.is_unspecified()
                    || (first & 0xfe00) == 0xfc00
                    || (first & 0xffc0) == 0xfe80)
            }
        },
    }
}

/// The client's address: forwarded hop first, then the socket peer.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> Option<IpAddr> {
    forwarded_for(headers)
        .into_iter()
        .chain(std::iter::once(peer.ip()))
        .find(|ip| is_routable(*ip))
}

fn manual_required() -> Response {
    let body = ManualRequired {
        manual_required: true,
        error: "Could not estimate location from network address. Please pick it on the map.",
    };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

pub async fn ip_location(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<IpQuery>,
) -> Result<Json<LocationResult>, Response> {
    let start = Instant::now();

    let target = match params.ip.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<IpAddr>()
                .map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("Invalid IP address '{}'", raw)))?,
        ),
        None => client_ip(&headers, peer),
    };

    let Some(ip) = target else {
        info!("GET /api/ip-location -> no routable client address from {}", peer.ip());
        return Err(manual_required());
    };

    let elapsed = || start.elapsed().as_secs_f64() * 1000.0;
    match state.ip.ip_location_for(ip).await {
        Some(r) => {
            info!("GET /api/ip-location {} -> {} ({:.1}ms)", ip, r.formatted_address, elapsed());
            Ok(Json(r))
        }
        None => {
            info!("GET /api/ip-location {} -> manual required ({:.1}ms)", ip, elapsed());
            Err(manual_required())
        }
    }
}

// ─── GET /api/reverse ────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ReverseQuery {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Serialize)]
pub struct ReverseResponse {
    pub formatted_address: String,
    pub components: Option<AddressComponents>,
    pub provider: Option<String>,
    /// True when no provider answered and the address is the coordinate.
    pub degraded: bool,
}

pub async fn reverse(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReverseQuery>,
) -> Result<Json<ReverseResponse>, Response> {
    let at = coordinate(params.lat, params.lon)?;
    let response = match state.geocoder.reverse_geocode(at).await {
        Some(hit) => ReverseResponse {
            formatted_address: hit.formatted_address,
            components: Some(hit.components).filter(|c| !c.is_empty()),
            provider: Some(hit.provider),
            degraded: false,
        },
        None => ReverseResponse {
            formatted_address: at.to_string(),
            components: None,
            provider: None,
            degraded: true,
        },
    };
    Ok(Json(response))
}

// ─── GET /api/distance ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct DistanceQuery {
    pub lat1: f64,
    pub lon1: f64,
    pub lat2: f64,
    pub lon2: f64,
}

#[derive(Debug, Serialize)]
pub struct DistanceResponse {
    pub distance_km: f64,
}

pub async fn distance(Query(params): Query<DistanceQuery>) -> Result<Json<DistanceResponse>, Response> {
    let a = coordinate(params.lat1, params.lon1)?;
    let b = coordinate(params.lat2, params.lon2)?;
    Ok(Json(DistanceResponse {
        distance_km: LocationOrchestrator::calculate_distance(a.latitude, a.longitude, b.latitude, b.longitude),
    }))
}

// ─── GET /api/support ────────────────────────────────────────────

pub async fn support(Query(params): Query<FixQuery>) -> Result<Json<SupportReport>, Response> {
    let source = reported_position(&params)?;
    Ok(Json(check_support(&source).await))
}

// ─── GET /api/instructions ───────────────────────────────────────

#[derive(Deserialize)]
pub struct InstructionsQuery {
    pub platform: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InstructionsResponse {
    pub platform: PlatformFamily,
    pub instructions: &'static str,
}

pub async fn instructions(
    headers: HeaderMap,
    Query(params): Query<InstructionsQuery>,
) -> Result<Json<InstructionsResponse>, Response> {
    let platform = match params.platform.as_deref() {
        Some(p) => p
            .parse::<PlatformFamily>()
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?,
        None => PlatformFamily::from_user_agent(user_agent(&headers)),
    };
    Ok(Json(InstructionsResponse {
        platform,
        instructions: LocationOrchestrator::location_instructions(platform),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocatorConfig;
    use crate::location::http::testing::{Reply, ScriptedClient};
    use crate::location::SourceTag;
    use crate::server::build_state;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn state(client: ScriptedClient) -> Arc<AppState> {
        build_state(LocatorConfig::default(), Arc::new(client))
    }

    fn peer(addr: &str) -> ConnectInfo<SocketAddr> {
        ConnectInfo(addr.parse().unwrap())
    }

    fn fix(lat: Option<f64>, lon: Option<f64>) -> FixQuery {
        FixQuery { lat, lon, accuracy: None, accuracy_m: None }
    }

    #[tokio::test]
    async fn test_location_with_reported_fix() {
        let client = ScriptedClient::new().on(
            "nominatim",
            Reply::Json(json!({"display_name": "Brigade Road, Bangalore, India", "address": {"city": "Bangalore"}})),
        );
        let Json(result) = current_location(State(state(client)), HeaderMap::new(), Query(fix(Some(12.97), Some(77.6))))
            .await
            .unwrap();
        assert_eq!(result.source, SourceTag::DeviceHighAccuracy);
        assert_eq!(result.formatted_address, "Brigade Road, Bangalore, India");
    }

    #[tokio::test]
    async fn test_location_without_fix_is_unsupported() {
        let resp = current_location(State(state(ScriptedClient::new())), HeaderMap::new(), Query(fix(None, None)))
            .await
            .unwrap_err();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_location_half_fix_is_bad_request() {
        let resp = current_location(State(state(ScriptedClient::new())), HeaderMap::new(), Query(fix(Some(1.0), None)))
            .await
            .unwrap_err();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ip_location_uses_forwarded_for() {
        let client = ScriptedClient::new().on(
            "ipapi.co/203.0.113.9/json",
            Reply::Json(json!({"latitude": 12.97, "longitude": 77.59, "city": "Bangalore", "country_name": "India"})),
        );
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));

        let Json(result) = ip_location(State(state(client)), peer("10.1.2.3:50000"), headers, Query(IpQuery { ip: None }))
            .await
            .unwrap();
        assert_eq!(result.source, SourceTag::IpApproximate);
        assert_eq!(result.formatted_address, "Bangalore, India");
    }

    #[tokio::test]
    async fn test_ip_location_uses_public_peer() {
        let client = Arc::new(ScriptedClient::new().on(
            "ipapi.co/198.51.100.7/json",
            Reply::Json(json!({"latitude": 59.33, "longitude": 18.07, "city": "Stockholm", "country_name": "Sweden"})),
        ));
        let app = build_state(LocatorConfig::default(), client.clone());

        let Json(result) = ip_location(State(app), peer("198.51.100.7:443"), HeaderMap::new(), Query(IpQuery { ip: None }))
            .await
            .unwrap();
        assert_eq!(result.formatted_address, "Stockholm, Sweden");
        assert_eq!(client.calls()[0].url, "https://ipapi.co/198.51.100.7/json/");
    }

    #[tokio::test]
    async fn test_ip_location_never_locates_the_server() {
        // Only the server's own lookup would succeed.
        let client = Arc::new(ScriptedClient::new().on(
            "https://ipapi.co/json/",
            Reply::Json(json!({"latitude": 59.33, "longitude": 18.07, "city": "Stockholm", "country_name": "Sweden"})),
        ));
        let app = build_state(LocatorConfig::default(), client.clone());

        let resp = ip_location(State(app), peer("127.0.0.1:50000"), HeaderMap::new(), Query(IpQuery { ip: None }))
            .await
            .unwrap_err();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ip_location_private_forwarded_falls_back_to_peer() {
        let client = Arc::new(ScriptedClient::new());
        let app = build_state(LocatorConfig::default(), client.clone());
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("192.168.1.20"));

        let resp = ip_location(State(app), peer("[::1]:8080"), headers, Query(IpQuery { ip: None }))
            .await
            .unwrap_err();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ip_location_exhausted_is_not_found() {
        let resp = ip_location(
            State(state(ScriptedClient::new())),
            peer("198.51.100.7:443"),
            HeaderMap::new(),
            Query(IpQuery { ip: None }),
        )
        .await
        .unwrap_err();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_routable_addresses() {
        for ip in ["127.0.0.1", "10.0.0.8", "172.16.4.1", "192.168.0.1", "169.254.1.1", "0.0.0.0", "::1", "fd00::1", "fe80::1", "::ffff:10.0.0.1"] {
            assert!(!is_routable(ip.parse().unwrap()), "{} should not be routable", ip);
        }
        for ip in ["8.8.8.8", "198.51.100.7", "2001:4860:4860::8888", "::ffff:8.8.8.8"] {
            assert!(is_routable(ip.parse().unwrap()), "{} should be routable", ip);
        }
    }

    #[tokio::test]
    async fn test_ip_location_rejects_garbage() {
        let query = IpQuery { ip: Some("not-an-ip".into()) };
        let resp = ip_location(State(state(ScriptedClient::new())), peer("198.51.100.7:443"), HeaderMap::new(), Query(query))
            .await
            .unwrap_err();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reverse_degrades() {
        let Json(resp) = reverse(State(state(ScriptedClient::new())), Query(ReverseQuery { lat: 1.5, lon: 2.5 }))
            .await
            .unwrap();
        assert!(resp.degraded);
        assert_eq!(resp.formatted_address, "1.500000, 2.500000");
    }

    #[tokio::test]
    async fn test_distance_validates() {
        let ok = distance(Query(DistanceQuery { lat1: 0.0, lon1: 0.0, lat2: 0.0, lon2: 1.0 }))
            .await
            .unwrap();
        assert!((ok.0.distance_km - 111.19).abs() < 0.5);

        let bad = distance(Query(DistanceQuery { lat1: 95.0, lon1: 0.0, lat2: 0.0, lon2: 1.0 }))
            .await
            .unwrap_err();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_instructions_from_user_agent() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0"),
        );
        let Json(resp) = instructions(headers, Query(InstructionsQuery { platform: None })).await.unwrap();
        assert_eq!(resp.platform, PlatformFamily::Firefox);

        let Json(resp) = instructions(HeaderMap::new(), Query(InstructionsQuery { platform: Some("safari".into()) }))
            .await
            .unwrap();
        assert_eq!(resp.platform, PlatformFamily::Safari);
    }

    #[tokio::test]
    async fn test_support_reports_unsupported_without_fix() {
        let Json(report) = support(Query(fix(None, None))).await.unwrap();
        assert!(!report.supported);
    }
}
