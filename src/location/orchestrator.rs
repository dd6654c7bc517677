//! Location orchestrator: the single entry point of the cascade.
//!
//! Tier 1: device fix → reverse geocoding (coordinate string if no address)
//! Tier 2: IP geolocation, called explicitly by the caller after tier 1 failed
//! Tier 3: manual map picker, external; see [`LocationResult::manual`]
//!
//! Tiers are separate calls so the caller can show intermediate UI between
//! them. Nothing is produced automatically once tier 2 is exhausted.

use super::distance::haversine_km;
use super::geocoding::GeocodingResolver;
use super::http::HttpClient;
use super::instructions::PlatformFamily;
use super::ip::{IpLocationResolver, ProviderCheck};
use super::permission::{check_support, SupportReport};
use super::position::{PositionFix, PositionProvider, PositionSource};
use super::types::{LocationResult, ResolutionError};
use crate::config::LocatorConfig;
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct LocationOrchestrator {
    position: PositionProvider<dyn PositionSource>,
    geocoder: Arc<GeocodingResolver>,
    ip: Arc<IpLocationResolver>,
}

impl LocationOrchestrator {
    pub fn new(
        position: PositionProvider<dyn PositionSource>,
        geocoder: Arc<GeocodingResolver>,
        ip: Arc<IpLocationResolver>,
    ) -> Self {
        Self { position, geocoder, ip }
    }

    /// Standard chains built from configuration.
    pub fn from_config(config: &LocatorConfig, source: Arc<dyn PositionSource>, http: Arc<dyn HttpClient>) -> Self {
        let (geocoder, ip) = build_chains(config, http);
        Self::new(position_provider(config, source), geocoder, ip)
    }

    /// Tier 1. Fails only when positioning fails; a missing address degrades
    /// to the `"lat, lon"` string.
    pub async fn current_location_with_address(&self) -> Result<LocationResult, ResolutionError> {
        self.current_location_with_address_cancellable(&CancellationToken::new()).await
    }

    pub async fn current_location_with_address_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<LocationResult, ResolutionError> {
        let fix = self.position.get_position_cancellable(cancel).await?;
        debug!("device fix {} ({:?})", fix.coordinate, fix.tier);
        Ok(self.describe(fix, cancel).await)
    }

    async fn describe(&self, fix: PositionFix, cancel: &CancellationToken) -> LocationResult {
        let source = fix.tier.source_tag();
        match self.geocoder.reverse_geocode_cancellable(fix.coordinate, cancel).await {
            Some(hit) => {
                let components = Some(hit.components).filter(|c| !c.is_empty());
                LocationResult::new(fix.coordinate, hit.formatted_address, components, source)
            }
            None => {
                info!("no address for {}, using coordinates", fix.coordinate);
                LocationResult::new(fix.coordinate, fix.coordinate.to_string(), None, source)
            }
        }
    }

    /// Tier 2 for the caller's own network address. `None` means the caller
    /// must fall back to the manual picker.
    pub async fn ip_location(&self) -> Option<LocationResult> {
        self.ip.locate(None, &CancellationToken::new()).await
    }

    pub async fn ip_location_cancellable(&self, cancel: &CancellationToken) -> Option<LocationResult> {
        self.ip.locate(None, cancel).await
    }

    /// Tier 2 for an explicit address.
    pub async fn ip_location_for(&self, ip: IpAddr) -> Option<LocationResult> {
        self.ip.ip_location_for(ip).await
    }

    pub async fn ip_location_for_cancellable(&self, ip: IpAddr, cancel: &CancellationToken) -> Option<LocationResult> {
        self.ip.locate(Some(ip), cancel).await
    }

    /// Query every IP service, without stopping at the first success.
    pub async fn check_ip_services(&self, ip: Option<IpAddr>) -> Vec<ProviderCheck> {
        self.ip.check_providers(ip).await
    }

    pub fn calculate_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        haversine_km(lat1, lon1, lat2, lon2)
    }

    pub async fn check_location_support(&self) -> SupportReport {
        check_support(self.position.source()).await
    }

    pub fn location_instructions(platform: PlatformFamily) -> &'static str {
        platform.instructions()
    }
}

/// Shared provider chains; reused across requests.
pub fn build_chains(config: &LocatorConfig, http: Arc<dyn HttpClient>) -> (Arc<GeocodingResolver>, Arc<IpLocationResolver>) {
    let geocoder = GeocodingResolver::standard(
        http.clone(),
        config.google_api_key.clone(),
        &config.user_agent,
        config.geocoding.timeout(),
    );
    let ip = IpLocationResolver::standard(http, config.ip.timeout());
    (Arc::new(geocoder), Arc::new(ip))
}

pub fn position_provider(config: &LocatorConfig, source: Arc<dyn PositionSource>) -> PositionProvider<dyn PositionSource> {
    PositionProvider::new(source)
        .with_tiers(config.position.high.request(true), config.position.low.request(false))
        .skip_retry_on_denied(config.position.skip_retry_on_denied)
}
