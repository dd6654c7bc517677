use crate::config::LocatorConfig;
use crate::location::{GeocodingResolver, IpLocationResolver};
use std::sync::Arc;

/// Provider chains are shared; positioning is per request.
pub struct AppState {
    pub config: LocatorConfig,
    pub geocoder: Arc<GeocodingResolver>,
    pub ip: Arc<IpLocationResolver>,
}
