//! Core types for the location subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point on the globe. Always within range once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Validate and build a coordinate.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, InvalidCoordinate> {
        if !latitude.is_finite()
            || !longitude.is_finite()
            || !(-90.0..=90.0).contains(&latitude)
            || !(-180.0..=180.0).contains(&longitude)
        {
            return Err(InvalidCoordinate { latitude, longitude });
        }
        Ok(Self { latitude, longitude })
    }
}

/// Renders `"lat, lon"` with six decimals, the degraded address form.
impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl fmt::Display for InvalidCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid coordinates ({}, {}). Lat: -90..90, Lon: -180..180",
            self.latitude, self.longitude
        )
    }
}

impl std::error::Error for InvalidCoordinate {}

/// Structured address parts. Providers differ in granularity, so every
/// field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressComponents {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
}

impl AddressComponents {
    pub fn is_empty(&self) -> bool {
        self.city.is_none() && self.state.is_none() && self.country.is_none() && self.postal_code.is_none()
    }
}

/// Where a [`LocationResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceTag {
    DeviceHighAccuracy,
    DeviceLowAccuracy,
    IpApproximate,
    Manual,
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceHighAccuracy => write!(f, "device-high-accuracy"),
            Self::DeviceLowAccuracy => write!(f, "device-low-accuracy"),
            Self::IpApproximate => write!(f, "ip-approximate"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A usable delivery location. Built fresh per resolution and handed to the
/// caller, which decides whether to persist it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationResult {
    pub coordinate: Coordinate,
    pub formatted_address: String,
    pub components: Option<AddressComponents>,
    pub source: SourceTag,
    pub resolved_at: DateTime<Utc>,
}

impl LocationResult {
    pub fn new(
        coordinate: Coordinate,
        formatted_address: String,
        components: Option<AddressComponents>,
        source: SourceTag,
    ) -> Self {
        Self {
            coordinate,
            formatted_address,
            components,
            source,
            resolved_at: Utc::now(),
        }
    }

    /// Result supplied by the manual map picker (tier 3).
    pub fn manual(coordinate: Coordinate, address: Option<String>) -> Self {
        let formatted_address = address
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| coordinate.to_string());
        Self::new(coordinate, formatted_address, None, SourceTag::Manual)
    }
}

/// Classification of a resolution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
    Unsupported,
    AllProvidersFailed,
    /// Native positioning code outside the documented 1..=3 range.
    Unknown,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PermissionDenied => "permission_denied",
            Self::PositionUnavailable => "position_unavailable",
            Self::Timeout => "timeout",
            Self::Unsupported => "unsupported",
            Self::AllProvidersFailed => "all_providers_failed",
            Self::Unknown => "unknown",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// A classified failure of the location cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionError {
    pub kind: ErrorKind,
    pub message: String,
    pub original_code: Option<i32>,
}

impl ResolutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            original_code: None,
        }
    }

    pub fn unsupported() -> Self {
        Self::new(ErrorKind::Unsupported, "Geolocation is not supported by this platform")
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Location request was cancelled")
    }

    /// Classify a native positioning error code.
    pub fn from_native(code: i32, message: &str) -> Self {
        let kind = match code {
            1 => ErrorKind::PermissionDenied,
            2 => ErrorKind::PositionUnavailable,
            3 => ErrorKind::Timeout,
            _ => ErrorKind::Unknown,
        };
        let message = if message.is_empty() {
            format!("Positioning failed with code {}", code)
        } else {
            message.to_string()
        };
        Self {
            kind,
            message,
            original_code: Some(code),
        }
    }

    /// User-facing instruction for this failure.
    pub fn guidance(&self) -> &'static str {
        match self.kind {
            ErrorKind::PermissionDenied => {
                "Location access denied. Please enable location permissions in your browser settings."
            }
            ErrorKind::PositionUnavailable => {
                "Location information is unavailable. This could be due to:\n\
                 \u{2022} GPS/Location services being disabled\n\
                 \u{2022} Poor GPS signal (try moving to a window or outdoors)\n\
                 \u{2022} Network connectivity issues\n\
                 \u{2022} Browser location service restrictions"
            }
            ErrorKind::Timeout => {
                "Location request timed out. Please try again or check your internet connection."
            }
            ErrorKind::Unsupported => "Geolocation is not supported by this browser",
            ErrorKind::AllProvidersFailed => {
                "We could not detect your location automatically. Please pick it on the map."
            }
            ErrorKind::Unknown => "Unknown geolocation error",
            ErrorKind::Cancelled => "Location request was cancelled",
        }
    }

    /// Whether the caller should escalate to the IP tier.
    pub fn escalates_to_ip(&self) -> bool {
        !matches!(self.kind, ErrorKind::Cancelled)
    }
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.original_code {
            Some(code) => write!(f, "{} (code {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ResolutionError {}
