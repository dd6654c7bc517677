//! Platform-specific "how to re-enable location" text.
//!
//! User-agent sniffing is a coarse heuristic, so it is confined to
//! [`PlatformFamily::from_user_agent`]; everything else goes through the table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformFamily {
    Chrome,
    Edge,
    Firefox,
    Safari,
    Other,
}

const INSTRUCTIONS: &[(PlatformFamily, &str)] = &[
    (
        PlatformFamily::Chrome,
        "Click the location icon in your address bar and select \"Allow\" for this site.",
    ),
    (
        PlatformFamily::Edge,
        "Click the location icon in your address bar and select \"Allow\" for this site.",
    ),
    (
        PlatformFamily::Firefox,
        "Click the shield icon in your address bar and allow location access for this site.",
    ),
    (
        PlatformFamily::Safari,
        "Go to Safari > Preferences > Websites > Location and allow access for this site.",
    ),
];

const GENERIC: &str = "Please enable location access in your browser settings for this website.";

impl PlatformFamily {
    /// Classify a User-Agent header. Edge and Chrome both advertise
    /// "safari", and Edge also advertises "chrome", so order matters.
    pub fn from_user_agent(ua: &str) -> Self {
        let ua = ua.to_lowercase();
        if ua.contains("edg/") || ua.contains("edge/") {
            Self::Edge
        } else if ua.contains("firefox") || ua.contains("fxios") {
            Self::Firefox
        } else if ua.contains("chrome") || ua.contains("crios") {
            Self::Chrome
        } else if ua.contains("safari") {
            Self::Safari
        } else {
            Self::Other
        }
    }

    pub fn instructions(self) -> &'static str {
        INSTRUCTIONS
            .iter()
            .find(|(family, _)| *family == self)
            .map(|(_, text)| *text)
            .unwrap_or(GENERIC)
    }
}

impl fmt::Display for PlatformFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Chrome => "chrome",
            Self::Edge => "edge",
            Self::Firefox => "firefox",
            Self::Safari => "safari",
            Self::Other => "other",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PlatformFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chrome" | "chromium" => Ok(Self::Chrome),
            "edge" => Ok(Self::Edge),
            "firefox" => Ok(Self::Firefox),
            "safari" => Ok(Self::Safari),
            "other" => Ok(Self::Other),
            _ => Err(format!(
                "Unknown platform '{}'. Use chrome, edge, firefox, safari or other.",
                s
            )),
        }
    }
}
