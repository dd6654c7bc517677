//! Advisory read of positioning support and permission.
//!
//! Nothing here gates [`PositionProvider::get_position`](super::position::PositionProvider::get_position);
//! callers may skip it and still get a correct outcome.

use super::position::PositionSource;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Denied,
    Prompt,
    Unknown,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => write!(f, "granted"),
            Self::Denied => write!(f, "denied"),
            Self::Prompt => write!(f, "prompt"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportReport {
    pub supported: bool,
    pub permission: PermissionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub async fn check_support<S: PositionSource + ?Sized>(source: &S) -> SupportReport {
    if !source.is_supported() {
        return SupportReport {
            supported: false,
            permission: PermissionState::Unknown,
            message: Some("Geolocation is not supported by this browser".into()),
        };
    }

    match source.permission_state().await {
        Some(state) => SupportReport {
            supported: true,
            permission: state,
            message: (state == PermissionState::Denied)
                .then(|| "Location access is blocked. Please enable it in your browser settings.".into()),
        },
        // Without a readable state the platform will prompt on first use.
        None => SupportReport {
            supported: true,
            permission: PermissionState::Prompt,
            message: Some("Location permission status unknown".into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::position::testing::ScriptedSource;

    #[tokio::test]
    async fn test_unsupported() {
        let report = check_support(&ScriptedSource::unsupported()).await;
        assert!(!report.supported);
        assert_eq!(report.permission, PermissionState::Unknown);
        assert!(report.message.is_some());
    }

    #[tokio::test]
    async fn test_denied_has_message() {
        let source = ScriptedSource::new(vec![]).with_permission(PermissionState::Denied);
        let report = check_support(&source).await;
        assert!(report.supported);
        assert_eq!(report.permission, PermissionState::Denied);
        assert!(report.message.unwrap().contains("blocked"));
    }

    #[tokio::test]
    async fn test_granted_has_no_message() {
        let source = ScriptedSource::new(vec![]).with_permission(PermissionState::Granted);
        let report = check_support(&source).await;
        assert_eq!(report.permission, PermissionState::Granted);
        assert!(report.message.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_state_is_prompt() {
        let report = check_support(&ScriptedSource::new(vec![])).await;
        assert_eq!(report.permission, PermissionState::Prompt);
        assert_eq!(report.message.as_deref(), Some("Location permission status unknown"));
    }

    #[tokio::test]
    async fn test_check_does_not_consume_attempts() {
        let source = ScriptedSource::new(vec![]);
        check_support(&source).await;
        assert!(source.requests().is_empty());
    }
}
