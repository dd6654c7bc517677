//! Device positioning with a two-tier accuracy retry.
//!
//! Attempt 1 asks for a high-accuracy fix; any failure triggers exactly one
//! low-accuracy attempt with a longer timeout and a staler cache tolerance.
//! The error of the last attempt made is the one reported.

use super::permission::PermissionState;
use super::types::{Coordinate, ErrorKind, ResolutionError, SourceTag};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const CODE_PERMISSION_DENIED: i32 = 1;
pub const CODE_POSITION_UNAVAILABLE: i32 = 2;
pub const CODE_TIMEOUT: i32 = 3;

/// Parameters of one positioning attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionRequest {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub max_cache_age: Duration,
}

impl PositionRequest {
    pub const HIGH_ACCURACY: Self = Self {
        high_accuracy: true,
        timeout: Duration::from_secs(15),
        max_cache_age: Duration::from_secs(5 * 60),
    };

    pub const LOW_ACCURACY: Self = Self {
        high_accuracy: false,
        timeout: Duration::from_secs(20),
        max_cache_age: Duration::from_secs(10 * 60),
    };
}

/// Raw fix from the platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius of uncertainty in metres, when known.
    pub accuracy_m: Option<f64>,
}

/// Native positioning failure: `1` permission, `2` unavailable, `3` timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionFailure {
    pub code: i32,
    pub message: String,
}

impl PositionFailure {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl fmt::Display for PositionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}

/// The platform's positioning capability.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// `false` when the platform has no positioning at all.
    fn is_supported(&self) -> bool;

    async fn current_position(&self, request: PositionRequest) -> Result<Fix, PositionFailure>;

    /// Best-effort permission read. `None` when the platform cannot tell.
    async fn permission_state(&self) -> Option<PermissionState> {
        None
    }
}

/// Which attempt produced the fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyTier {
    High,
    Low,
}

impl AccuracyTier {
    pub fn source_tag(self) -> SourceTag {
        match self {
            Self::High => SourceTag::DeviceHighAccuracy,
            Self::Low => SourceTag::DeviceLowAccuracy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub coordinate: Coordinate,
    pub tier: AccuracyTier,
    pub accuracy_m: Option<f64>,
}

/// Two-tier position acquisition on top of a [`PositionSource`].
pub struct PositionProvider<S: ?Sized> {
    high: PositionRequest,
    low: PositionRequest,
    skip_retry_on_denied: bool,
    source: Arc<S>,
}

impl<S: PositionSource + ?Sized> PositionProvider<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            high: PositionRequest::HIGH_ACCURACY,
            low: PositionRequest::LOW_ACCURACY,
            skip_retry_on_denied: false,
            source,
        }
    }

    pub fn with_tiers(mut self, high: PositionRequest, low: PositionRequest) -> Self {
        self.high = high;
        self.low = low;
        self
    }

    /// Return a permission denial from attempt 1 without retrying.
    pub fn skip_retry_on_denied(mut self, skip: bool) -> Self {
        self.skip_retry_on_denied = skip;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn get_position(&self) -> Result<PositionFix, ResolutionError> {
        self.get_position_cancellable(&CancellationToken::new()).await
    }

    pub async fn get_position_cancellable(&self, cancel: &CancellationToken) -> Result<PositionFix, ResolutionError> {
        if !self.source.is_supported() {
            info!("positioning not supported on this platform");
            return Err(ResolutionError::unsupported());
        }

        let first = match self.attempt(self.high, AccuracyTier::High, cancel).await {
            Ok(fix) => return Ok(fix),
            Err(e) => e,
        };
        if first.kind == ErrorKind::Cancelled {
            return Err(first);
        }
        if self.skip_retry_on_denied && first.kind == ErrorKind::PermissionDenied {
            info!("permission denied; not retrying at low accuracy");
            return Err(first);
        }

        info!("high accuracy failed ({}), trying with lower accuracy", first);
        self.attempt(self.low, AccuracyTier::Low, cancel).await
    }

    async fn attempt(
        &self,
        request: PositionRequest,
        tier: AccuracyTier,
        cancel: &CancellationToken,
    ) -> Result<PositionFix, ResolutionError> {
        if cancel.is_cancelled() {
            return Err(ResolutionError::cancelled());
        }
        debug!(
            "requesting position: high_accuracy={} timeout={:?} max_age={:?}",
            request.high_accuracy, request.timeout, request.max_cache_age
        );

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResolutionError::cancelled()),
            r = tokio::time::timeout(request.timeout, self.source.current_position(request)) => r,
        };

        let fix = match outcome {
            Ok(Ok(fix)) => fix,
            Ok(Err(failure)) => {
                warn!("position attempt failed: {}", failure);
                return Err(ResolutionError::from_native(failure.code, &failure.message));
            }
            Err(_) => {
                warn!("position attempt exceeded {:?}", request.timeout);
                return Err(ResolutionError::from_native(CODE_TIMEOUT, "Location request timed out"));
            }
        };

        let coordinate = Coordinate::new(fix.latitude, fix.longitude).map_err(|e| {
            warn!("discarding fix: {}", e);
            ResolutionError::from_native(CODE_POSITION_UNAVAILABLE, &e.to_string())
        })?;

        Ok(PositionFix {
            coordinate,
            tier,
            accuracy_m: fix.accuracy_m,
        })
    }
}

/// A fix reported by the caller (a browser posting its own coordinates,
/// CLI flags). Without a fix the platform counts as unsupported.
#[derive(Debug, Clone, Default)]
pub struct ReportedPosition {
    fix: Option<Fix>,
    /// Reported fix only satisfies low-accuracy requests.
    coarse: bool,
}

impl ReportedPosition {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn precise(latitude: f64, longitude: f64, accuracy_m: Option<f64>) -> Self {
        Self {
            fix: Some(Fix { latitude, longitude, accuracy_m }),
            coarse: false,
        }
    }

    pub fn coarse(latitude: f64, longitude: f64, accuracy_m: Option<f64>) -> Self {
        Self {
            fix: Some(Fix { latitude, longitude, accuracy_m }),
            coarse: true,
        }
    }
}

#[async_trait]
impl PositionSource for ReportedPosition {
    fn is_supported(&self) -> bool {
        self.fix.is_some()
    }

    async fn current_position(&self, request: PositionRequest) -> Result<Fix, PositionFailure> {
        match self.fix {
            Some(_) if self.coarse && request.high_accuracy => Err(PositionFailure::new(
                CODE_POSITION_UNAVAILABLE,
                "Only a coarse fix was reported",
            )),
            Some(fix) => Ok(fix),
            None => Err(PositionFailure::new(CODE_POSITION_UNAVAILABLE, "No position reported")),
        }
    }

    async fn permission_state(&self) -> Option<PermissionState> {
        self.fix.map(|_| PermissionState::Granted)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted positioning source shared by tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub enum Step {
        Fix(f64, f64),
        Fail(i32),
        Hang,
    }

    pub struct ScriptedSource {
        supported: bool,
        steps: Mutex<VecDeque<Step>>,
        requests: Mutex<Vec<PositionRequest>>,
        permission: Option<PermissionState>,
    }

    impl ScriptedSource {
        pub fn new(steps: Vec<Step>) -> Self {
            Self {
                supported: true,
                steps: Mutex::new(steps.into()),
                requests: Mutex::new(Vec::new()),
                permission: None,
            }
        }

        pub fn unsupported() -> Self {
            Self {
                supported: false,
                ..Self::new(vec![])
            }
        }

        pub fn with_permission(mut self, state: PermissionState) -> Self {
            self.permission = Some(state);
            self
        }

        pub fn requests(&self) -> Vec<PositionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PositionSource for ScriptedSource {
        fn is_supported(&self) -> bool {
            self.supported
        }

        async fn current_position(&self, request: PositionRequest) -> Result<Fix, PositionFailure> {
            self.requests.lock().unwrap().push(request);
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Fix(latitude, longitude)) => Ok(Fix { latitude, longitude, accuracy_m: Some(12.0) }),
                Some(Step::Fail(code)) => Err(PositionFailure::new(code, "scripted")),
                Some(Step::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(PositionFailure::new(CODE_TIMEOUT, "hung"))
                }
                None => Err(PositionFailure::new(CODE_POSITION_UNAVAILABLE, "script exhausted")),
            }
        }

        async fn permission_state(&self) -> Option<PermissionState> {
            self.permission
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptedSource, Step};
    use super::*;

    fn provider(steps: Vec<Step>) -> (PositionProvider<ScriptedSource>, Arc<ScriptedSource>) {
        let source = Arc::new(ScriptedSource::new(steps));
        (PositionProvider::new(source.clone()), source)
    }

    #[tokio::test]
    async fn test_high_accuracy_success() {
        let (p, source) = provider(vec![Step::Fix(12.97, 77.59)]);
        let fix = p.get_position().await.unwrap();
        assert_eq!(fix.tier, AccuracyTier::High);
        assert_eq!(fix.coordinate, Coordinate::new(12.97, 77.59).unwrap());
        assert_eq!(source.requests(), vec![PositionRequest::HIGH_ACCURACY]);
    }

    #[tokio::test]
    async fn test_timeout_then_denied() {
        let (p, source) = provider(vec![Step::Fail(CODE_TIMEOUT), Step::Fail(CODE_PERMISSION_DENIED)]);
        let err = p.get_position().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert_eq!(err.original_code, Some(1));

        let requests = source.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].high_accuracy);
        assert!(!requests[1].high_accuracy);
        assert_eq!(requests[1].timeout, Duration::from_secs(20));
        assert_eq!(requests[1].max_cache_age, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_low_accuracy_success() {
        let (p, _) = provider(vec![Step::Fail(CODE_POSITION_UNAVAILABLE), Step::Fix(1.0, 2.0)]);
        let fix = p.get_position().await.unwrap();
        assert_eq!(fix.tier, AccuracyTier::Low);
        assert_eq!(fix.tier.source_tag(), SourceTag::DeviceLowAccuracy);
    }

    #[tokio::test]
    async fn test_second_error_is_reported() {
        let (p, _) = provider(vec![Step::Fail(CODE_PERMISSION_DENIED), Step::Fail(CODE_TIMEOUT)]);
        assert_eq!(p.get_position().await.unwrap_err().kind, ErrorKind::Timeout);

        let (p, _) = provider(vec![Step::Fail(1), Step::Fail(42)]);
        let err = p.get_position().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert_eq!(err.original_code, Some(42));
    }

    #[tokio::test]
    async fn test_unsupported_makes_no_attempt() {
        let source = Arc::new(ScriptedSource::unsupported());
        let p = PositionProvider::new(source.clone());
        assert_eq!(p.get_position().await.unwrap_err().kind, ErrorKind::Unsupported);
        assert!(source.requests().is_empty());
    }

    #[tokio::test]
    async fn test_skip_retry_on_denied() {
        let source = Arc::new(ScriptedSource::new(vec![Step::Fail(CODE_PERMISSION_DENIED), Step::Fix(1.0, 2.0)]));
        let p = PositionProvider::new(source.clone()).skip_retry_on_denied(true);
        assert_eq!(p.get_position().await.unwrap_err().kind, ErrorKind::PermissionDenied);
        assert_eq!(source.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_hanging_source_is_bounded() {
        let source = Arc::new(ScriptedSource::new(vec![Step::Hang, Step::Hang]));
        let fast = |high| PositionRequest {
            high_accuracy: high,
            timeout: Duration::from_millis(20),
            max_cache_age: Duration::ZERO,
        };
        let p = PositionProvider::new(source.clone()).with_tiers(fast(true), fast(false));
        let err = p.get_position().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_fix_is_unavailable() {
        let (p, _) = provider(vec![Step::Fix(91.0, 0.0), Step::Fix(0.0, 200.0)]);
        assert_eq!(p.get_position().await.unwrap_err().kind, ErrorKind::PositionUnavailable);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (p, source) = provider(vec![Step::Fix(1.0, 2.0)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = p.get_position_cancellable(&cancel).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(source.requests().is_empty());
    }

    #[tokio::test]
    async fn test_reported_coarse_fix_needs_retry() {
        let p = PositionProvider::new(Arc::new(ReportedPosition::coarse(12.97, 77.59, Some(2500.0))));
        let fix = p.get_position().await.unwrap();
        assert_eq!(fix.tier, AccuracyTier::Low);
        assert_eq!(fix.accuracy_m, Some(2500.0));
    }

    #[tokio::test]
    async fn test_reported_none_is_unsupported() {
        let p = PositionProvider::new(Arc::new(ReportedPosition::none()));
        assert_eq!(p.get_position().await.unwrap_err().kind, ErrorKind::Unsupported);
    }
}
