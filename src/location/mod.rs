//! Location resolution subsystem for Locus.
//!
//! Turns "where is the user" into a delivery address through a cascade:
//! device positioning with reverse geocoding, then IP geolocation, then the
//! caller's manual picker.

pub mod distance;
pub mod geocoding;
pub mod http;
pub mod instructions;
pub mod ip;
pub mod orchestrator;
pub mod permission;
pub mod position;
pub mod types;

pub use distance::distance_km;
pub use geocoding::{GeocodedAddress, GeocodingResolver};
pub use http::{HttpClient, UreqClient};
pub use instructions::PlatformFamily;
pub use ip::{IpLocationResolver, ProviderCheck};
pub use orchestrator::LocationOrchestrator;
pub use permission::{PermissionState, SupportReport};
pub use position::{PositionProvider, PositionSource, ReportedPosition};
pub use types::{AddressComponents, Coordinate, ErrorKind, LocationResult, ResolutionError, SourceTag};
