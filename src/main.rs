use clap::{Parser, Subcommand};
use locus::config::LocatorConfig;
use locus::location::{
    Coordinate, ErrorKind, HttpClient, LocationOrchestrator, LocationResult, PlatformFamily, PositionSource, ReportedPosition,
    UreqClient,
};
use locus::logging::init_logging;
use serde::Serialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Locus: resolve where a customer is into a delivery address.
///
/// Tries the device fix first (with reverse geocoding), then the network
/// address, and finally asks for coordinates to be picked by hand.
///
/// Examples:
///   locus locate --lat 12.9716 --lon 77.5946
///   locus locate --manual --lat 12.9716 --lon 77.5946 --address "MG Road"
///   locus ip --ip 203.0.113.9
///   locus ip --check
///   locus distance 12.97 77.59 28.61 77.21
///   locus serve --port 3000
#[derive(Parser)]
#[command(name = "locus", version, about, long_about = None)]
struct Cli {
    /// Config file. Defaults to ~/.locus/config.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enables the Google geocoding provider.
    #[arg(long, env = "GOOGLE_MAPS_API_KEY", hide_env_values = true, global = true)]
    google_api_key: Option<String>,

    /// Log filter, e.g. "debug" or "locus=trace".
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the cascade: device fix, then IP, then manual.
    Locate {
        /// Latitude of the device fix (-90 to 90).
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude of the device fix (-180 to 180).
        #[arg(long, allow_hyphen_values = true)]
        lon: Option<f64>,

        /// The fix is coarse (network based) and only satisfies the low-accuracy tier.
        #[arg(long)]
        low_accuracy: bool,

        /// Uncertainty radius of the fix in metres.
        #[arg(long)]
        accuracy_m: Option<f64>,

        /// Treat --lat/--lon as a hand-picked point and skip the cascade.
        #[arg(long)]
        manual: bool,

        /// Address label for a manual pick.
        #[arg(long, requires = "manual")]
        address: Option<String>,

        /// Platform whose permission steps to print on denial.
        #[arg(long, default_value = "other")]
        platform: PlatformFamily,
    },

    /// Estimate location from a network address (default: this machine's).
    Ip {
        #[arg(long)]
        ip: Option<IpAddr>,

        /// Query every IP service and report each one's status.
        #[arg(long)]
        check: bool,
    },

    /// Great-circle distance in kilometres.
    Distance {
        #[arg(allow_hyphen_values = true)]
        lat1: f64,
        #[arg(allow_hyphen_values = true)]
        lon1: f64,
        #[arg(allow_hyphen_values = true)]
        lat2: f64,
        #[arg(allow_hyphen_values = true)]
        lon2: f64,
    },

    /// Print how to re-enable location access.
    Instructions {
        /// Browser User-Agent string to detect the platform from.
        #[arg(long)]
        user_agent: Option<String>,

        /// Platform name (chrome, edge, firefox, safari, other).
        #[arg(long, conflicts_with = "user_agent")]
        platform: Option<PlatformFamily>,
    },

    /// Start the HTTP API.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, short = 'p', default_value_t = 3000)]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // ── Configuration ───────────────────────────────────────────

    let loaded = match &cli.config {
        Some(path) => LocatorConfig::load_from(path).map(|mut c| {
            c.apply_env(|k| std::env::var(k).ok());
            c
        }),
        None => LocatorConfig::load(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });
    if let Some(key) = cli.google_api_key.filter(|k| !k.trim().is_empty()) {
        config.google_api_key = Some(key);
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_logging(&config.logging);

    // ── Dispatch ────────────────────────────────────────────────

    match cli.command {
        Command::Locate {
            lat,
            lon,
            low_accuracy,
            accuracy_m,
            manual,
            address,
            platform,
        } => {
            if manual {
                let (Some(lat), Some(lon)) = (lat, lon) else {
                    eprintln!("Error: --manual needs both --lat and --lon.");
                    std::process::exit(1);
                };
                emit(&LocationResult::manual(parse_coordinate(lat, lon), address));
                return;
            }
            let source = match (lat, lon) {
                (Some(lat), Some(lon)) => {
                    let c = parse_coordinate(lat, lon);
                    if low_accuracy {
                        ReportedPosition::coarse(c.latitude, c.longitude, accuracy_m)
                    } else {
                        ReportedPosition::precise(c.latitude, c.longitude, accuracy_m)
                    }
                }
                (None, None) => ReportedPosition::none(),
                _ => {
                    eprintln!("Error: Provide both --lat and --lon, or neither.");
                    std::process::exit(1);
                }
            };
            locate(&config, Arc::new(source), platform).await;
        }

        Command::Ip { ip, check } => {
            let orchestrator = orchestrator(&config, Arc::new(ReportedPosition::none()));
            if check {
                let checks = orchestrator.check_ip_services(ip).await;
                for c in &checks {
                    match (&c.location, &c.error) {
                        (Some(location), _) => eprintln!("  ok    {:<12} {} ({}ms)", c.provider, location, c.elapsed_ms),
                        (None, Some(error)) => eprintln!("  fail  {:<12} {} ({}ms)", c.provider, error, c.elapsed_ms),
                        (None, None) => eprintln!("  fail  {:<12} ({}ms)", c.provider, c.elapsed_ms),
                    }
                }
                emit(&checks);
                if !checks.iter().any(|c| c.ok) {
                    std::process::exit(2);
                }
                return;
            }
            let result = match ip {
                Some(ip) => orchestrator.ip_location_for(ip).await,
                None => orchestrator.ip_location().await,
            };
            match result {
                Some(r) => emit(&r),
                None => {
                    eprintln!("Error: No IP provider could estimate the location.");
                    std::process::exit(2);
                }
            }
        }

        Command::Distance { lat1, lon1, lat2, lon2 } => {
            let a = parse_coordinate(lat1, lon1);
            let b = parse_coordinate(lat2, lon2);
            let km = LocationOrchestrator::calculate_distance(a.latitude, a.longitude, b.latitude, b.longitude);
            emit(&serde_json::json!({ "distance_km": km }));
        }

        Command::Instructions { user_agent, platform } => {
            let platform = platform
                .or_else(|| user_agent.as_deref().map(PlatformFamily::from_user_agent))
                .unwrap_or(PlatformFamily::Other);
            println!("{}", LocationOrchestrator::location_instructions(platform));
        }

        Command::Serve { host, port } => {
            if let Err(e) = locus::server::start(&host, port, config).await {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn orchestrator(config: &LocatorConfig, source: Arc<dyn PositionSource>) -> LocationOrchestrator {
    let http: Arc<dyn HttpClient> = Arc::new(UreqClient::new(&config.user_agent));
    LocationOrchestrator::from_config(config, source, http)
}

/// Tier 1, then tier 2, then a request for a manual pick. Ctrl-C cancels
/// whatever tier is in flight.
async fn locate(config: &LocatorConfig, source: Arc<dyn PositionSource>, platform: PlatformFamily) {
    let orchestrator = orchestrator(config, source);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    // ── Tier 1: device fix ──────────────────────────────────────

    let err = match orchestrator.current_location_with_address_cancellable(&cancel).await {
        Ok(result) => {
            emit(&result);
            return;
        }
        Err(e) => e,
    };

    eprintln!("  {}", err.guidance());
    if err.kind == ErrorKind::PermissionDenied {
        eprintln!();
        eprintln!("{}", platform.instructions());
    }
    if !err.escalates_to_ip() {
        eprintln!("Error: {}", err);
        std::process::exit(130);
    }

    // ── Tier 2: network address ─────────────────────────────────

    eprintln!("  Falling back to approximate location from your network address...");
    if let Some(result) = orchestrator.ip_location_cancellable(&cancel).await {
        emit(&result);
        return;
    }
    if cancel.is_cancelled() {
        std::process::exit(130);
    }

    // ── Tier 3: manual ──────────────────────────────────────────

    warn!("all automatic tiers exhausted");
    eprintln!("Error: Could not determine your location automatically.");
    eprintln!();
    eprintln!("Pick the point on a map and pass it in:");
    eprintln!("  locus locate --manual --lat 12.9716 --lon 77.5946 --address \"MG Road, Bangalore\"");
    std::process::exit(2);
}

fn parse_coordinate(lat: f64, lon: f64) -> Coordinate {
    Coordinate::new(lat, lon).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    })
}

/// JSON to stdout.
fn emit<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: cannot serialize result: {}", e);
            std::process::exit(1);
        }
    }
}
