use crate::analysis::AnalysisBackend;
use clap::Parser;

/// CLI surface for the bot
#[derive(Parser, Debug, Clone)]
#[command(name = "listingbot", about = "Monitors new exchange listings and trades them")]
pub struct Cli {
    /// Simulate order execution instead of sending real orders
    #[arg(long)]
    pub dry_run: bool,

    /// Quote asset used to filter tradable pairs
    #[arg(long, default_value = "USDT")]
    pub quote_asset: String,

    /// Minutes between listing reconciliation passes
    #[arg(long, default_value_t = 5)]
    pub reconcile_interval_minutes: u64,

    /// Seconds between exit checks on open positions
    #[arg(long, default_value_t = 60)]
    pub exit_check_interval_secs: u64,

    /// Chart analysis backend: openai, claude or none
    #[arg(long, default_value = "none")]
    pub analysis_backend: AnalysisBackendArg,
}

/// clap-friendly wrapper over the backend selection
#[derive(Debug, Clone)]
pub struct AnalysisBackendArg(pub AnalysisBackend);

impl std::str::FromStr for AnalysisBackendArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(AnalysisBackendArg)
    }
}

/// Environment-injected settings, validated at startup
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub api_secret: String,
    pub database_url: Option<String>,
    /// Percent of the free quote balance committed per entry
    pub risk_pct: f64,
    /// Assumed quote balance for sizing simulated entries
    pub dry_run_quote_balance: f64,
}

impl Settings {
    /// Read settings from the environment.
    ///
    /// API credentials are mandatory for live trading; in dry-run mode the
    /// signed endpoints are never called, so placeholders are tolerated.
    pub fn from_env(dry_run: bool) -> crate::Result<Self> {
        let api_key = std::env::var("BINANCE_API_KEY").ok();
        let api_secret = std::env::var("BINANCE_API_SECRET").ok();

        let (api_key, api_secret) = match (api_key, api_secret) {
            (Some(key), Some(secret)) => (key, secret),
            _ if dry_run => (String::new(), String::new()),
            _ => {
                return Err(
                    "BINANCE_API_KEY and BINANCE_API_SECRET must be set for live trading".into(),
                )
            }
        };

        Ok(Self {
            api_key,
            api_secret,
            database_url: std::env::var("DATABASE_URL").ok(),
            risk_pct: env_f64("POSITION_RISK_PCT", 5.0),
            dry_run_quote_balance: env_f64("DRY_RUN_QUOTE_BALANCE", 10_000.0),
        })
    }
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
