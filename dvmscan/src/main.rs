use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use dvm_scan::{scan_and_persist, ScanError, ScanOrchestrator, ScanSession};
use relay_conn::WsConnector;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vendor_store::{ScanLog, VendorFile};

mod config;
mod summary;

const EXIT_OK: u8 = 0;
const EXIT_NO_RELAYS: u8 = 2;
const EXIT_PERSISTENCE: u8 = 3;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json }

impl OutputFormat {
    fn from_config(s: &str) -> Self {
        match s { "json" => OutputFormat::Json, _ => OutputFormat::Text }
    }
}

#[derive(Debug, Parser)]
#[command(name = "dvmscan", version, about = "Discover NIP-90 Data Vending Machines across Nostr relays")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./dvmscan.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Scan relays for DVM activity and merge it into the vendor file
    Scan {
        /// Relay URL (repeatable). Default: the built-in relay list.
        #[arg(long = "relay", value_name = "URL")]
        relays: Vec<String>,
        /// Per-filter event limit for results, requests and feedback
        #[arg(long)]
        limit: Option<usize>,
        /// Kinds to request instead of the default DVM plan (e.g. 5000-5009,31990)
        #[arg(long)]
        kinds: Option<String>,
        /// Global scan deadline in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Vendor file (read, merged, rewritten)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Scan log (appended)
        #[arg(long, value_name = "FILE")]
        log: Option<PathBuf>,
        /// Summary format: text or json
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        /// Accept events without recomputing their ids
        #[arg(long, default_value_t = false)]
        no_verify: bool,
    },
    /// Print the vendors stored by previous scans
    Vendors {
        /// Vendor file
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Show only the N most active vendors
        #[arg(long)]
        top: Option<usize>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Exit code: 0 saved, 2 no relay reachable, 3 vendor file or log unusable.
fn run(cli: Cli) -> Result<u8> {
    let loaded_cfg = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    match cli.command {
        Commands::Version => {
            println!("dvmscan {} (core {})", env!("CARGO_PKG_VERSION"), dvmscan_core::version());
            Ok(EXIT_OK)
        }
        Commands::Scan { relays, limit, kinds, timeout_secs, out, log, format, no_verify } => {
            let overrides = config::Overrides { relays, limit, kinds, timeout_secs, out, log, no_verify };
            let settings = config::Settings::resolve(&loaded_cfg, overrides)?;
            let format = format
                .or_else(|| loaded_cfg.format.as_deref().map(OutputFormat::from_config))
                .unwrap_or(OutputFormat::Text);
            let mut session = ScanSession::new(settings.scan_options())?.with_identity(settings.identity);

            let _ = rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider());

            let file = VendorFile::new(&settings.output_path).with_result_cap(settings.result_cap);
            let scan_log = match ScanLog::open(&settings.log_path) {
                Ok(l) => l,
                Err(e) => {
                    eprintln!("error: {e}");
                    return Ok(EXIT_PERSISTENCE);
                }
            };
            let orchestrator = ScanOrchestrator::new(WsConnector::new(settings.verify_ids));
            let rt = tokio::runtime::Runtime::new()?;
            let outcome = rt.block_on(scan_and_persist(&orchestrator, &mut session, &file, Some(&scan_log)));
            match outcome {
                Ok(result) => {
                    println!("{}", summary::render_report(&result.report, format)?);
                    info!(path = %file.path().display(), log = %scan_log.path().display(), "vendors saved");
                    Ok(EXIT_OK)
                }
                Err(ScanError::NoRelays(report)) => {
                    println!("{}", summary::render_report(&report, format)?);
                    eprintln!("error: no relay could be reached");
                    Ok(EXIT_NO_RELAYS)
                }
                Err(ScanError::Persistence(e)) => {
                    eprintln!("error: {e}");
                    Ok(EXIT_PERSISTENCE)
                }
            }
        }
        Commands::Vendors { out, format, top } => {
            let path = config::output_path(&loaded_cfg, out);
            let store = match VendorFile::new(&path).load() {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("error: {e}");
                    return Ok(EXIT_PERSISTENCE);
                }
            };
            println!("{}", summary::render_vendors(&store, top, format)?);
            Ok(EXIT_OK)
        }
    }
}
