use anyhow::{anyhow, Context, Result};
use dvm_scan::{
    custom_plan, default_plan, default_relays, PlanParams, ScanOptions, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_GRACE, DEFAULT_IDLE_TIMEOUT, DEFAULT_TIMEOUT,
};
use dvm_scan::plan::{DEFAULT_ANNOUNCEMENT_LIMIT, DEFAULT_LIMIT};
use dvmscan_core::{parse_kinds, FilterSet, PublicKey};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vendor_store::DEFAULT_RESULT_CAP;

pub const DEFAULT_CONFIG: &str = "dvmscan.yaml";
pub const DEFAULT_OUTPUT: &str = "dvm_vendors.json";
pub const DEFAULT_LOG: &str = "dvm_scan_master.log";

/// `dvmscan.yaml`. Every key is optional.
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub relays: Option<Vec<String>>,
    pub limit: Option<usize>,
    pub announcement_limit: Option<usize>,
    /// Kind list such as "5000-5009,31990"; replaces the default plan.
    pub kinds: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub connect_timeout_seconds: Option<u64>,
    pub idle_timeout_seconds: Option<u64>,
    pub grace_seconds: Option<u64>,
    pub result_cap: Option<usize>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub verify_ids: Option<bool>,
    pub identity: Option<String>,
    pub output_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub format: Option<String>,
}

/// An explicit path must exist; the default file is used only if present.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    let cfg = serde_yaml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(Some(cfg))
}

/// Values given on the command line. They win over the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub relays: Vec<String>,
    pub limit: Option<usize>,
    pub kinds: Option<String>,
    pub timeout_secs: Option<u64>,
    pub out: Option<PathBuf>,
    pub log: Option<PathBuf>,
    pub no_verify: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub relays: Vec<String>,
    pub filters: Vec<FilterSet>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub grace: Duration,
    pub result_cap: usize,
    pub verify_ids: bool,
    pub identity: Option<PublicKey>,
    pub output_path: PathBuf,
    pub log_path: PathBuf,
}

impl Settings {
    pub fn resolve(cfg: &Config, cli: Overrides) -> Result<Settings> {
        let relays = if !cli.relays.is_empty() {
            cli.relays
        } else {
            cfg.relays.clone().filter(|r| !r.is_empty()).unwrap_or_else(default_relays)
        };

        let params = PlanParams {
            limit: cli.limit.or(cfg.limit).unwrap_or(DEFAULT_LIMIT),
            announcement_limit: cfg.announcement_limit.unwrap_or(DEFAULT_ANNOUNCEMENT_LIMIT),
            since: cfg.since,
            until: cfg.until,
        };
        let filters = match cli.kinds.as_deref().or(cfg.kinds.as_deref()) {
            Some(spec) => {
                let kinds = parse_kinds(spec).with_context(|| format!("invalid kinds {spec:?}"))?;
                custom_plan(&kinds, &params)
            }
            None => default_plan(&params),
        }
        .context("invalid scan filter")?;

        let identity = cfg
            .identity
            .as_deref()
            .map(PublicKey::from_hex)
            .transpose()
            .context("identity must be a hex public key")?;

        let result_cap = cfg.result_cap.unwrap_or(DEFAULT_RESULT_CAP);
        if result_cap == 0 {
            return Err(anyhow!("resultCap must be > 0"));
        }
        if cfg.connect_timeout_seconds == Some(0) {
            return Err(anyhow!("connectTimeoutSeconds must be > 0"));
        }
        if cfg.idle_timeout_seconds == Some(0) {
            return Err(anyhow!("idleTimeoutSeconds must be > 0"));
        }

        Ok(Settings {
            relays,
            filters,
            timeout: secs(cli.timeout_secs.or(cfg.timeout_seconds), DEFAULT_TIMEOUT),
            connect_timeout: secs(cfg.connect_timeout_seconds, DEFAULT_CONNECT_TIMEOUT),
            idle_timeout: secs(cfg.idle_timeout_seconds, DEFAULT_IDLE_TIMEOUT),
            grace: secs(cfg.grace_seconds, DEFAULT_GRACE),
            result_cap,
            verify_ids: !cli.no_verify && cfg.verify_ids.unwrap_or(true),
            identity,
            output_path: output_path(cfg, cli.out),
            log_path: cli.log.or_else(|| cfg.log_path.clone()).unwrap_or_else(|| DEFAULT_LOG.into()),
        })
    }

    pub fn scan_options(&self) -> ScanOptions {
        let mut opts = ScanOptions::new(self.relays.clone(), self.filters.clone());
        opts.timeout = self.timeout;
        opts.connect_timeout = self.connect_timeout;
        opts.idle_timeout = self.idle_timeout;
        opts.grace = self.grace;
        opts
    }
}

pub fn output_path(cfg: &Config, out: Option<PathBuf>) -> PathBuf {
    out.or_else(|| cfg.output_path.clone()).unwrap_or_else(|| DEFAULT_OUTPUT.into())
}

fn secs(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
relays:
  - wss://relay.one
  - wss://relay.two
limit: 25
announcementLimit: 300
timeoutSeconds: 12
graceSeconds: 1
resultCap: 10
since: 1700000000
verifyIds: false
outputPath: out/vendors.json
format: json
"#;

    #[test]
    fn parses_camel_case_keys() {
        let cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.relays.as_ref().unwrap().len(), 2);
        assert_eq!(cfg.announcement_limit, Some(300));
        assert_eq!(cfg.verify_ids, Some(false));
        assert_eq!(cfg.format.as_deref(), Some("json"));
    }

    #[test]
    fn file_values_fill_in_and_cli_wins() {
        let cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        let s = Settings::resolve(&cfg, Overrides::default()).unwrap();
        assert_eq!(s.relays, vec!["wss://relay.one", "wss://relay.two"]);
        assert_eq!(s.timeout, Duration::from_secs(12));
        assert_eq!(s.grace, Duration::from_secs(1));
        assert_eq!(s.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(s.filters[0].limit(), 300);
        assert_eq!(s.filters[1].limit(), 25);
        assert_eq!(s.filters[0].since(), Some(1_700_000_000));
        assert!(!s.verify_ids);
        assert_eq!(s.output_path, PathBuf::from("out/vendors.json"));
        assert_eq!(s.log_path, PathBuf::from(DEFAULT_LOG));

        let cli = Overrides {
            relays: vec!["wss://cli".into()],
            limit: Some(5),
            timeout_secs: Some(3),
            out: Some("cli.json".into()),
            ..Overrides::default()
        };
        let s = Settings::resolve(&cfg, cli).unwrap();
        assert_eq!(s.relays, vec!["wss://cli"]);
        assert_eq!(s.filters[1].limit(), 5);
        assert_eq!(s.timeout, Duration::from_secs(3));
        assert_eq!(s.output_path, PathBuf::from("cli.json"));
    }

    #[test]
    fn empty_config_uses_built_in_defaults() {
        let s = Settings::resolve(&Config::default(), Overrides::default()).unwrap();
        assert_eq!(s.relays.len(), 10);
        assert_eq!(s.filters.len(), 4);
        assert_eq!(s.result_cap, DEFAULT_RESULT_CAP);
        assert!(s.verify_ids);
        assert_eq!(s.output_path, PathBuf::from(DEFAULT_OUTPUT));
        assert_eq!(s.scan_options().timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_kinds = Overrides { kinds: Some("7000-6000".into()), ..Overrides::default() };
        assert!(Settings::resolve(&Config::default(), bad_kinds).is_err());
        let zero = Overrides { limit: Some(0), ..Overrides::default() };
        assert!(Settings::resolve(&Config::default(), zero).is_err());
        let cfg = Config { identity: Some("npub1xyz".into()), ..Config::default() };
        assert!(Settings::resolve(&cfg, Overrides::default()).is_err());
        let cfg = Config { since: Some(10), until: Some(5), ..Config::default() };
        assert!(Settings::resolve(&cfg, Overrides::default()).is_err());
        let cfg = Config { result_cap: Some(0), ..Config::default() };
        assert!(Settings::resolve(&cfg, Overrides::default()).is_err());
        let cfg = Config { connect_timeout_seconds: Some(0), ..Config::default() };
        let err = Settings::resolve(&cfg, Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("connectTimeoutSeconds"));
        let cfg = Config { idle_timeout_seconds: Some(0), ..Config::default() };
        let err = Settings::resolve(&cfg, Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("idleTimeoutSeconds"));
    }

    #[test]
    fn custom_kinds_replace_default_plan() {
        let cli = Overrides { kinds: Some("5100,5101".into()), ..Overrides::default() };
        let s = Settings::resolve(&Config::default(), cli).unwrap();
        assert_eq!(s.filters.len(), 1);
        assert_eq!(s.filters[0].expanded_kinds(), vec![5100, 5101]);
    }

    #[test]
    fn explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("missing.yaml"))).is_err());
        let path = dir.path().join("dvmscan.yaml");
        fs::write(&path, "limit: 7\n").unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().unwrap().limit, Some(7));
        fs::write(&path, "limit: [oops\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
