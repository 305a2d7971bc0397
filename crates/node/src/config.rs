use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ledgerd_chainstate::engine::DEFAULT_MAX_ORPHANS;
use ledgerd_consensus::params::{chain_params, Network};
use ledgerd_log::{Filter, Format, Level};

pub const CONF_FILE_NAME: &str = "ledgerd.conf";
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 15;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    Memory,
    Fjall,
}

impl Backend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Some(Self::Memory),
            "fjall" => Some(Self::Fjall),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Fjall => "fjall",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub conf_path: PathBuf,
    pub network: Network,
    pub log_filter: Filter,
    pub log_format: Format,
    pub log_timestamps: bool,
    /// `None` sizes the script pool from the available parallelism.
    pub script_threads: Option<usize>,
    pub checkpoints: bool,
    pub max_orphans: usize,
    pub imports: Vec<PathBuf>,
    pub fjall_cache_mb: Option<u64>,
    pub status_interval_secs: u64,
    /// Keep running after imports finish until interrupted.
    pub daemon: bool,
    pub status_json: bool,
}

#[derive(Debug)]
pub enum CliAction {
    Run(Config),
    PrintHelp,
    PrintVersion,
}

fn next_value<I>(args: &mut I, flag: &str) -> Result<String, String>
where
    I: Iterator<Item = String>,
{
    args.next()
        .ok_or_else(|| format!("missing value for {flag}\n{}", usage()))
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> Result<T, String> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| format!("invalid value '{value}' for {flag}\n{}", usage()))
}

pub fn parse_args_from<I>(raw_args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut backend = Backend::Fjall;
    let mut backend_set = false;
    let mut data_dir: Option<PathBuf> = None;
    let mut conf_path: Option<PathBuf> = None;
    let mut network = Network::Mainnet;
    let mut network_set = false;
    let mut log_filter = Filter::new(Level::Info);
    let mut log_filter_set = false;
    let mut log_format = Format::Text;
    let mut log_format_set = false;
    let mut log_timestamps = true;
    let mut log_timestamps_set = false;
    let mut script_threads: Option<usize> = None;
    let mut script_threads_set = false;
    let mut checkpoints = true;
    let mut checkpoints_set = false;
    let mut max_orphans = DEFAULT_MAX_ORPHANS;
    let mut max_orphans_set = false;
    let mut imports: Vec<PathBuf> = Vec::new();
    let mut fjall_cache_mb: Option<u64> = None;
    let mut fjall_cache_set = false;
    let mut status_interval_secs = DEFAULT_STATUS_INTERVAL_SECS;
    let mut status_interval_set = false;
    let mut daemon = false;
    let mut status_json = false;

    let mut args = raw_args.into_iter().peekable();
    if let Some(command) = args.peek() {
        match command.as_str() {
            "help" => return Ok(CliAction::PrintHelp),
            "version" => return Ok(CliAction::PrintVersion),
            _ => {}
        }
    }
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliAction::PrintHelp),
            "--version" | "-V" => return Ok(CliAction::PrintVersion),
            "--backend" => {
                let value = next_value(&mut args, "--backend")?;
                backend = Backend::parse(&value)
                    .ok_or_else(|| format!("invalid backend '{value}'\n{}", usage()))?;
                backend_set = true;
            }
            "--data-dir" => {
                data_dir = Some(PathBuf::from(next_value(&mut args, "--data-dir")?));
            }
            "--conf" => {
                conf_path = Some(PathBuf::from(next_value(&mut args, "--conf")?));
            }
            "--network" => {
                let value = next_value(&mut args, "--network")?;
                network = Network::parse(&value)
                    .ok_or_else(|| format!("invalid network '{value}'\n{}", usage()))?;
                network_set = true;
            }
            "--testnet" => {
                network = Network::Testnet;
                network_set = true;
            }
            "--regtest" => {
                network = Network::Regtest;
                network_set = true;
            }
            "--log-level" => {
                let value = next_value(&mut args, "--log-level")?;
                log_filter = Filter::parse(&value)
                    .map_err(|err| format!("invalid --log-level '{value}': {err}\n{}", usage()))?;
                log_filter_set = true;
            }
            "--log-format" => {
                let value = next_value(&mut args, "--log-format")?;
                log_format = Format::parse(&value)
                    .ok_or_else(|| format!("invalid log format '{value}'\n{}", usage()))?;
                log_format_set = true;
            }
            "--log-timestamps" => {
                log_timestamps = true;
                log_timestamps_set = true;
            }
            "--no-log-timestamps" => {
                log_timestamps = false;
                log_timestamps_set = true;
            }
            "--script-threads" => {
                let value = next_value(&mut args, "--script-threads")?;
                script_threads = match parse_number::<usize>(&value, "--script-threads")? {
                    0 => None,
                    threads => Some(threads),
                };
                script_threads_set = true;
            }
            "--checkpoints" => {
                checkpoints = true;
                checkpoints_set = true;
            }
            "--no-checkpoints" => {
                checkpoints = false;
                checkpoints_set = true;
            }
            "--max-orphans" => {
                let value = next_value(&mut args, "--max-orphans")?;
                max_orphans = parse_number(&value, "--max-orphans")?;
                max_orphans_set = true;
            }
            "--import" => {
                imports.push(PathBuf::from(next_value(&mut args, "--import")?));
            }
            "--fjall-cache-mb" => {
                let value = next_value(&mut args, "--fjall-cache-mb")?;
                fjall_cache_mb = Some(parse_number(&value, "--fjall-cache-mb")?);
                fjall_cache_set = true;
            }
            "--status-interval" => {
                let value = next_value(&mut args, "--status-interval")?;
                status_interval_secs = parse_number(&value, "--status-interval")?;
                status_interval_set = true;
            }
            "--daemon" => daemon = true,
            "--status-json" => status_json = true,
            other => return Err(format!("unknown argument '{other}'\n{}", usage())),
        }
    }

    let data_dir =
        data_dir.unwrap_or_else(|| PathBuf::from(chain_params(network).default_data_dir));
    let conf_path = conf_path.unwrap_or_else(|| data_dir.join(CONF_FILE_NAME));
    if let Some(conf) = load_conf(&conf_path)? {
        let last = |key: &str| conf.get(key).and_then(|values| values.last());
        let conf_error =
            |key: &str, raw: &str| format!("invalid {key} value '{raw}' in {}", conf_path.display());

        if !network_set {
            if let Some(raw) = last("network") {
                network = Network::parse(raw).ok_or_else(|| conf_error("network", raw))?;
            } else if let Some(raw) = last("regtest") {
                if parse_conf_bool(raw).ok_or_else(|| conf_error("regtest", raw))? {
                    network = Network::Regtest;
                }
            } else if let Some(raw) = last("testnet") {
                if parse_conf_bool(raw).ok_or_else(|| conf_error("testnet", raw))? {
                    network = Network::Testnet;
                }
            }
        }
        if !backend_set {
            if let Some(raw) = last("backend") {
                backend = Backend::parse(raw).ok_or_else(|| conf_error("backend", raw))?;
            }
        }
        if !log_filter_set {
            if let Some(raw) = last("loglevel") {
                log_filter = Filter::parse(raw).map_err(|_| conf_error("loglevel", raw))?;
            }
        }
        if !log_format_set {
            if let Some(raw) = last("logformat") {
                log_format = Format::parse(raw).ok_or_else(|| conf_error("logformat", raw))?;
            }
        }
        if !log_timestamps_set {
            if let Some(raw) = last("logtimestamps") {
                log_timestamps =
                    parse_conf_bool(raw).ok_or_else(|| conf_error("logtimestamps", raw))?;
            }
        }
        if !script_threads_set {
            if let Some(raw) = last("scriptthreads") {
                let threads: usize = raw.parse().map_err(|_| conf_error("scriptthreads", raw))?;
                script_threads = (threads > 0).then_some(threads);
            }
        }
        if !checkpoints_set {
            if let Some(raw) = last("checkpoints") {
                checkpoints = parse_conf_bool(raw).ok_or_else(|| conf_error("checkpoints", raw))?;
            }
        }
        if !max_orphans_set {
            if let Some(raw) = last("maxorphans") {
                max_orphans = raw.parse().map_err(|_| conf_error("maxorphans", raw))?;
            }
        }
        if !fjall_cache_set {
            if let Some(raw) = last("fjallcachemb") {
                fjall_cache_mb = Some(raw.parse().map_err(|_| conf_error("fjallcachemb", raw))?);
            }
        }
        if !status_interval_set {
            if let Some(raw) = last("statusinterval") {
                status_interval_secs =
                    raw.parse().map_err(|_| conf_error("statusinterval", raw))?;
            }
        }
        // Imports from the conf file come before those on the command line.
        if let Some(values) = conf.get("import") {
            let mut merged: Vec<PathBuf> = values.iter().map(PathBuf::from).collect();
            merged.append(&mut imports);
            imports = merged;
        }
    }

    Ok(CliAction::Run(Config {
        backend,
        data_dir,
        conf_path,
        network,
        log_filter,
        log_format,
        log_timestamps,
        script_threads,
        checkpoints,
        max_orphans,
        imports,
        fjall_cache_mb,
        status_interval_secs,
        daemon,
        status_json,
    }))
}

/// Read a `key=value` file. A missing file is not an error.
pub fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(format!("failed to read {}: {err}", path.display())),
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if let Some(idx) = line.find(['#', ';']) {
            line = &line[..idx];
        }
        line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

pub fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

pub fn usage() -> String {
    [
        "Usage:",
        "  ledgerd [options]",
        "  ledgerd <command>",
        "",
        "Commands:",
        "  help     Print this help and exit",
        "  version  Print version and exit",
        "",
        "Options:",
        "  --help, -h  Print this help and exit",
        "  --version, -V  Print version and exit",
        "  --network  mainnet|testnet|regtest (default: mainnet)",
        "  --testnet, --regtest  Shorthands for --network",
        "  --backend  Storage backend, memory|fjall (default: fjall)",
        "  --data-dir  Data directory (default: per-network ./data*)",
        "  --conf  Config file path (default: <data-dir>/ledgerd.conf)",
        "  --log-level  Level or filter, e.g. info,ledgerd_chainstate=debug (default: info)",
        "  --log-format  text|json (default: text)",
        "  --log-timestamps, --no-log-timestamps  Toggle timestamps in text logs",
        "  --script-threads  Script verifier threads, 0 = all cores (default: 0)",
        "  --checkpoints, --no-checkpoints  Enforce the checkpoint table (default: on)",
        "  --max-orphans  Blocks held while their parent is unknown (default: 100)",
        "  --import  Block file or directory of dataNNNNN.dat files (repeatable)",
        "  --fjall-cache-mb  Fjall block cache size",
        "  --status-interval  Seconds between status lines in daemon mode, 0 = off (default: 15)",
        "  --daemon  Keep running after imports until interrupted",
        "  --status-json  Print the final status as JSON",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliAction, String> {
        parse_args_from(args.iter().map(|arg| arg.to_string()))
    }

    fn run_config(args: &[&str]) -> Config {
        match parse(args).expect("parse") {
            CliAction::Run(config) => config,
            other => panic!("expected run config, got {other:?}"),
        }
    }

    #[test]
    fn commands_and_help_flags() {
        assert!(matches!(parse(&["help"]), Ok(CliAction::PrintHelp)));
        assert!(matches!(parse(&["version"]), Ok(CliAction::PrintVersion)));
        assert!(matches!(parse(&["--regtest", "-h"]), Ok(CliAction::PrintHelp)));
        assert!(parse(&["--bogus"]).is_err());
        assert!(parse(&["--backend"]).is_err());
    }

    #[test]
    fn conf_values_sit_under_flags() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conf = dir.path().join(CONF_FILE_NAME);
        fs::write(
            &conf,
            "# node settings\nregtest\nbackend=memory ; inline comment\nscriptthreads=3\ncheckpoints=0\nimport=a.dat\n",
        )
        .expect("write conf");
        let data_dir = dir.path().to_str().expect("utf-8 path");

        let config = run_config(&["--data-dir", data_dir, "--script-threads", "5", "--import", "b.dat"]);
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.script_threads, Some(5));
        assert!(!config.checkpoints);
        assert_eq!(
            config.imports,
            vec![PathBuf::from("a.dat"), PathBuf::from("b.dat")]
        );

        let config = run_config(&["--data-dir", data_dir, "--network", "testnet", "--checkpoints"]);
        assert_eq!(config.network, Network::Testnet);
        assert!(config.checkpoints);
        assert_eq!(config.script_threads, Some(3));
    }

    #[test]
    fn bad_conf_values_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conf = dir.path().join("custom.conf");
        fs::write(&conf, "backend=rocks\n").expect("write conf");
        let err = parse(&[
            "--data-dir",
            dir.path().to_str().expect("utf-8 path"),
            "--conf",
            conf.to_str().expect("utf-8 path"),
        ])
        .expect_err("bad backend");
        assert!(err.contains("backend"));
    }

    #[test]
    fn conf_bool_accepts_bare_keys() {
        assert_eq!(parse_conf_bool(""), Some(true));
        assert_eq!(parse_conf_bool("Yes"), Some(true));
        assert_eq!(parse_conf_bool("0"), Some(false));
        assert_eq!(parse_conf_bool("maybe"), None);
    }
}
