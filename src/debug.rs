use parking_lot::Mutex;
/// Log bridge for script-host
///
/// Routes every `log::info!()` / `log::warn!()` etc. from all workspace crates
/// to a single debug file:
///
/// - `/tmp/script_host_debug.log` on Unix/macOS
/// - `%TEMP%\script_host_debug.log` on Windows
///
/// Stdout is reserved for the routed event stream, so diagnostics never go
/// there. When `RUST_LOG` is set, records are mirrored to stderr as well.
///
/// Level precedence: `--log-level` flag, then `RUST_LOG`, then the config file.
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{LevelFilter, Log, Metadata, Record};

/// Path of the debug log file.
pub fn log_path() -> PathBuf {
    #[cfg(unix)]
    {
        PathBuf::from("/tmp/script_host_debug.log")
    }
    #[cfg(not(unix))]
    {
        std::env::temp_dir().join("script_host_debug.log")
    }
}

struct LogBridge {
    level: LevelFilter,
    file: Option<Mutex<File>>,
    mirror_stderr: bool,
}

impl LogBridge {
    fn new(level: LevelFilter, mirror_stderr: bool) -> Self {
        let file = if level != LevelFilter::Off {
            OpenOptions::new()
                .write(true)
                .truncate(true)
                .create(true)
                .open(log_path())
                .ok()
        } else {
            None
        };

        let bridge = LogBridge {
            level,
            file: file.map(Mutex::new),
            mirror_stderr,
        };
        bridge.write_raw(&format!(
            "\n{}\nscript-host debug session started at {} (level={})\n{}\n",
            "=".repeat(80),
            get_timestamp(),
            level,
            "=".repeat(80)
        ));
        bridge
    }

    fn write_raw(&self, msg: &str) {
        if let Some(file) = &self.file {
            let mut file = file.lock();
            let _ = file.write_all(msg.as_bytes());
            let _ = file.flush();
        }
    }
}

impl Log for LogBridge {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(
            &get_timestamp(),
            record.level(),
            record.target(),
            &record.args().to_string(),
        );
        self.write_raw(&line);
        if self.mirror_stderr {
            eprint!("{line}");
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.lock().flush();
        }
    }
}

static BRIDGE: OnceLock<LogBridge> = OnceLock::new();

fn get_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}

fn format_line(timestamp: &str, level: log::Level, target: &str, msg: &str) -> String {
    format!("[{timestamp}] [{level:<5}] [{target}] {msg}\n")
}

/// Parse a `RUST_LOG`-style value into a single level.
///
/// Per-module directives are not supported; the last level named wins, so
/// `script_host=debug` and `warn,script_host=debug` both yield `Debug`.
pub fn parse_env_level(value: &str) -> Option<LevelFilter> {
    value
        .split(',')
        .rev()
        .filter_map(|directive| directive.rsplit('=').next())
        .find_map(|level| level.trim().parse().ok())
}

/// Pick the effective level: CLI flag, then `RUST_LOG`, then config.
pub fn resolve_level(
    cli_level: Option<LevelFilter>,
    env_value: Option<&str>,
    config_level: LevelFilter,
) -> LevelFilter {
    cli_level
        .or_else(|| env_value.and_then(parse_env_level))
        .unwrap_or(config_level)
}

/// Install the log bridge as the global `log` backend.
///
/// Safe to call more than once; only the first call takes effect.
pub fn init_log_bridge(cli_level: Option<LevelFilter>, config_level: LevelFilter) {
    let env_value = std::env::var("RUST_LOG").ok();
    let level = resolve_level(cli_level, env_value.as_deref(), config_level);
    let bridge = BRIDGE.get_or_init(|| LogBridge::new(level, env_value.is_some()));
    if log::set_logger(bridge).is_ok() {
        log::set_max_level(level);
    }
}
