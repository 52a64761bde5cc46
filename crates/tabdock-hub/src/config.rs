use clap::Parser;
use std::time::Duration;
use tabdock_core::wire::DEFAULT_MAX_FRAME_BYTES;

use crate::scheduler::SchedulerConfig;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8765";
pub const DEFAULT_LOG_DIR: &str = ".tabdock/logs";

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: String,
    pub debug: bool,
    pub log_dir: String,
    pub debounce: Duration,
    pub gate_retry: Duration,
    pub write_timeout: Duration,
    pub ping_interval: Duration,
    pub viewport_height: u32,
    pub max_frame_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            debug: false,
            log_dir: String::new(),
            debounce: Duration::from_millis(150),
            gate_retry: Duration::from_millis(500),
            write_timeout: Duration::from_secs(2),
            ping_interval: Duration::from_secs(10),
            viewport_height: 600,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl Config {
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            debounce: self.debounce,
            gate_retry: self.gate_retry,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "tabdock-hub")]
pub struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long)]
    log_dir: Option<String>,
    #[arg(long, default_value_t = 150)]
    debounce_ms: u64,
    #[arg(long, default_value_t = 500)]
    gate_retry_ms: u64,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
    #[arg(long, default_value_t = 10)]
    ping_interval: u64,
    #[arg(long, default_value_t = 600)]
    viewport_height: u32,
}

pub fn load_config() -> Config {
    from_args(Args::parse())
}

pub fn from_args(args: Args) -> Config {
    Config {
        addr: resolve_addr(&args.addr),
        debug: args.debug || env_true("TABDOCK_DEBUG"),
        log_dir: resolve_log_dir(args.log_dir.as_deref()),
        debounce: Duration::from_millis(args.debounce_ms),
        gate_retry: Duration::from_millis(args.gate_retry_ms),
        write_timeout: Duration::from_secs(args.write_timeout.max(1)),
        ping_interval: Duration::from_secs(args.ping_interval),
        viewport_height: args.viewport_height,
        max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
    }
}

pub fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn resolve_addr(addr_flag: &str) -> String {
    if !addr_flag.trim().is_empty() {
        return addr_flag.trim().to_string();
    }
    if let Ok(value) = std::env::var("TABDOCK_ADDR") {
        if !value.trim().is_empty() {
            return value.trim().to_string();
        }
    }
    DEFAULT_ADDR.to_string()
}

/// An explicit empty `--log-dir ""` disables the log file.
fn resolve_log_dir(log_dir_flag: Option<&str>) -> String {
    if let Some(value) = log_dir_flag {
        return value.trim().to_string();
    }
    if let Ok(value) = std::env::var("TABDOCK_LOG_DIR") {
        return value.trim().to_string();
    }
    DEFAULT_LOG_DIR.to_string()
}
