use crate::error::CaptureError;
use common::Backoff;
use common::config::{env_opt, env_or};
use framebuf::MAX_CAPACITY;
use std::env;
use std::time::Duration;

pub use common::Environment;

pub const DEFAULT_MINICAP_ADDR: &str = "127.0.0.1:37468";

/// Per-session capture settings. Validated once when a stream is built.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// `None` keeps the source-native resolution.
    pub target_size: Option<(u32, u32)>,
    /// Bits per second for encoding sources.
    pub bitrate: u32,
    /// JPEG quality (1-100) for sources that compress.
    pub quality: u8,
    pub buffer_capacity: usize,
    /// Sleep between reads when the transport reports no data yet.
    pub idle_interval: Duration,
    /// Restart the session after this long; some sources cap recording length.
    pub session_time_limit: Option<Duration>,
    /// Upper bound on a single blocking read.
    pub read_timeout: Duration,
    /// Upper bound on connecting plus banner negotiation.
    pub connect_timeout: Duration,
    pub chunk_size: usize,
    /// Largest payload a length prefix may declare.
    pub max_payload_len: usize,
    /// Reconnect after a mid-stream failure. The initial connect is never retried.
    pub reconnect: Option<Backoff>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            target_size: None,
            bitrate: 20_000_000,
            quality: 100,
            buffer_capacity: 10,
            idle_interval: Duration::from_millis(5),
            session_time_limit: None,
            read_timeout: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(5),
            chunk_size: 64 * 1024,
            max_payload_len: 64 * 1024 * 1024,
            reconnect: None,
        }
    }
}

impl StreamConfig {
    /// Load overrides from environment variables on top of the defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let target_size = match (
            env_opt::<u32>("TARGET_WIDTH"),
            env_opt::<u32>("TARGET_HEIGHT"),
        ) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => None,
        };

        let bitrate = match env::var("BITRATE") {
            Ok(raw) => parse_bitrate(&raw)?,
            Err(_) => defaults.bitrate,
        };

        let reconnect = env_opt::<u32>("RECONNECT_ATTEMPTS")
            .filter(|&attempts| attempts > 0)
            .map(|attempts| Backoff {
                max_attempts: attempts,
                ..Backoff::default()
            });

        Ok(Self {
            target_size,
            bitrate,
            quality: env_or("QUALITY", defaults.quality),
            buffer_capacity: env_or("BUFFER_CAPACITY", defaults.buffer_capacity),
            idle_interval: Duration::from_millis(env_or("IDLE_INTERVAL_MS", 5)),
            session_time_limit: env_opt::<u64>("SESSION_TIME_LIMIT_S").map(Duration::from_secs),
            read_timeout: Duration::from_millis(env_or("READ_TIMEOUT_MS", 100)),
            connect_timeout: Duration::from_millis(env_or("CONNECT_TIMEOUT_MS", 5000)),
            chunk_size: defaults.chunk_size,
            max_payload_len: defaults.max_payload_len,
            reconnect,
        })
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if let Some((w, h)) = self.target_size {
            if w == 0 || h == 0 {
                return Err(invalid(format!("target size {}x{} must be non-zero", w, h)));
            }
            if w % 2 != 0 || h % 2 != 0 {
                return Err(invalid(format!("target size {}x{} must be even", w, h)));
            }
        }
        if self.bitrate == 0 {
            return Err(invalid("bitrate must be positive"));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(invalid(format!("quality {} outside 1..=100", self.quality)));
        }
        if self.buffer_capacity == 0 || self.buffer_capacity > MAX_CAPACITY {
            return Err(invalid(format!(
                "buffer capacity {} outside 1..={}",
                self.buffer_capacity, MAX_CAPACITY
            )));
        }
        if self.idle_interval > Duration::from_secs(1) {
            return Err(invalid("idle interval above 1s"));
        }
        if self.session_time_limit.is_some_and(|limit| limit.is_zero()) {
            return Err(invalid("session time limit must be positive"));
        }
        if self.read_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(invalid("read and connect timeouts must be positive"));
        }
        if self.chunk_size == 0 || self.max_payload_len == 0 {
            return Err(invalid("chunk size and payload limit must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> CaptureError {
    CaptureError::Config(message.into())
}

/// Parse bitrates written like `"20M"`, `"500K"` or `"8000000"`.
pub fn parse_bitrate(raw: &str) -> Result<u32, CaptureError> {
    let raw = raw.trim();
    let (digits, multiplier) = match raw.chars().last() {
        Some('M' | 'm') => (&raw[..raw.len() - 1], 1_000_000u64),
        Some('K' | 'k') => (&raw[..raw.len() - 1], 1_000u64),
        _ => (raw, 1u64),
    };

    digits
        .parse::<u64>()
        .ok()
        .and_then(|value| value.checked_mul(multiplier))
        .and_then(|bps| u32::try_from(bps).ok())
        .filter(|&bps| bps > 0)
        .ok_or_else(|| invalid(format!("unparsable bitrate {:?}", raw)))
}

/// Which producer the binary drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Minicap,
    Screenrecord,
}

impl SourceKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "minicap" => Some(SourceKind::Minicap),
            "screenrecord" | "adbblitz" => Some(SourceKind::Screenrecord),
            _ => None,
        }
    }
}

/// Settings for the `screenstream` binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub source: SourceKind,
    pub minicap_addr: String,
    pub adb_path: String,
    pub adb_serial: Option<String>,
    /// Physical display size; when set, the binary launches minicap itself.
    pub device_size: Option<(u32, u32)>,
    /// Wait after launching minicap before connecting.
    pub minicap_start_delay: Duration,
    pub otel_endpoint: Option<String>,
    pub report_interval: Duration,
    pub stream: StreamConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let source = match env::var("SOURCE") {
            Ok(raw) => SourceKind::parse(&raw)
                .ok_or_else(|| anyhow::anyhow!("Unknown SOURCE {:?}", raw))?,
            Err(_) => SourceKind::Minicap,
        };

        let minicap_addr =
            env::var("MINICAP_ADDR").unwrap_or_else(|_| DEFAULT_MINICAP_ADDR.to_string());
        let adb_path = env::var("ADB_PATH").unwrap_or_else(|_| "adb".to_string());
        let adb_serial = env::var("ADB_SERIAL").ok().filter(|s| !s.is_empty());
        let device_size = match (
            env_opt::<u32>("DEVICE_WIDTH"),
            env_opt::<u32>("DEVICE_HEIGHT"),
        ) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        };
        let minicap_start_delay = Duration::from_millis(env_or("MINICAP_START_DELAY_MS", 3000));
        let otel_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|s| !s.is_empty());
        let report_interval = Duration::from_millis(env_or("REPORT_INTERVAL_MS", 1000));

        Ok(Self {
            environment,
            source,
            minicap_addr,
            adb_path,
            adb_serial,
            device_size,
            minicap_start_delay,
            otel_endpoint,
            report_interval,
            stream: StreamConfig::from_env()?,
        })
    }
}
