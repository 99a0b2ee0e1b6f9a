//! `adb exec-out screenrecord` as an H.264 elementary stream source.

use crate::config::StreamConfig;
use crate::transport::PipeConnector;
use std::time::Duration;

/// Longest recording the device tool accepts.
pub const MAX_TIME_LIMIT: Duration = Duration::from_secs(180);

/// Default limit, one second under the maximum so the restart happens before
/// the device cuts the stream.
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(179);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenrecordCommand {
    pub adb_path: String,
    pub serial: Option<String>,
    pub bitrate: u32,
    pub size: Option<(u32, u32)>,
    pub time_limit: Duration,
}

impl ScreenrecordCommand {
    pub fn new(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial: None,
            bitrate: StreamConfig::default().bitrate,
            size: None,
            time_limit: DEFAULT_TIME_LIMIT,
        }
    }

    pub fn with_serial(mut self, serial: Option<String>) -> Self {
        self.serial = serial;
        self
    }

    /// Take bitrate, size and time limit from the stream settings.
    pub fn configured(mut self, config: &StreamConfig) -> Self {
        self.bitrate = config.bitrate;
        self.size = config.target_size;
        if let Some(limit) = config.session_time_limit {
            self.time_limit = limit;
        }
        self
    }

    /// Time limit passed to the device, capped at [`MAX_TIME_LIMIT`].
    pub fn effective_time_limit(&self) -> Duration {
        self.time_limit.min(MAX_TIME_LIMIT)
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(serial) = &self.serial {
            args.push("-s".to_string());
            args.push(serial.clone());
        }

        args.extend([
            "exec-out".to_string(),
            "screenrecord".to_string(),
            "--output-format=h264".to_string(),
            "--bit-rate".to_string(),
            self.bitrate.to_string(),
        ]);

        if let Some((w, h)) = self.size {
            args.push("--size".to_string());
            args.push(format!("{}x{}", w, h));
        }

        let limit = self.effective_time_limit().as_secs();
        if limit > 0 {
            args.push("--time-limit".to_string());
            args.push(limit.to_string());
        }

        args.push("-".to_string());
        args
    }

    pub fn connector(&self) -> PipeConnector {
        PipeConnector::new(self.adb_path.clone(), self.args())
    }
}
