//! Launching minicap on a device and forwarding its socket.

use crate::config::StreamConfig;
use std::io;
use std::process::{Child, Command, Stdio};

pub const DEVICE_DIR: &str = "/data/local/tmp";
pub const DEFAULT_PORT: u16 = 37468;

/// How to start minicap and expose its framed socket on a local port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinicapCommand {
    pub adb_path: String,
    pub serial: Option<String>,
    /// Physical display size, as reported by the device.
    pub real_size: (u32, u32),
    /// Size of the frames minicap sends; the real size when `None`.
    pub virtual_size: Option<(u32, u32)>,
    /// Display rotation in degrees.
    pub rotation: u32,
    /// JPEG quality, 1-100.
    pub quality: u8,
    pub frame_rate: Option<u32>,
    /// Let minicap drop frames it cannot deliver in time.
    pub skip_frames: bool,
    pub port: u16,
}

impl MinicapCommand {
    pub fn new(adb_path: impl Into<String>, real_size: (u32, u32)) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial: None,
            real_size,
            virtual_size: None,
            rotation: 0,
            quality: StreamConfig::default().quality,
            frame_rate: None,
            skip_frames: true,
            port: DEFAULT_PORT,
        }
    }

    pub fn with_serial(mut self, serial: Option<String>) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Take quality and frame size from the stream settings.
    pub fn configured(mut self, config: &StreamConfig) -> Self {
        self.quality = config.quality;
        if config.target_size.is_some() {
            self.virtual_size = config.target_size;
        }
        self
    }

    /// `-P` projection: `{real}@{virtual}/{rotation}`.
    pub fn projection(&self) -> String {
        let (rw, rh) = self.real_size;
        let (vw, vh) = self.virtual_size.unwrap_or(self.real_size);
        format!("{}x{}@{}x{}/{}", rw, rh, vw, vh, self.rotation)
    }

    fn adb_prefix(&self) -> Vec<String> {
        match &self.serial {
            Some(serial) => vec!["-s".to_string(), serial.clone()],
            None => Vec::new(),
        }
    }

    /// Arguments to `adb` that run minicap in the device shell.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = self.adb_prefix();
        args.extend([
            "shell".to_string(),
            format!("LD_LIBRARY_PATH={}", DEVICE_DIR),
            format!("{}/minicap", DEVICE_DIR),
            "-P".to_string(),
            self.projection(),
            "-Q".to_string(),
            self.quality.to_string(),
        ]);
        if let Some(rate) = self.frame_rate {
            args.push("-r".to_string());
            args.push(rate.to_string());
        }
        if self.skip_frames {
            args.push("-S".to_string());
        }
        args
    }

    /// Arguments to `adb` that forward the local port to minicap's socket.
    pub fn forward_args(&self) -> Vec<String> {
        let mut args = self.adb_prefix();
        args.extend([
            "forward".to_string(),
            format!("tcp:{}", self.port),
            "localabstract:minicap".to_string(),
        ]);
        args
    }

    /// Start minicap on the device. The returned child keeps it running.
    pub fn spawn(&self) -> io::Result<Child> {
        tracing::info!(projection = %self.projection(), quality = self.quality, "Launching minicap");
        Command::new(&self.adb_path)
            .args(self.launch_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
    }

    /// Forward the local port, waiting for adb to finish.
    pub fn forward(&self) -> io::Result<()> {
        let status = Command::new(&self.adb_path)
            .args(self.forward_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;

        if !status.success() {
            return Err(io::Error::other(format!("adb forward exited with {}", status)));
        }
        tracing::debug!(port = self.port, "Forwarded minicap socket");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_arguments_carry_quality_and_projection() {
        let config = StreamConfig {
            quality: 80,
            target_size: Some((540, 960)),
            ..StreamConfig::default()
        };
        let command = MinicapCommand::new("adb", (1080, 1920))
            .with_serial(Some("emulator-5554".into()))
            .configured(&config);

        assert_eq!(
            command.launch_args(),
            vec![
                "-s",
                "emulator-5554",
                "shell",
                "LD_LIBRARY_PATH=/data/local/tmp",
                "/data/local/tmp/minicap",
                "-P",
                "1080x1920@540x960/0",
                "-Q",
                "80",
                "-S",
            ]
        );
    }

    #[test]
    fn test_forward_arguments() {
        let command = MinicapCommand::new("adb", (720, 1280)).with_port(40000);
        assert_eq!(
            command.forward_args(),
            vec!["forward", "tcp:40000", "localabstract:minicap"]
        );
        assert_eq!(command.projection(), "720x1280@720x1280/0");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_forward_is_an_error() {
        let command = MinicapCommand::new("false", (720, 1280));
        assert!(command.forward().is_err());
    }
}
