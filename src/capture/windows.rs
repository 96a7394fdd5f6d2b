//! GDI + DirectShow capture backend

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use tracing::debug;

use super::backend::{
    AudioCaptureApi, CaptureBackend, ManifestPaths, PlatformCapabilities, VideoCaptureApi,
};
use super::displays::{parse_screen_bounds, query};
use super::recording::Monitor;
use crate::config::Config;
use crate::devices::{parse_dshow_devices, run_enumeration, AudioDevice, WINDOWS_LOOPBACK_KEYWORDS};
use crate::error::CaptureError;

const LOOPBACK_BOOST: f64 = 2.5;
const BUNDLED_ENCODER: &str = "ffmpeg_files/ffmpeg.exe";

const SCREEN_BOUNDS_SCRIPT: &str = "Add-Type -AssemblyName System.Windows.Forms; \
    [System.Windows.Forms.Screen]::AllScreens | ForEach-Object { \
    '{0},{1},{2},{3}' -f $_.Bounds.X,$_.Bounds.Y,$_.Bounds.Width,$_.Bounds.Height }";

pub struct WindowsBackend {
    caps: PlatformCapabilities,
    static_displays: Vec<Monitor>,
}

/// Bundled encoder next to the executable, else whatever is on PATH
fn locate_encoder() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(BUNDLED_ENCODER)))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from("ffmpeg.exe"))
}

fn hidden_command(program: impl AsRef<std::ffi::OsStr>) -> Command {
    #[allow(unused_mut)]
    let mut command = Command::new(program);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        command.creation_flags(CREATE_NO_WINDOW);
    }
    command
}

impl WindowsBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            caps: PlatformCapabilities {
                video: VideoCaptureApi::GdiGrab,
                audio: AudioCaptureApi::DirectShow,
                encoder_path: config.encoder.path.clone().unwrap_or_else(locate_encoder),
                loopback_boost: config.devices.loopback_boost.unwrap_or(LOOPBACK_BOOST),
                loopback_keywords: WINDOWS_LOOPBACK_KEYWORDS,
                manifest_paths: ManifestPaths::Absolute,
            },
            static_displays: config.displays.clone(),
        }
    }
}

impl CaptureBackend for WindowsBackend {
    fn name(&self) -> &'static str {
        "gdigrab/dshow"
    }

    fn capabilities(&self) -> &PlatformCapabilities {
        &self.caps
    }

    fn try_list_devices(&self) -> Result<Vec<AudioDevice>, CaptureError> {
        let mut command = hidden_command(&self.caps.encoder_path);
        command.args(["-hide_banner", "-list_devices", "true", "-f", "dshow", "-i", "dummy"]);
        let raw = run_enumeration(command, true)?;
        let devices = parse_dshow_devices(&raw, self.caps.loopback_keywords);
        debug!("DirectShow reported {} audio device(s)", devices.len());
        Ok(devices)
    }

    fn list_monitors(&self) -> Vec<Monitor> {
        if !self.static_displays.is_empty() {
            return self.static_displays.clone();
        }
        let mut command = hidden_command("powershell");
        command.args(["-NoProfile", "-NonInteractive", "-Command", SCREEN_BOUNDS_SCRIPT]);
        query(command)
            .map(|out| parse_screen_bounds(&out))
            .unwrap_or_default()
    }

    fn open_output_location(&self, dir: &Path) -> anyhow::Result<()> {
        Command::new("explorer")
            .arg(dir)
            .spawn()
            .with_context(|| format!("Failed to open {:?} in explorer", dir))?;
        Ok(())
    }
}
