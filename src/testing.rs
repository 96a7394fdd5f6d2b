//! Test doubles shared across module tests

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::capture::{
    AudioCaptureApi, CaptureBackend, ManifestPaths, Monitor, PlatformCapabilities, VideoCaptureApi,
};
use crate::devices::{AudioDevice, LINUX_LOOPBACK_KEYWORDS};
use crate::error::CaptureError;

pub fn device(id: &str) -> AudioDevice {
    AudioDevice {
        id: id.to_string(),
        display_name: format!("{} device", id),
        is_loopback: false,
    }
}

pub fn monitor_1080p() -> Monitor {
    Monitor {
        x: 0,
        y: 0,
        width: 1920,
        height: 1080,
    }
}

/// Backend with a scripted device list and encoder
pub struct FakeBackend {
    caps: PlatformCapabilities,
    devices: Mutex<Vec<AudioDevice>>,
    fail_enumeration: AtomicBool,
}

impl FakeBackend {
    pub fn new(devices: Vec<AudioDevice>) -> Self {
        Self::with_encoder(devices, PathBuf::from("/nonexistent/encoder"))
    }

    pub fn with_encoder(devices: Vec<AudioDevice>, encoder: PathBuf) -> Self {
        Self {
            caps: PlatformCapabilities {
                video: VideoCaptureApi::X11Grab {
                    display: ":0.0".to_string(),
                },
                audio: AudioCaptureApi::Pulse,
                encoder_path: encoder,
                loopback_boost: 1.5,
                loopback_keywords: LINUX_LOOPBACK_KEYWORDS,
                manifest_paths: ManifestPaths::FileName,
            },
            devices: Mutex::new(devices),
            fail_enumeration: AtomicBool::new(false),
        }
    }

    pub fn set_devices(&self, devices: Vec<AudioDevice>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn set_enumeration_failure(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::SeqCst);
    }
}

impl CaptureBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn capabilities(&self) -> &PlatformCapabilities {
        &self.caps
    }

    fn try_list_devices(&self) -> Result<Vec<AudioDevice>, CaptureError> {
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(CaptureError::Enumeration("fake failure".to_string()));
        }
        Ok(self.devices.lock().unwrap().clone())
    }

    fn list_monitors(&self) -> Vec<Monitor> {
        vec![
            monitor_1080p(),
            Monitor {
                x: 1920,
                y: 0,
                width: 1280,
                height: 1024,
            },
        ]
    }

    fn open_output_location(&self, _dir: &Path) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Write an executable shell script standing in for the encoder
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Encoder double: merges on `-f concat`, otherwise records until `q`
///
/// The output path is always the last argument; the concat manifest follows
/// `-i`.
#[cfg(unix)]
pub const COOPERATIVE_ENCODER: &str = r#"prev=""
for last in "$@"; do
  if [ "$prev" = "-i" ]; then input="$last"; fi
  prev="$last"
done
case " $* " in
  *" concat "*)
    cat "$input" > "$last"
    exit 0
    ;;
esac
printf 'segment' > "$last"
echo "frame=    1 fps=0.0 q=0.0 size=       0kB" >&2
head -c 1 > /dev/null
exit 0"#;

/// Encoder double that ignores `q` and only dies on a signal
#[cfg(unix)]
pub const STUBBORN_ENCODER: &str = r#"for last in "$@"; do :; done
printf 'segment' > "$last"
trap 'exit 143' TERM
while true; do sleep 0.05; done"#;

/// Encoder double whose merge step fails
#[cfg(unix)]
pub const FAILING_CONCAT_ENCODER: &str = r#"for last in "$@"; do :; done
case " $* " in
  *" concat "*)
    echo "concat_list.txt: Invalid data found when processing input" >&2
    exit 1
    ;;
esac
printf 'segment' > "$last"
head -c 1 > /dev/null
exit 0"#;
