//! Audio device enumeration parsing
//!
//! Enumeration shells out to platform tools (`pactl` on Linux, the encoder's
//! DirectShow listing on Windows). The parsers here are pure so both
//! platforms' output formats are testable anywhere.

use std::process::Command;

use serde::Serialize;

use crate::error::CaptureError;

/// Name fragments marking a Linux source as system audio (sink monitors etc.)
pub const LINUX_LOOPBACK_KEYWORDS: &[&str] = &[
    "monitor",
    "loopback",
    "what you hear",
    "stereo mix",
    "built-in audio analog stereo",
    "output",
    "sink",
];

/// Localized "Stereo Mix" style names used by Windows drivers
pub const WINDOWS_LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "mezcla estéreo",
    "mezcla estereo",
    "mixage stéréo",
    "stereo-mix",
    "stereomix",
    "what u hear",
    "wave out mix",
    "rec. playback",
    "立體聲混音",
    "立体声混音",
    "ステレオミキサー",
    "스테레오 믹스",
    "stereomikser",
    "mikser stereo",
    "стерео микшер",
    "áudio do sistema",
    "loop",
];

/// One enumerable audio input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioDevice {
    /// Identifier passed to the encoder's audio input
    pub id: String,
    /// Human readable label
    pub display_name: String,
    /// Captures system output rather than a microphone
    pub is_loopback: bool,
}

/// Case-insensitive keyword match against a device name
pub fn is_loopback_name(name: &str, keywords: &[&str]) -> bool {
    let lower = name.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

/// Decode a raw device name as UTF-8, falling back to Latin-1
pub fn normalize_device_name(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => raw.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Parse `pactl list sources` output
///
/// Each source block carries a `Name:` line followed by a `Description:`
/// line; a device is emitted once both are seen.
pub fn parse_pactl_sources(raw: &[u8], keywords: &[&str]) -> Vec<AudioDevice> {
    let mut devices = Vec::new();
    let mut current: Option<String> = None;

    for line in raw.split(|&b| b == b'\n') {
        let line = normalize_device_name(line);
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("Name:") {
            current = rest.split_whitespace().next().map(str::to_string);
        } else if let Some(rest) = line.strip_prefix("Description:") {
            if let Some(id) = current.take() {
                let display_name = format!("{} ({})", rest.trim(), id);
                devices.push(AudioDevice {
                    is_loopback: is_loopback_name(&display_name, keywords),
                    id,
                    display_name,
                });
            }
        }
    }

    devices
}

/// Parse the encoder's DirectShow device listing (written to stderr)
///
/// Audio devices are the quoted names on lines mentioning "audio".
/// Alternative-name lines repeat a device under its moniker and are skipped.
pub fn parse_dshow_devices(raw: &[u8], keywords: &[&str]) -> Vec<AudioDevice> {
    let mut devices: Vec<AudioDevice> = Vec::new();

    for line in raw.split(|&b| b == b'\n') {
        let text = String::from_utf8_lossy(line);
        if !text.contains("audio") || text.contains("Alternative name") {
            continue;
        }

        let mut quoted = line.split(|&b| b == b'"');
        let (Some(_), Some(name)) = (quoted.next(), quoted.next()) else {
            continue;
        };
        // A line with a single quote mark has no closing delimiter
        if quoted.next().is_none() {
            continue;
        }

        let name = normalize_device_name(name);
        if name.is_empty() || devices.iter().any(|d| d.id == name) {
            continue;
        }
        devices.push(AudioDevice {
            is_loopback: is_loopback_name(&name, keywords),
            display_name: name.clone(),
            id: name,
        });
    }

    devices
}

/// Run an enumeration tool and return one of its output streams
pub(crate) fn run_enumeration(mut command: Command, use_stderr: bool) -> Result<Vec<u8>, CaptureError> {
    let program = command.get_program().to_string_lossy().into_owned();
    let output = command
        .output()
        .map_err(|e| CaptureError::Enumeration(format!("{}: {}", program, e)))?;

    if use_stderr {
        // Device listing always "fails" because the dummy input never opens
        Ok(output.stderr)
    } else if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(CaptureError::Enumeration(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACTL_SAMPLE: &str = "Source #0
\tState: SUSPENDED
\tName: alsa_output.pci-0000_00_1f.3.analog-stereo.monitor
\tDescription: Monitor of Built-in Audio Analog Stereo
\tDriver: module-alsa-card.c
Source #1
\tState: RUNNING
\tName: alsa_input.usb-Blue_Yeti-00.analog-stereo
\tDescription: Yeti Stereo Microphone
\tDriver: module-alsa-card.c
";

    #[test]
    fn test_parse_pactl_sources() {
        let devices = parse_pactl_sources(PACTL_SAMPLE.as_bytes(), LINUX_LOOPBACK_KEYWORDS);
        assert_eq!(devices.len(), 2);

        assert_eq!(devices[0].id, "alsa_output.pci-0000_00_1f.3.analog-stereo.monitor");
        assert!(devices[0].is_loopback);
        assert_eq!(
            devices[1].display_name,
            "Yeti Stereo Microphone (alsa_input.usb-Blue_Yeti-00.analog-stereo)"
        );
        assert!(!devices[1].is_loopback);
    }

    #[test]
    fn test_parse_pactl_ignores_description_without_name() {
        let raw = "\tDescription: orphan\n\tName: src\n\tDescription: Real\n";
        let devices = parse_pactl_sources(raw.as_bytes(), LINUX_LOOPBACK_KEYWORDS);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "src");
    }

    #[test]
    fn test_parse_dshow_devices() {
        let raw = "[dshow @ 000001] \"Integrated Camera\" (video)
[dshow @ 000001]   Alternative name \"@device_pnp_\\\\?\\usb#vid\"
[dshow @ 000001] \"Microphone (USB Audio Device)\" (audio)
[dshow @ 000001]   Alternative name \"@device_cm_{33D9A762}\\wave_{audio}\"
[dshow @ 000001] \"Stereo Mix (Realtek(R) Audio)\" (audio)
dummy: Immediate exit requested
";
        let devices = parse_dshow_devices(raw.as_bytes(), WINDOWS_LOOPBACK_KEYWORDS);
        let names: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(
            names,
            vec!["Microphone (USB Audio Device)", "Stereo Mix (Realtek(R) Audio)"]
        );
        assert!(!devices[0].is_loopback);
        assert!(devices[1].is_loopback);
    }

    #[test]
    fn test_normalize_falls_back_to_latin1() {
        assert_eq!(normalize_device_name("Mezcla estéreo".as_bytes()), "Mezcla estéreo");
        // "Mezcla est\xe9reo" in Latin-1
        let latin1 = b"Mezcla est\xe9reo";
        assert_eq!(normalize_device_name(latin1), "Mezcla estéreo");
    }

    #[test]
    fn test_loopback_keywords_are_case_insensitive() {
        assert!(is_loopback_name("STEREO MIX (Realtek)", WINDOWS_LOOPBACK_KEYWORDS));
        assert!(is_loopback_name("Стерео микшер", WINDOWS_LOOPBACK_KEYWORDS));
        assert!(!is_loopback_name("Headset Microphone", WINDOWS_LOOPBACK_KEYWORDS));
    }
}
