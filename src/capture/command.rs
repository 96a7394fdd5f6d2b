//! Encoder argument construction
//!
//! Pure functions: a capture configuration plus a platform capability
//! descriptor in, an argument vector out. The encoder binary itself is not
//! part of the vector.

use std::path::Path;

use super::backend::{AudioCaptureApi, PlatformCapabilities, VideoCaptureApi};
use super::recording::{CaptureConfiguration, CaptureRect, DeviceSelection, VideoCodec};
use crate::error::CaptureError;

const AUDIO_SAMPLE_RATE: &str = "48000";
const AUDIO_BITRATE: &str = "128k";
const MIXED_AUDIO_LABEL: &str = "[aout]";

/// Gain applied to one audio input
///
/// `volume / 100`, multiplied by the platform boost for loopback sources.
pub fn input_gain(volume: u8, is_loopback: bool, loopback_boost: f64) -> f64 {
    let gain = f64::from(volume) / 100.0;
    if is_loopback {
        gain * loopback_boost
    } else {
        gain
    }
}

fn format_gain(gain: f64) -> String {
    format!("{:.2}", gain)
}

/// Build the full argument vector for one capture segment
pub fn build_capture_args(
    config: &CaptureConfiguration,
    caps: &PlatformCapabilities,
    output: &Path,
) -> Result<Vec<String>, CaptureError> {
    let devices = config.audio_devices();
    if devices.is_empty() {
        return Err(CaptureError::NoDeviceSelected);
    }
    let rect = config.capture_rect()?;
    let fps = config.frame_rate().as_u32();

    let mut args = Vec::with_capacity(64);
    push_video_input(&mut args, &caps.video, rect, fps);

    let single = devices.len() == 1;
    for device in devices {
        push_audio_input(&mut args, caps.audio, &device.id, single);
    }

    push_audio_routing(&mut args, devices, caps);
    push_output_settings(&mut args, fps);
    push_codec(&mut args, config.codec(), config.bitrate(), fps);

    args.push(output.to_string_lossy().into_owned());
    Ok(args)
}

fn push_video_input(args: &mut Vec<String>, video: &VideoCaptureApi, rect: CaptureRect, fps: u32) {
    let size = format!("{}x{}", rect.width, rect.height);
    match video {
        VideoCaptureApi::X11Grab { display } => {
            args.extend([
                "-f".to_string(),
                "x11grab".to_string(),
                "-framerate".to_string(),
                fps.to_string(),
                "-video_size".to_string(),
                size,
                "-i".to_string(),
                format!("{}+{},{}", display, rect.x, rect.y),
            ]);
        }
        VideoCaptureApi::GdiGrab => {
            args.extend([
                "-f".to_string(),
                "gdigrab".to_string(),
                "-framerate".to_string(),
                fps.to_string(),
                "-offset_x".to_string(),
                rect.x.to_string(),
                "-offset_y".to_string(),
                rect.y.to_string(),
                "-video_size".to_string(),
                size,
                "-i".to_string(),
                "desktop".to_string(),
            ]);
        }
    }
}

fn push_audio_input(args: &mut Vec<String>, audio: AudioCaptureApi, device_id: &str, single: bool) {
    match audio {
        AudioCaptureApi::Pulse => {
            args.extend(["-f", "pulse", "-thread_queue_size", "512"].map(String::from));
            if single {
                args.extend(["-ac", "2", "-ar", AUDIO_SAMPLE_RATE].map(String::from));
            }
            args.push("-i".to_string());
            args.push(device_id.to_string());
        }
        AudioCaptureApi::DirectShow => {
            args.extend(
                [
                    "-f",
                    "dshow",
                    "-thread_queue_size",
                    "512",
                    "-audio_buffer_size",
                    "20",
                ]
                .map(String::from),
            );
            args.push("-i".to_string());
            args.push(format!("audio={}", device_id));
        }
    }
}

/// Single device: a plain volume filter. Several: one gain branch per input
/// feeding a mixer.
fn push_audio_routing(args: &mut Vec<String>, devices: &[DeviceSelection], caps: &PlatformCapabilities) {
    if let [device] = devices {
        let gain = input_gain(device.volume, device.is_loopback, caps.loopback_boost);
        args.extend([
            "-filter:a".to_string(),
            format!("volume={}", format_gain(gain)),
            "-map".to_string(),
            "0:v".to_string(),
            "-map".to_string(),
            "1:a".to_string(),
        ]);
        return;
    }

    args.push("-filter_complex".to_string());
    args.push(mix_filter_graph(devices, caps));
    args.extend(["-map", "0:v", "-map", MIXED_AUDIO_LABEL].map(String::from));
}

/// Filter graph for several audio inputs; input 0 is the video grab
pub fn mix_filter_graph(devices: &[DeviceSelection], caps: &PlatformCapabilities) -> String {
    let mut branches: Vec<String> = devices
        .iter()
        .enumerate()
        .map(|(i, device)| {
            let gain = input_gain(device.volume, device.is_loopback, caps.loopback_boost);
            format!("[{}:a]volume={}[a{}]", i + 1, format_gain(gain), i)
        })
        .collect();

    let labels: String = (0..devices.len()).map(|i| format!("[a{}]", i)).collect();
    branches.push(format!(
        "{}amix=inputs={}:duration=longest:dropout_transition=0{}",
        labels,
        devices.len(),
        MIXED_AUDIO_LABEL
    ));
    branches.join(";")
}

fn push_output_settings(args: &mut Vec<String>, fps: u32) {
    args.extend(
        [
            "-c:a",
            "aac",
            "-b:a",
            AUDIO_BITRATE,
            "-ar",
            AUDIO_SAMPLE_RATE,
            "-ac",
            "2",
            "-threads",
            "0",
            "-pix_fmt",
            "yuv420p",
            "-vsync",
            "cfr",
        ]
        .map(String::from),
    );
    args.push("-r".to_string());
    args.push(fps.to_string());
    args.extend(
        [
            "-loglevel",
            "warning",
            "-hide_banner",
            "-max_muxing_queue_size",
            "1024",
        ]
        .map(String::from),
    );
}

fn push_codec(args: &mut Vec<String>, codec: &VideoCodec, bitrate: &str, fps: u32) {
    args.push("-c:v".to_string());
    args.push(codec.encoder_name().to_string());

    match codec {
        VideoCodec::H264 => {
            args.extend([
                "-preset".to_string(),
                "veryfast".to_string(),
                "-b:v".to_string(),
                bitrate.to_string(),
                "-minrate".to_string(),
                bitrate.to_string(),
                "-maxrate".to_string(),
                bitrate.to_string(),
                "-bufsize".to_string(),
                bitrate.to_string(),
                "-g".to_string(),
                (fps * 2).to_string(),
                "-keyint_min".to_string(),
                fps.to_string(),
            ]);
        }
        VideoCodec::H265 => {
            args.extend([
                "-preset".to_string(),
                "veryfast".to_string(),
                "-b:v".to_string(),
                bitrate.to_string(),
                "-minrate".to_string(),
                bitrate.to_string(),
                "-maxrate".to_string(),
                bitrate.to_string(),
                "-bufsize".to_string(),
                bitrate.to_string(),
                "-x265-params".to_string(),
                format!("keyint={}:min-keyint={}", fps * 2, fps),
            ]);
        }
        VideoCodec::Other(_) => {
            args.push("-b:v".to_string());
            args.push(bitrate.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::backend::ManifestPaths;
    use crate::capture::recording::{FrameRate, Monitor, Region};
    use crate::devices::{parse_pactl_sources, LINUX_LOOPBACK_KEYWORDS, WINDOWS_LOOPBACK_KEYWORDS};
    use std::path::PathBuf;

    fn linux_caps() -> PlatformCapabilities {
        PlatformCapabilities {
            video: VideoCaptureApi::X11Grab {
                display: ":0.0".to_string(),
            },
            audio: AudioCaptureApi::Pulse,
            encoder_path: PathBuf::from("ffmpeg"),
            loopback_boost: 1.5,
            loopback_keywords: LINUX_LOOPBACK_KEYWORDS,
            manifest_paths: ManifestPaths::FileName,
        }
    }

    fn windows_caps() -> PlatformCapabilities {
        PlatformCapabilities {
            video: VideoCaptureApi::GdiGrab,
            audio: AudioCaptureApi::DirectShow,
            encoder_path: PathBuf::from("ffmpeg.exe"),
            loopback_boost: 2.5,
            loopback_keywords: WINDOWS_LOOPBACK_KEYWORDS,
            manifest_paths: ManifestPaths::Absolute,
        }
    }

    fn monitor() -> Monitor {
        Monitor {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_single_device_uses_volume_filter() {
        let config = CaptureConfiguration::builder(0, monitor())
            .audio_device(DeviceSelection::new("Mic", 70))
            .build();
        let args = build_capture_args(&config, &linux_caps(), Path::new("out.mkv")).unwrap();

        assert_eq!(value_after(&args, "-filter:a"), Some("volume=0.70"));
        assert!(!args.iter().any(|a| a == "-filter_complex"));
        assert_eq!(value_after(&args, "-map"), Some("0:v"));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "1:a"));
        assert_eq!(args.last().map(String::as_str), Some("out.mkv"));
    }

    #[test]
    fn test_two_devices_mix_with_loopback_boost() {
        let config = CaptureConfiguration::builder(0, monitor())
            .audio_device(DeviceSelection::new("alsa_input.usb-mic", 50))
            .audio_device(
                DeviceSelection::new("alsa_output.pci-0000.analog-stereo.monitor", 100)
                    .with_loopback(true),
            )
            .build();
        let args = build_capture_args(&config, &linux_caps(), Path::new("out.mkv")).unwrap();

        let graph = value_after(&args, "-filter_complex").unwrap();
        assert!(graph.contains("[1:a]volume=0.50[a0]"));
        assert!(graph.contains("[2:a]volume=1.50[a1]"));
        assert!(graph.ends_with("[a0][a1]amix=inputs=2:duration=longest:dropout_transition=0[aout]"));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "[aout]"));
        assert!(!args.iter().any(|a| a == "-filter:a"));

        // Multi-device pulse inputs do not force channel layout per input
        let first_audio = args.iter().position(|a| a == "pulse").unwrap();
        assert_eq!(args[first_audio + 1], "-thread_queue_size");
        assert_eq!(args[first_audio + 3], "-i");
    }

    #[test]
    fn test_gain_follows_enumerated_loopback_flag() {
        let raw = "Source #0\n\tName: alsa_input.pci-0000_00_1f.3.analog-stereo\n\tDescription: Built-in Audio Analog Stereo\n";
        let devices = parse_pactl_sources(raw.as_bytes(), LINUX_LOOPBACK_KEYWORDS);
        assert!(devices[0].is_loopback);

        let selection = DeviceSelection::new(devices[0].id.clone(), 100)
            .with_loopback(devices[0].is_loopback);
        let config = CaptureConfiguration::builder(0, monitor())
            .audio_device(selection)
            .build();
        let args = build_capture_args(&config, &linux_caps(), Path::new("out.mkv")).unwrap();
        assert_eq!(value_after(&args, "-filter:a"), Some("volume=1.50"));
    }

    #[test]
    fn test_every_branch_feeds_one_mixer() {
        let config = CaptureConfiguration::builder(0, monitor())
            .audio_device(DeviceSelection::new("mic", 100))
            .audio_device(DeviceSelection::new("headset", 80))
            .audio_device(DeviceSelection::new("desktop", 100).with_loopback(true))
            .audio_device(DeviceSelection::new("line-in", 25))
            .build();
        let args = build_capture_args(&config, &linux_caps(), Path::new("out.mkv")).unwrap();
        let graph = value_after(&args, "-filter_complex").unwrap();

        assert_eq!(graph.matches("volume=").count(), 4);
        assert_eq!(graph.matches("amix=").count(), 1);
        assert_eq!(graph.matches("amix=inputs=4:").count(), 1);

        let stages: Vec<&str> = graph.split(';').collect();
        assert_eq!(stages.len(), 5);
        let mixer = stages[4];
        for i in 0..4 {
            let label = format!("[a{}]", i);
            // Produced by exactly one branch and consumed by the mixer
            assert!(stages[i].starts_with(&format!("[{}:a]volume=", i + 1)));
            assert!(stages[i].ends_with(&label));
            assert_eq!(graph.matches(label.as_str()).count(), 2);
            assert!(mixer.contains(&label));
        }
        assert!(stages[2].contains("volume=1.50"));
        assert!(stages[3].contains("volume=0.25"));
        assert!(mixer.ends_with("[aout]"));
        assert_eq!(args.iter().filter(|a| a.as_str() == "pulse").count(), 4);
    }

    #[test]
    fn test_gain_formula() {
        let caps = windows_caps();
        for volume in [0u8, 1, 33, 50, 99, 100] {
            let plain = input_gain(volume, false, caps.loopback_boost);
            let boosted = input_gain(volume, true, caps.loopback_boost);
            assert!((plain - f64::from(volume) / 100.0).abs() < f64::EPSILON);
            assert!((boosted - f64::from(volume) / 100.0 * 2.5).abs() < 1e-9);
        }
        assert_eq!(format_gain(input_gain(100, true, 2.5)), "2.50");
    }

    #[test]
    fn test_x11_input_uses_display_and_offset() {
        let secondary = Monitor {
            x: 1920,
            y: 0,
            width: 1280,
            height: 1024,
        };
        let config = CaptureConfiguration::builder(1, secondary)
            .region(Some(Region::from_corners(2000, 100, 2101, 301)))
            .audio_device(DeviceSelection::new("Mic", 100))
            .build();
        let args = build_capture_args(&config, &linux_caps(), Path::new("out.mkv")).unwrap();

        assert_eq!(value_after(&args, "-f"), Some("x11grab"));
        assert_eq!(value_after(&args, "-video_size"), Some("102x202"));
        assert_eq!(value_after(&args, "-i"), Some(":0.0+2000,100"));
        assert!(args.windows(4).any(|w| w == ["-ac", "2", "-ar", "48000"]));
    }

    #[test]
    fn test_gdigrab_input_and_dshow_audio() {
        let config = CaptureConfiguration::builder(0, monitor())
            .frame_rate(FrameRate::Fps30)
            .audio_device(DeviceSelection::new("Microphone (USB Audio)", 100))
            .audio_device(DeviceSelection::new("Stereo Mix (Realtek Audio)", 40).with_loopback(true))
            .build();
        let args = build_capture_args(&config, &windows_caps(), Path::new("C:\\out.mkv")).unwrap();

        assert_eq!(value_after(&args, "-f"), Some("gdigrab"));
        assert_eq!(value_after(&args, "-offset_x"), Some("0"));
        assert_eq!(value_after(&args, "-i"), Some("desktop"));
        assert!(args.iter().any(|a| a == "audio=Microphone (USB Audio)"));
        assert!(args.iter().any(|a| a == "-audio_buffer_size"));

        let graph = value_after(&args, "-filter_complex").unwrap();
        assert!(graph.contains("[1:a]volume=1.00[a0]"));
        assert!(graph.contains("[2:a]volume=1.00[a1]"));
    }

    #[test]
    fn test_codec_rate_control() {
        let base = CaptureConfiguration::builder(0, monitor())
            .bitrate("4000k")
            .audio_device(DeviceSelection::new("Mic", 100));

        let h264 = build_capture_args(&base.clone().build(), &linux_caps(), Path::new("o.mkv")).unwrap();
        assert_eq!(value_after(&h264, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&h264, "-maxrate"), Some("4000k"));
        assert_eq!(value_after(&h264, "-bufsize"), Some("4000k"));
        assert_eq!(value_after(&h264, "-g"), Some("120"));
        assert_eq!(value_after(&h264, "-keyint_min"), Some("60"));

        let h265 = build_capture_args(
            &base.clone().codec(VideoCodec::H265).build(),
            &linux_caps(),
            Path::new("o.mkv"),
        )
        .unwrap();
        assert_eq!(value_after(&h265, "-x265-params"), Some("keyint=120:min-keyint=60"));
        assert_eq!(value_after(&h265, "-minrate"), Some("4000k"));

        let other = build_capture_args(
            &base.codec(VideoCodec::Other("h264_nvenc".to_string())).build(),
            &linux_caps(),
            Path::new("o.mkv"),
        )
        .unwrap();
        assert_eq!(value_after(&other, "-c:v"), Some("h264_nvenc"));
        assert_eq!(value_after(&other, "-b:v"), Some("4000k"));
        assert!(!other.iter().any(|a| a == "-preset"));
    }

    #[test]
    fn test_fixed_output_settings() {
        let config = CaptureConfiguration::builder(0, monitor())
            .audio_device(DeviceSelection::new("Mic", 100))
            .build();
        let args = build_capture_args(&config, &linux_caps(), Path::new("o.mkv")).unwrap();

        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(value_after(&args, "-b:a"), Some("128k"));
        assert_eq!(value_after(&args, "-pix_fmt"), Some("yuv420p"));
        assert_eq!(value_after(&args, "-vsync"), Some("cfr"));
        assert_eq!(value_after(&args, "-r"), Some("60"));
        assert_eq!(value_after(&args, "-loglevel"), Some("warning"));
        assert_eq!(value_after(&args, "-max_muxing_queue_size"), Some("1024"));
    }

    #[test]
    fn test_preconditions() {
        let empty = CaptureConfiguration::builder(0, monitor()).build();
        assert_eq!(
            build_capture_args(&empty, &linux_caps(), Path::new("o.mkv")),
            Err(CaptureError::NoDeviceSelected)
        );

        let inverted = CaptureConfiguration::builder(0, monitor())
            .region(Some(Region::from_corners(200, 200, 100, 300)))
            .audio_device(DeviceSelection::new("Mic", 100))
            .build();
        assert!(matches!(
            build_capture_args(&inverted, &linux_caps(), Path::new("o.mkv")),
            Err(CaptureError::InvalidRegion { .. })
        ));
    }
}
