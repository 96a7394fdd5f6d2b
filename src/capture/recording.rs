//! Capture configuration snapshot
//!
//! A `CaptureConfiguration` is rebuilt on every (re)start of a segment and is
//! never mutated afterwards. It carries everything the command builder needs:
//! target monitor geometry, optional region, video settings and the ordered
//! audio device selection.

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

/// Capture frame rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum FrameRate {
    Fps30,
    #[default]
    Fps60,
}

impl FrameRate {
    pub fn as_u32(self) -> u32 {
        match self {
            FrameRate::Fps30 => 30,
            FrameRate::Fps60 => 60,
        }
    }
}

impl TryFrom<u32> for FrameRate {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            30 => Ok(FrameRate::Fps30),
            60 => Ok(FrameRate::Fps60),
            other => Err(format!("unsupported frame rate {} (expected 30 or 60)", other)),
        }
    }
}

impl From<FrameRate> for u32 {
    fn from(rate: FrameRate) -> Self {
        rate.as_u32()
    }
}

/// Video codec selection
///
/// The two named variants get tuned rate-control presets; anything else is
/// passed through to the encoder with a plain bitrate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
    Other(String),
}

impl VideoCodec {
    pub fn encoder_name(&self) -> &str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Other(name) => name,
        }
    }
}

impl From<String> for VideoCodec {
    fn from(name: String) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "libx264" | "h264" | "x264" => VideoCodec::H264,
            "libx265" | "h265" | "hevc" | "x265" => VideoCodec::H265,
            _ => VideoCodec::Other(name),
        }
    }
}

impl From<VideoCodec> for String {
    fn from(codec: VideoCodec) -> Self {
        codec.encoder_name().to_string()
    }
}

/// Output container for the final merged file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mkv,
    Mp4,
}

impl Container {
    pub fn extension(self) -> &'static str {
        match self {
            Container::Mkv => "mkv",
            Container::Mp4 => "mp4",
        }
    }
}

impl std::str::FromStr for Container {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mkv" => Ok(Container::Mkv),
            "mp4" => Ok(Container::Mp4),
            other => Err(format!("unsupported container '{}' (expected mkv or mp4)", other)),
        }
    }
}

/// Geometry of one monitor in absolute desktop pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// User-selected region, absolute screen pixels, as two corners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Region {
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i64 {
        self.x2 as i64 - self.x1 as i64
    }

    pub fn height(&self) -> i64 {
        self.y2 as i64 - self.y1 as i64
    }
}

impl std::str::FromStr for Region {
    type Err = String;

    /// Parse `X1,Y1,X2,Y2`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<i32> = s
            .split(',')
            .map(|p| p.trim().parse::<i32>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("invalid region '{}': {}", s, e))?;

        match parts.as_slice() {
            [x1, y1, x2, y2] => Ok(Region::from_corners(*x1, *y1, *x2, *y2)),
            _ => Err(format!("invalid region '{}': expected X1,Y1,X2,Y2", s)),
        }
    }
}

/// One selected audio input and its volume (0..=100)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelection {
    pub id: String,
    #[serde(default = "default_volume")]
    pub volume: u8,
    /// Resolved from the enumerated device list when a recording starts
    #[serde(skip)]
    pub is_loopback: bool,
}

fn default_volume() -> u8 {
    100
}

impl DeviceSelection {
    pub fn new(id: impl Into<String>, volume: u8) -> Self {
        Self {
            id: id.into(),
            volume: volume.min(100),
            is_loopback: false,
        }
    }

    pub fn with_loopback(mut self, is_loopback: bool) -> Self {
        self.is_loopback = is_loopback;
        self
    }
}

impl std::str::FromStr for DeviceSelection {
    type Err = String;

    /// Parse `ID` or `ID:VOLUME`; the volume is split off the last colon only
    /// when it parses as a number, since source names can contain colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((id, volume)) = s.rsplit_once(':') {
            if let Ok(volume) = volume.parse::<u8>() {
                if volume > 100 {
                    return Err(format!("volume {} out of range 0..=100", volume));
                }
                return Ok(DeviceSelection::new(id, volume));
            }
        }
        if s.is_empty() {
            return Err("empty device id".to_string());
        }
        Ok(DeviceSelection::new(s, default_volume()))
    }
}

/// Final capture rectangle handed to the capture backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRect {
    /// Absolute desktop offset
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Immutable per-segment recording parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfiguration {
    monitor_index: usize,
    monitor: Monitor,
    region: Option<Region>,
    frame_rate: FrameRate,
    bitrate: String,
    codec: VideoCodec,
    container: Container,
    audio_devices: Vec<DeviceSelection>,
}

impl CaptureConfiguration {
    pub fn builder(monitor_index: usize, monitor: Monitor) -> CaptureConfigurationBuilder {
        CaptureConfigurationBuilder::new(monitor_index, monitor)
    }

    pub fn monitor_index(&self) -> usize {
        self.monitor_index
    }

    pub fn monitor(&self) -> Monitor {
        self.monitor
    }

    pub fn region(&self) -> Option<Region> {
        self.region
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    pub fn bitrate(&self) -> &str {
        &self.bitrate
    }

    pub fn codec(&self) -> &VideoCodec {
        &self.codec
    }

    pub fn container(&self) -> Container {
        self.container
    }

    pub fn audio_devices(&self) -> &[DeviceSelection] {
        &self.audio_devices
    }

    pub fn uses_device(&self, id: &str) -> bool {
        self.audio_devices.iter().any(|d| d.id == id)
    }

    /// Same settings with the audio selection replaced
    pub fn with_audio_devices(&self, audio_devices: Vec<DeviceSelection>) -> Self {
        Self {
            audio_devices,
            ..self.clone()
        }
    }

    /// Same settings, different monitor (used for mid-recording switches)
    pub fn with_monitor(&self, monitor_index: usize, monitor: Monitor) -> Self {
        Self {
            monitor_index,
            monitor,
            region: None,
            ..self.clone()
        }
    }

    /// Resolve the rectangle to capture
    ///
    /// With a region, the size is made even (encoders reject odd dimensions for
    /// yuv420p). Without one, the full monitor is captured.
    pub fn capture_rect(&self) -> Result<CaptureRect, CaptureError> {
        let Some(region) = self.region else {
            return Ok(CaptureRect {
                x: self.monitor.x,
                y: self.monitor.y,
                width: self.monitor.width,
                height: self.monitor.height,
            });
        };

        let (width, height) = (region.width(), region.height());
        if width <= 0 || height <= 0 {
            return Err(CaptureError::InvalidRegion { width, height });
        }

        let rel_x = region.x1 as i64 - self.monitor.x as i64;
        let rel_y = region.y1 as i64 - self.monitor.y as i64;
        let (rel_x, width) = even_span(rel_x, width, self.monitor.width as i64);
        let (rel_y, height) = even_span(rel_y, height, self.monitor.height as i64);

        if width <= 0 || height <= 0 {
            return Err(CaptureError::InvalidRegion { width, height });
        }

        Ok(CaptureRect {
            x: (self.monitor.x as i64 + rel_x) as i32,
            y: (self.monitor.y as i64 + rel_y) as i32,
            width: width as u32,
            height: height as u32,
        })
    }
}

/// Make a span even
///
/// Odd lengths grow by one pixel while the far edge stays on the monitor,
/// otherwise shrink by one. A one-pixel span on the far edge moves its start
/// back instead of collapsing to zero.
fn even_span(start: i64, len: i64, bound: i64) -> (i64, i64) {
    if len % 2 == 0 {
        return (start, len);
    }
    if start + len < bound {
        (start, len + 1)
    } else if len > 1 {
        (start, len - 1)
    } else if start > 0 {
        (start - 1, len + 1)
    } else {
        (start, len + 1)
    }
}

/// Builder for CaptureConfiguration with fluent API
#[derive(Debug, Clone)]
pub struct CaptureConfigurationBuilder {
    config: CaptureConfiguration,
}

impl CaptureConfigurationBuilder {
    pub fn new(monitor_index: usize, monitor: Monitor) -> Self {
        Self {
            config: CaptureConfiguration {
                monitor_index,
                monitor,
                region: None,
                frame_rate: FrameRate::default(),
                bitrate: "1000k".to_string(),
                codec: VideoCodec::default(),
                container: Container::default(),
                audio_devices: Vec::new(),
            },
        }
    }

    pub fn region(mut self, region: Option<Region>) -> Self {
        self.config.region = region;
        self
    }

    pub fn frame_rate(mut self, frame_rate: FrameRate) -> Self {
        self.config.frame_rate = frame_rate;
        self
    }

    pub fn bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.config.bitrate = bitrate.into();
        self
    }

    pub fn codec(mut self, codec: VideoCodec) -> Self {
        self.config.codec = codec;
        self
    }

    pub fn container(mut self, container: Container) -> Self {
        self.config.container = container;
        self
    }

    pub fn audio_device(mut self, device: DeviceSelection) -> Self {
        self.config.audio_devices.push(device);
        self
    }

    pub fn audio_devices(mut self, devices: impl IntoIterator<Item = DeviceSelection>) -> Self {
        self.config.audio_devices.extend(devices);
        self
    }

    pub fn build(self) -> CaptureConfiguration {
        self.config
    }
}
