//! Audio device enumeration and hot-plug monitoring

mod monitor;
mod registry;

pub use monitor::{diff_devices, DeviceDiff, DeviceMonitor};
pub use registry::{
    is_loopback_name, normalize_device_name, parse_dshow_devices, parse_pactl_sources, AudioDevice,
    LINUX_LOOPBACK_KEYWORDS, WINDOWS_LOOPBACK_KEYWORDS,
};

pub(crate) use registry::run_enumeration;
