//! Monitor geometry enumeration

use std::process::Command;

use tracing::{debug, warn};

use super::recording::Monitor;
use crate::error::CaptureError;

/// Parse `xrandr --listmonitors` output
///
/// Geometry tokens look like `1920/344x1080/193+0+0`; physical sizes after
/// the slashes are ignored.
pub fn parse_xrandr_monitors(output: &str) -> Vec<Monitor> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().find_map(parse_xrandr_geometry))
        .collect()
}

fn parse_xrandr_geometry(token: &str) -> Option<Monitor> {
    let mut parts = token.split('+');
    let size = parts.next()?;
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;

    let (w, h) = size.split_once('x')?;
    let width = w.split('/').next()?.parse().ok()?;
    let height = h.split('/').next()?.parse().ok()?;

    Some(Monitor {
        x,
        y,
        width,
        height,
    })
}

/// Parse `X,Y,WIDTH,HEIGHT` lines, one screen per line
pub fn parse_screen_bounds(output: &str) -> Vec<Monitor> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
            let [x, y, w, h] = fields.as_slice() else {
                return None;
            };
            Some(Monitor {
                x: x.parse().ok()?,
                y: y.parse().ok()?,
                width: w.parse().ok()?,
                height: h.parse().ok()?,
            })
        })
        .collect()
}

/// Look up a monitor by index
pub fn resolve_monitor(monitors: &[Monitor], index: usize) -> Result<Monitor, CaptureError> {
    monitors
        .get(index)
        .copied()
        .ok_or(CaptureError::MonitorNotFound {
            index,
            available: monitors.len(),
        })
}

/// Run a geometry query, returning its stdout or nothing
pub(crate) fn query(mut command: Command) -> Option<String> {
    let program = command.get_program().to_string_lossy().into_owned();
    match command.output() {
        Ok(output) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(output) => {
            warn!("{} exited with {}", program, output.status);
            None
        }
        Err(e) => {
            debug!("Failed to run {}: {}", program, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_xrandr() {
        let output = "Monitors: 3
 0: +*eDP-1 1920/344x1080/193+0+0  eDP-1
 1: +HDMI-1 2560/597x1440/336+1920+0  HDMI-1
 2: +DP-2 1280/340x1024/270+-1280+56  DP-2
";
        let monitors = parse_xrandr_monitors(output);
        assert_eq!(monitors.len(), 3);
        assert_eq!(
            monitors[1],
            Monitor {
                x: 1920,
                y: 0,
                width: 2560,
                height: 1440
            }
        );
        assert_eq!(monitors[2].x, -1280);
        assert_eq!(monitors[2].y, 56);
    }

    #[test]
    fn test_parse_screen_bounds() {
        let monitors = parse_screen_bounds("0,0,1920,1080\r\n-1280,0,1280,1024\r\ngarbage\n");
        assert_eq!(monitors.len(), 2);
        assert_eq!(monitors[1].x, -1280);
        assert_eq!(monitors[1].width, 1280);
    }

    #[test]
    fn test_resolve_monitor() {
        let monitors = parse_screen_bounds("0,0,1920,1080");
        assert_eq!(resolve_monitor(&monitors, 0).unwrap().width, 1920);
        assert_eq!(
            resolve_monitor(&monitors, 2),
            Err(CaptureError::MonitorNotFound {
                index: 2,
                available: 1
            })
        );
    }
}
