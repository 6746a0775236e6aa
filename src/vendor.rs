/*
 * This file is part of Coolctl.
 *
 * Copyright (C) 2025 Coolctl contributors
 *
 * Coolctl is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Coolctl is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Coolctl. If not, see <https://www.gnu.org/licenses/>.
 */

//! Vendor-protocol devices (USB/PCIe coolers and RGB controllers).
//!
//! The wire protocols themselves live in an external hardware-control
//! library; this module is the seam. `VendorDevice` mirrors that library's
//! per-device surface, `VendorEnumerator` its discovery surface, and
//! `VendorProtocolBackend` adapts both to the backend registry. A CLI
//! fallback enumerator shells out to the `liquidctl` binary for setups
//! where the library is not linked in.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::backend::{
    BackendCapabilities, DeviceBinding, DeviceDescriptor, DeviceKind, DiscoveredDevice,
    HardwareBackend, SysfsPath,
};
use crate::error::{ControlError, Result};

pub type Rgb = [u8; 3];

/// One labeled reading from a device status or initialize call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub label: String,
    pub value: String,
    pub unit: String,
}

impl StatusEntry {
    pub fn new(label: impl Into<String>, value: impl Into<String>, unit: impl Into<String>) -> Self {
        StatusEntry {
            label: label.into(),
            value: value.into(),
            unit: unit.into(),
        }
    }
}

/// Handle to one vendor-protocol device. All calls are blocking round
/// trips that may fail at the transport level.
#[cfg_attr(test, mockall::automock)]
pub trait VendorDevice {
    fn description(&self) -> String;
    fn connect(&self) -> Result<()>;
    fn disconnect(&self) -> Result<()>;
    fn initialize(&self) -> Result<Vec<StatusEntry>>;
    fn get_status(&self) -> Result<Vec<StatusEntry>>;
    fn set_color(&self, channel: &str, mode: &str, colors: &[Rgb], speed: &str) -> Result<()>;
    fn set_fixed_speed(&self, channel: &str, duty: u8) -> Result<()>;
}

/// Run one command inside a connect/disconnect session. The disconnect is
/// issued on every exit path so an error mid-command cannot leak an open
/// transport handle; a command error takes precedence over a disconnect
/// error.
pub fn with_session<T>(
    device: &dyn VendorDevice,
    op: impl FnOnce(&dyn VendorDevice) -> Result<T>,
) -> Result<T> {
    device.connect()?;
    let result = op(device);
    let closed = device.disconnect();
    match result {
        Ok(value) => {
            closed?;
            Ok(value)
        }
        Err(e) => Err(e),
    }
}

/// Raw enumeration record before the backend normalizes it into a
/// `DeviceDescriptor`.
pub struct VendorDeviceInfo {
    pub name: String,
    pub match_key: String,
    pub color_channels: Vec<String>,
    pub speed_channels: Vec<String>,
    pub color_modes: Vec<String>,
    pub handle: Box<dyn VendorDevice>,
}

/// Discovery surface of the vendor library.
pub trait VendorEnumerator {
    fn is_available(&self) -> bool;
    fn enumerate(&self) -> Result<Vec<VendorDeviceInfo>>;
    /// Sysfs device paths owned by the enumerated hardware, for excluding
    /// the duplicate hwmon view of the same devices.
    fn device_sysfs_paths(&self) -> Vec<SysfsPath>;
}

pub struct VendorProtocolBackend {
    enumerator: Box<dyn VendorEnumerator>,
}

impl VendorProtocolBackend {
    pub fn new(enumerator: Box<dyn VendorEnumerator>) -> Self {
        VendorProtocolBackend { enumerator }
    }
}

fn classify(supports_lighting: bool, supports_cooling: bool) -> DeviceKind {
    if supports_lighting {
        DeviceKind::VendorLighting
    } else if supports_cooling {
        DeviceKind::VendorCooling
    } else {
        DeviceKind::Generic
    }
}

impl HardwareBackend for VendorProtocolBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "vendor",
            priority: 90,
            supports_cooling: true,
            supports_lighting: true,
            supports_monitoring: true,
        }
    }

    fn is_available(&self) -> bool {
        self.enumerator.is_available()
    }

    fn discover(&self, _excluded: &[SysfsPath]) -> Result<Vec<DiscoveredDevice>> {
        // highest priority in the default order: nothing above us claims paths
        let mut devices = Vec::new();
        for info in self.enumerator.enumerate()? {
            let mut color_channels = info.color_channels;
            if !color_channels.is_empty() && !color_channels.iter().any(|c| c == "sync") {
                // pseudo-channel addressing every LED at once
                color_channels.insert(0, "sync".to_string());
            }
            let supports_lighting = !color_channels.is_empty();
            let supports_cooling = !info.speed_channels.is_empty();

            devices.push(DiscoveredDevice {
                descriptor: DeviceDescriptor {
                    name: info.name,
                    match_key: info.match_key,
                    kind: classify(supports_lighting, supports_cooling),
                    color_channels,
                    speed_channels: info.speed_channels,
                    color_modes: info.color_modes,
                    supports_lighting,
                    supports_cooling,
                },
                binding: DeviceBinding::Vendor(info.handle),
            });
        }
        Ok(devices)
    }

    fn device_sysfs_paths(&self, devices: &[DiscoveredDevice]) -> Vec<SysfsPath> {
        if devices.is_empty() {
            Vec::new()
        } else {
            self.enumerator.device_sysfs_paths()
        }
    }
}

// ---------------------------------------------------------------------------
// CLI fallback: drive the liquidctl binary when the library is not linked.
// Capability metadata is limited in this mode (the CLI does not report
// channels), so discovered devices carry empty channel lists and rely on
// profile keys naming channels directly.
// ---------------------------------------------------------------------------

fn resolve_cli_path() -> Option<PathBuf> {
    if let Ok(env_path) = env::var("COOLCTL_VENDOR_CLI") {
        let p = PathBuf::from(env_path);
        if p.is_file() {
            return Some(p);
        }
    }
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(home) = env::var("HOME") {
        candidates.push(Path::new(&home).join(".local/bin/liquidctl"));
    }
    candidates.push(PathBuf::from("/usr/local/bin/liquidctl"));
    candidates.push(PathBuf::from("/usr/bin/liquidctl"));
    candidates.into_iter().find(|p| p.is_file())
}

fn run_cli(cmd: &[String]) -> Result<String> {
    let output = Command::new(&cmd[0])
        .args(&cmd[1..])
        .output()
        .map_err(|e| ControlError::write_failed(&cmd[0], e))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.to_lowercase().contains("no devices match") {
            Err(ControlError::device_not_found(cmd.join(" ")))
        } else {
            Err(ControlError::InvalidArgument(stderr))
        }
    }
}

pub fn parse_list_output(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let rest = trimmed.strip_prefix("Device ")?;
            let (_num, name) = rest.split_once(':')?;
            Some(name.trim().to_string())
        })
        .collect()
}

/// One device as seen through the CLI. Connect/disconnect are no-ops: the
/// binary opens and closes the transport per invocation.
pub struct CliDevice {
    cli: PathBuf,
    match_key: String,
    use_sudo: bool,
}

impl CliDevice {
    fn base_cmd(&self) -> Vec<String> {
        let mut cmd = Vec::new();
        if self.use_sudo {
            cmd.push("sudo".to_string());
        }
        cmd.push(self.cli.display().to_string());
        cmd.push("--match".to_string());
        cmd.push(self.match_key.clone());
        cmd
    }

    fn parse_status(output: &str) -> Vec<StatusEntry> {
        output
            .lines()
            .filter_map(|line| {
                let trimmed = line.trim_start_matches(['─', '│', '└', '├', ' ']);
                let (label, rest) = trimmed.split_once("  ")?;
                let mut parts = rest.split_whitespace();
                let value = parts.next()?.to_string();
                let unit = parts.next().unwrap_or("").to_string();
                Some(StatusEntry::new(label.trim(), value, unit))
            })
            .collect()
    }
}

impl VendorDevice for CliDevice {
    fn description(&self) -> String {
        self.match_key.clone()
    }

    fn connect(&self) -> Result<()> {
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    fn initialize(&self) -> Result<Vec<StatusEntry>> {
        let mut cmd = self.base_cmd();
        cmd.push("initialize".to_string());
        run_cli(&cmd).map(|out| Self::parse_status(&out))
    }

    fn get_status(&self) -> Result<Vec<StatusEntry>> {
        let mut cmd = self.base_cmd();
        cmd.push("status".to_string());
        run_cli(&cmd).map(|out| Self::parse_status(&out))
    }

    fn set_color(&self, channel: &str, mode: &str, colors: &[Rgb], _speed: &str) -> Result<()> {
        let mut cmd = self.base_cmd();
        cmd.extend(["set", channel, "color", mode].map(String::from));
        for rgb in colors {
            cmd.push(format!("{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2]));
        }
        run_cli(&cmd).map(|_| ())
    }

    fn set_fixed_speed(&self, channel: &str, duty: u8) -> Result<()> {
        let mut cmd = self.base_cmd();
        cmd.extend(["set", channel, "speed"].map(String::from));
        cmd.push(duty.to_string());
        run_cli(&cmd).map(|_| ())
    }
}

pub struct CliEnumerator {
    cli: Option<PathBuf>,
    use_sudo: bool,
}

impl CliEnumerator {
    pub fn detect() -> Self {
        CliEnumerator {
            cli: resolve_cli_path(),
            // the binary needs device access; escalate unless already root
            use_sudo: unsafe { libc::geteuid() } != 0,
        }
    }
}

impl VendorEnumerator for CliEnumerator {
    fn is_available(&self) -> bool {
        self.cli.is_some()
    }

    fn enumerate(&self) -> Result<Vec<VendorDeviceInfo>> {
        let Some(cli) = &self.cli else {
            return Ok(Vec::new());
        };
        let output = run_cli(&[cli.display().to_string(), "list".to_string()])?;
        let infos = parse_list_output(&output)
            .into_iter()
            .map(|name| VendorDeviceInfo {
                handle: Box::new(CliDevice {
                    cli: cli.clone(),
                    match_key: name.clone(),
                    use_sudo: self.use_sudo,
                }),
                match_key: name.clone(),
                name,
                color_channels: Vec::new(),
                speed_channels: Vec::new(),
                color_modes: Vec::new(),
            })
            .collect();
        Ok(infos)
    }

    fn device_sysfs_paths(&self) -> Vec<SysfsPath> {
        // the CLI cannot report device paths
        Vec::new()
    }
}
