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

//! Motherboard PWM fan control via the kernel hwmon sysfs tree.
//!
//! Discovery walks `/sys/class/hwmon/hwmon*`, keeps chips that expose
//! writable `pwm<N>` outputs and drives them with a fixed low-duty safety
//! floor: headers on motherboard-only fans have no stall protection, so a
//! too-low duty can stop the fan entirely.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::backend::{
    BackendCapabilities, DeviceBinding, DeviceDescriptor, DeviceKind, DiscoveredDevice,
    HardwareBackend, SysfsPath,
};
use crate::error::{ControlError, Result};
use crate::logger;
use crate::vendor::StatusEntry;

/// Minimum raw PWM value (0-255 scale) ever written, ~20% duty.
pub const MIN_PWM_VALUE: u8 = 51;

const HWMON_ROOT: &str = "/sys/class/hwmon";

/// Chips that only report temperatures; they carry pwm-less hwmon nodes or
/// read-only GPU/SoC fan interfaces and are never fan controllers we want.
const SKIP_CHIP_NAMES: &[&str] = &["acpitz", "pch_", "nvme", "coretemp", "k10temp", "zenpower"];

#[derive(Debug, Clone)]
pub struct PwmChannel {
    pub index: usize,
    pub pwm_path: PathBuf,
    pub enable_path: Option<PathBuf>,
    pub label: Option<String>,
}

#[derive(Debug, Clone)]
struct SensorInput {
    input_path: PathBuf,
    label: Option<String>,
    index: usize,
}

/// Controller for the writable PWM outputs of one hwmon chip, plus its
/// read-only fan/temperature inputs for status display.
#[derive(Debug)]
pub struct HwmonChannelController {
    chip_name: String,
    hwmon_path: PathBuf,
    channels: Vec<PwmChannel>,
    fans: Vec<SensorInput>,
    temps: Vec<SensorInput>,
}

fn read_trimmed<P: AsRef<Path>>(p: P) -> io::Result<String> {
    let mut s = String::new();
    fs::File::open(p)?.read_to_string(&mut s)?;
    Ok(s.trim().to_string())
}

pub fn extract_index(fname: &str, prefix: &str, suffix: &str) -> Option<usize> {
    if fname.starts_with(prefix) && fname.ends_with(suffix) && fname.len() > prefix.len() + suffix.len() {
        let mid = &fname[prefix.len()..fname.len() - suffix.len()];
        mid.parse().ok()
    } else {
        None
    }
}

fn read_label(dir: &Path, prefix: &str, idx: usize) -> Option<String> {
    read_trimmed(dir.join(format!("{}{}_label", prefix, idx))).ok()
}

/// Check that a channel guarded by an enable file can actually be driven
/// manually. Mode `2` means automatic/BIOS control; some drivers (GPU fans
/// in particular) silently ignore or reject the switch to manual, so a
/// write-then-restore round trip is the only reliable probe.
fn verify_enable_writable(enable_path: &Path) -> bool {
    let Ok(current) = read_trimmed(enable_path) else {
        return false;
    };
    if current != "2" {
        return true;
    }
    if fs::write(enable_path, "1").is_err() {
        return false;
    }
    let manual = read_trimmed(enable_path).map(|v| v == "1").unwrap_or(false);
    // restore the original automatic mode regardless of the probe outcome
    let _ = fs::write(enable_path, current.as_bytes());
    manual
}

fn discover_pwm_channels(dir: &Path) -> Vec<PwmChannel> {
    let mut channels = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return channels;
    };

    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();

    for fname in names {
        if fname.contains('_') {
            continue;
        }
        let Some(idx) = extract_index(&fname, "pwm", "") else {
            continue;
        };
        let pwm_path = dir.join(&fname);
        if read_trimmed(&pwm_path).is_err() {
            continue;
        }

        let enable_candidate = dir.join(format!("pwm{}_enable", idx));
        let enable_path = if enable_candidate.exists() {
            if !verify_enable_writable(&enable_candidate) {
                logger::log_event(
                    "hwmon_channel_excluded",
                    json!({ "pwm": fname, "reason": "enable mode not settable" }),
                );
                continue;
            }
            Some(enable_candidate)
        } else {
            None
        };

        channels.push(PwmChannel {
            index: idx,
            pwm_path,
            enable_path,
            label: read_label(dir, "pwm", idx),
        });
    }
    channels
}

fn discover_inputs(dir: &Path, prefix: &str) -> Vec<SensorInput> {
    let mut inputs = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return inputs;
    };

    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();

    for fname in names {
        let Some(idx) = extract_index(&fname, prefix, "_input") else {
            continue;
        };
        let input_path = dir.join(&fname);
        if read_trimmed(&input_path).is_err() {
            continue;
        }
        inputs.push(SensorInput {
            input_path,
            label: read_label(dir, prefix, idx),
            index: idx,
        });
    }
    inputs
}

impl HwmonChannelController {
    /// Probe one hwmon directory. Returns None when the chip has no usable
    /// PWM outputs.
    pub fn probe(hwmon_dir: &Path) -> Option<Self> {
        let name = read_trimmed(hwmon_dir.join("name")).ok()?;
        let channels = discover_pwm_channels(hwmon_dir);
        if channels.is_empty() {
            return None;
        }
        Some(HwmonChannelController {
            chip_name: name,
            hwmon_path: hwmon_dir.to_path_buf(),
            fans: discover_inputs(hwmon_dir, "fan"),
            temps: discover_inputs(hwmon_dir, "temp"),
            channels,
        })
    }

    pub fn chip_name(&self) -> &str {
        &self.chip_name
    }

    pub fn hwmon_path(&self) -> &Path {
        &self.hwmon_path
    }

    /// Channel ids in the `pwm<N>` form used by profiles.
    pub fn channel_ids(&self) -> Vec<String> {
        self.channels.iter().map(|c| format!("pwm{}", c.index)).collect()
    }

    fn channel(&self, channel_id: &str) -> Result<&PwmChannel> {
        extract_index(channel_id, "pwm", "")
            .and_then(|idx| self.channels.iter().find(|c| c.index == idx))
            .ok_or_else(|| ControlError::ChannelUnavailable {
                channel: channel_id.to_string(),
            })
    }

    fn ensure_manual(&self, channel: &PwmChannel) -> Result<()> {
        let Some(enable_path) = &channel.enable_path else {
            return Ok(());
        };
        let current = read_trimmed(enable_path).unwrap_or_default();
        if current == "1" {
            return Ok(());
        }
        fs::write(enable_path, "1").map_err(|e| ControlError::write_failed(enable_path, e))
    }

    /// Set duty in percent (0-100). Raw values below the safety floor are
    /// raised to the floor and the clamp is logged, never treated as an
    /// error. The channel is switched to manual mode first when needed.
    pub fn set_speed_percent(&self, channel_id: &str, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(ControlError::InvalidArgument(format!(
                "speed {} out of range (0-100)",
                percent
            )));
        }
        let channel = self.channel(channel_id)?;

        let requested = ((percent as u32) * 255 / 100) as u8;
        let raw = if requested < MIN_PWM_VALUE {
            logger::log_event(
                "pwm_clamped",
                json!({
                    "chip": self.chip_name,
                    "channel": channel_id,
                    "requested_raw": requested,
                    "written": MIN_PWM_VALUE,
                }),
            );
            MIN_PWM_VALUE
        } else {
            requested
        };

        self.ensure_manual(channel)?;
        fs::write(&channel.pwm_path, raw.to_string())
            .map_err(|e| ControlError::write_failed(&channel.pwm_path, e))?;

        logger::log_event(
            "pwm_write",
            json!({
                "chip": self.chip_name,
                "channel": channel_id,
                "percent": percent,
                "raw": raw,
            }),
        );
        Ok(())
    }

    /// Switch every channel to manual mode without touching duty values.
    /// A channel failing the switch is reported in the result list and does
    /// not abort initialization of the rest.
    pub fn initialize(&self) -> Vec<(String, Result<()>)> {
        self.channels
            .iter()
            .map(|c| {
                let id = format!("pwm{}", c.index);
                (id, self.ensure_manual(c))
            })
            .collect()
    }

    /// Read-only status aggregation: fan RPM, temperature (millidegree to
    /// degree), current duty percent. Unreadable entries are omitted; this
    /// never fails the caller.
    pub fn read_status(&self) -> Vec<StatusEntry> {
        let mut status = Vec::new();

        for fan in &self.fans {
            if let Ok(raw) = read_trimmed(&fan.input_path) {
                if let Ok(rpm) = raw.parse::<u64>() {
                    let label = fan.label.clone().unwrap_or_else(|| format!("Fan {}", fan.index));
                    status.push(StatusEntry::new(label, rpm.to_string(), "rpm"));
                }
            }
        }

        for temp in &self.temps {
            if let Ok(raw) = read_trimmed(&temp.input_path) {
                if let Ok(millideg) = raw.parse::<i64>() {
                    let label = temp
                        .label
                        .clone()
                        .unwrap_or_else(|| format!("Temp {}", temp.index));
                    let celsius = millideg as f64 / 1000.0;
                    status.push(StatusEntry::new(label, format!("{:.1}", celsius), "°C"));
                }
            }
        }

        for channel in &self.channels {
            if let Ok(raw) = read_trimmed(&channel.pwm_path) {
                if let Ok(value) = raw.parse::<u64>() {
                    let label = channel
                        .label
                        .clone()
                        .unwrap_or_else(|| format!("PWM {}", channel.index));
                    let percent = value * 100 / 255;
                    status.push(StatusEntry::new(format!("{} duty", label), percent.to_string(), "%"));
                }
            }
        }

        status
    }
}

/// The underlying hardware device path for an hwmon interface (the `device`
/// symlink target). Virtual sensors without a device link yield None.
pub fn device_sysfs_path(hwmon_dir: &Path) -> Option<SysfsPath> {
    let link = hwmon_dir.join("device");
    if link.exists() {
        Some(SysfsPath::canonicalized(&link))
    } else {
        None
    }
}

/// Scan an hwmon tree for usable fan controllers, skipping temperature-only
/// chips and hardware claimed by a higher-priority backend.
pub fn scan(root: &Path, excluded: &[SysfsPath]) -> Vec<HwmonChannelController> {
    let mut controllers = Vec::new();
    let Ok(entries) = fs::read_dir(root) else {
        return controllers;
    };

    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        let Ok(name) = read_trimmed(dir.join("name")) else {
            continue;
        };
        let lowered = name.to_lowercase();
        if SKIP_CHIP_NAMES.iter().any(|skip| lowered.contains(skip)) {
            continue;
        }

        if !excluded.is_empty() {
            if let Some(device_path) = device_sysfs_path(&dir) {
                if excluded.iter().any(|e| e.overlaps(&device_path)) {
                    logger::log_event(
                        "hwmon_chip_excluded",
                        json!({ "chip": name, "reason": "claimed by higher-priority backend" }),
                    );
                    continue;
                }
            }
        }

        if let Some(controller) = HwmonChannelController::probe(&dir) {
            logger::log_event(
                "hwmon_chip_found",
                json!({
                    "chip": controller.chip_name(),
                    "pwm_channels": controller.channels.len(),
                    "fans": controller.fans.len(),
                    "temps": controller.temps.len(),
                }),
            );
            controllers.push(controller);
        }
    }
    controllers
}

/// Backend over the kernel hwmon subsystem. Lowest in the default priority
/// order: a vendor protocol, when present, is the better control surface
/// for the same hardware.
pub struct HwmonBackend {
    root: PathBuf,
}

impl HwmonBackend {
    pub fn new() -> Self {
        HwmonBackend {
            root: PathBuf::from(HWMON_ROOT),
        }
    }

    /// Scan an alternate tree; used by tests and by anyone running against
    /// a bind-mounted sysfs.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        HwmonBackend { root: root.into() }
    }
}

impl Default for HwmonBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareBackend for HwmonBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "hwmon",
            priority: 50,
            supports_cooling: true,
            supports_lighting: false,
            supports_monitoring: true,
        }
    }

    fn is_available(&self) -> bool {
        self.root.exists()
    }

    fn discover(&self, excluded: &[SysfsPath]) -> Result<Vec<DiscoveredDevice>> {
        let devices = scan(&self.root, excluded)
            .into_iter()
            .map(|controller| DiscoveredDevice {
                descriptor: DeviceDescriptor {
                    name: format!("Motherboard: {}", controller.chip_name()),
                    match_key: format!("hwmon:{}", controller.chip_name()),
                    kind: DeviceKind::Hwmon,
                    color_channels: Vec::new(),
                    speed_channels: controller.channel_ids(),
                    color_modes: Vec::new(),
                    supports_lighting: false,
                    supports_cooling: true,
                },
                binding: DeviceBinding::Hwmon(controller),
            })
            .collect();
        Ok(devices)
    }

    fn device_sysfs_paths(&self, _devices: &[DiscoveredDevice]) -> Vec<SysfsPath> {
        // bottom of the priority order: nothing below hwmon to exclude
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_utils::FakeHwmonTree;

    #[test]
    fn test_extract_index() {
        assert_eq!(extract_index("pwm1", "pwm", ""), Some(1));
        assert_eq!(extract_index("pwm12", "pwm", ""), Some(12));
        assert_eq!(extract_index("fan2_input", "fan", "_input"), Some(2));
        assert_eq!(extract_index("temp3_label", "temp", "_label"), Some(3));
        assert_eq!(extract_index("pwm", "pwm", ""), None);
        assert_eq!(extract_index("pwmx", "pwm", ""), None);
        assert_eq!(extract_index("fan_input", "fan", "_input"), None);
    }

    #[test]
    fn test_probe_discovers_channels_and_sensors() {
        let tree = FakeHwmonTree::new();
        let chip = tree.chip("nct6775", |c| {
            c.pwm(1, 128, Some("1"));
            c.pwm(2, 255, None);
            c.fan(1, 1200, Some("CPU Fan"));
            c.temp(1, 45500, None);
        });

        let controller = HwmonChannelController::probe(&chip).expect("chip should probe");
        assert_eq!(controller.chip_name(), "nct6775");
        assert_eq!(controller.channel_ids(), vec!["pwm1", "pwm2"]);
    }

    #[test]
    fn test_probe_rejects_chip_without_pwm() {
        let tree = FakeHwmonTree::new();
        let chip = tree.chip("thermal", |c| {
            c.temp(1, 30000, None);
        });
        assert!(HwmonChannelController::probe(&chip).is_none());
    }

    #[test]
    fn test_probe_restores_automatic_mode_after_verification() {
        let tree = FakeHwmonTree::new();
        let chip = tree.chip("nct6775", |c| {
            c.pwm(1, 100, Some("2"));
        });

        let controller = HwmonChannelController::probe(&chip).expect("chip should probe");
        assert_eq!(controller.channel_ids(), vec!["pwm1"]);
        // verification round trip must leave the BIOS mode in place
        let enable = fs::read_to_string(chip.join("pwm1_enable")).unwrap();
        assert_eq!(enable.trim(), "2");
    }

    #[test]
    fn test_probe_excludes_channel_with_unreadable_enable() {
        let tree = FakeHwmonTree::new();
        let chip = tree.chip("amdgpu", |c| {
            c.pwm(1, 100, Some("1"));
        });
        // a directory in place of the enable file makes it unreadable
        fs::remove_file(chip.join("pwm1_enable")).unwrap();
        fs::create_dir(chip.join("pwm1_enable")).unwrap();

        assert!(HwmonChannelController::probe(&chip).is_none());
    }

    #[test]
    fn test_set_speed_percent_clamps_to_floor() {
        let tree = FakeHwmonTree::new();
        let chip = tree.chip("nct6775", |c| {
            c.pwm(1, 0, Some("1"));
        });
        let controller = HwmonChannelController::probe(&chip).unwrap();

        // 5% of 255 is 12, below the floor -> 51 written
        controller.set_speed_percent("pwm1", 5).unwrap();
        assert_eq!(fs::read_to_string(chip.join("pwm1")).unwrap(), "51");

        controller.set_speed_percent("pwm1", 0).unwrap();
        assert_eq!(fs::read_to_string(chip.join("pwm1")).unwrap(), "51");

        controller.set_speed_percent("pwm1", 100).unwrap();
        assert_eq!(fs::read_to_string(chip.join("pwm1")).unwrap(), "255");

        controller.set_speed_percent("pwm1", 50).unwrap();
        assert_eq!(fs::read_to_string(chip.join("pwm1")).unwrap(), "127");
    }

    #[test]
    fn test_set_speed_percent_forces_manual_mode() {
        let tree = FakeHwmonTree::new();
        let chip = tree.chip("nct6775", |c| {
            c.pwm(1, 0, Some("2"));
        });
        let controller = HwmonChannelController::probe(&chip).unwrap();

        controller.set_speed_percent("pwm1", 60).unwrap();
        assert_eq!(fs::read_to_string(chip.join("pwm1_enable")).unwrap(), "1");
        assert_eq!(fs::read_to_string(chip.join("pwm1")).unwrap(), "153");
    }

    #[test]
    fn test_set_speed_percent_unknown_channel() {
        let tree = FakeHwmonTree::new();
        let chip = tree.chip("nct6775", |c| {
            c.pwm(1, 0, Some("1"));
        });
        let controller = HwmonChannelController::probe(&chip).unwrap();

        let err = controller.set_speed_percent("pwm9", 50).unwrap_err();
        assert!(matches!(err, ControlError::ChannelUnavailable { .. }));
    }

    #[test]
    fn test_set_speed_percent_rejects_out_of_range() {
        let tree = FakeHwmonTree::new();
        let chip = tree.chip("nct6775", |c| {
            c.pwm(1, 77, Some("1"));
        });
        let controller = HwmonChannelController::probe(&chip).unwrap();

        let err = controller.set_speed_percent("pwm1", 101).unwrap_err();
        assert!(matches!(err, ControlError::InvalidArgument(_)));
        // rejected before any write
        assert_eq!(fs::read_to_string(chip.join("pwm1")).unwrap(), "77");
    }

    #[test]
    fn test_initialize_switches_all_channels_to_manual() {
        let tree = FakeHwmonTree::new();
        let chip = tree.chip("nct6775", |c| {
            c.pwm(1, 0, Some("2"));
            c.pwm(2, 0, Some("0"));
            c.pwm(3, 0, None);
        });
        let controller = HwmonChannelController::probe(&chip).unwrap();

        let results = controller.initialize();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(fs::read_to_string(chip.join("pwm1_enable")).unwrap(), "1");
        assert_eq!(fs::read_to_string(chip.join("pwm2_enable")).unwrap(), "1");
    }

    #[test]
    fn test_read_status_converts_units() {
        let tree = FakeHwmonTree::new();
        let chip = tree.chip("nct6775", |c| {
            c.pwm(1, 128, Some("1"));
            c.fan(1, 1200, Some("CPU Fan"));
            c.temp(1, 45500, Some("CPU Temp"));
        });
        let controller = HwmonChannelController::probe(&chip).unwrap();

        let status = controller.read_status();
        assert!(status
            .iter()
            .any(|s| s.label == "CPU Fan" && s.value == "1200" && s.unit == "rpm"));
        assert!(status
            .iter()
            .any(|s| s.label == "CPU Temp" && s.value == "45.5" && s.unit == "°C"));
        assert!(status
            .iter()
            .any(|s| s.label.ends_with("duty") && s.value == "50" && s.unit == "%"));
    }

    #[test]
    fn test_scan_skips_deny_listed_and_claimed_chips() {
        let tree = FakeHwmonTree::new();
        tree.chip("coretemp", |c| {
            c.pwm(1, 0, Some("1"));
        });
        tree.chip("nct6775", |c| {
            c.pwm(1, 0, Some("1"));
        });
        let claimed = tree.chip_with_device_link("usbcooler", "usb1/1-1", |c| {
            c.pwm(1, 0, Some("1"));
        });

        let all = scan(tree.root(), &[]);
        let names: Vec<&str> = all.iter().map(|c| c.chip_name()).collect();
        assert!(names.contains(&"nct6775"));
        assert!(names.contains(&"usbcooler"));
        assert!(!names.contains(&"coretemp"));

        let excluded = vec![device_sysfs_path(&claimed).unwrap()];
        let filtered = scan(tree.root(), &excluded);
        let names: Vec<&str> = filtered.iter().map(|c| c.chip_name()).collect();
        assert!(names.contains(&"nct6775"));
        assert!(!names.contains(&"usbcooler"));
    }

    #[test]
    fn test_backend_discover_builds_descriptors() {
        let tree = FakeHwmonTree::new();
        tree.chip("nct6775", |c| {
            c.pwm(1, 0, Some("1"));
            c.pwm(2, 0, Some("1"));
        });

        let backend = HwmonBackend::with_root(tree.root());
        assert!(backend.is_available());
        let devices = backend.discover(&[]).unwrap();
        assert_eq!(devices.len(), 1);

        let descriptor = &devices[0].descriptor;
        assert_eq!(descriptor.match_key, "hwmon:nct6775");
        assert_eq!(descriptor.kind, DeviceKind::Hwmon);
        assert!(descriptor.supports_cooling);
        assert!(!descriptor.supports_lighting);
        assert_eq!(descriptor.speed_channels, vec!["pwm1", "pwm2"]);
    }
}
