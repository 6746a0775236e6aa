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

//! Backend abstraction and the priority-ordered discovery registry.
//!
//! A backend owns one way of talking to hardware (vendor USB protocol,
//! kernel hwmon). The same physical device can be reachable through more
//! than one backend at once: a USB cooler typically also exposes a generic
//! hwmon interface for its fan header. Discovery therefore runs highest
//! priority first and hands each later backend the sysfs paths already
//! claimed.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Result;
use crate::hwmon::HwmonChannelController;
use crate::logger;
use crate::vendor::VendorDevice;

/// Static descriptor for a backend variant, fixed at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub name: &'static str,
    /// 0-100, higher wins during discovery ordering.
    pub priority: u8,
    pub supports_cooling: bool,
    pub supports_lighting: bool,
    pub supports_monitoring: bool,
}

/// Canonical resolved path of the physical device backing an interface.
/// Purely a deduplication key: two backends reporting overlapping or
/// parent/child paths are talking to the same hardware.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SysfsPath(PathBuf);

impl SysfsPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SysfsPath(path.into())
    }

    /// Resolve symlinks where possible; an unresolvable path is kept as-is
    /// so it can still participate in exact-match deduplication.
    pub fn canonicalized(path: &Path) -> Self {
        SysfsPath(fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Equal, ancestor or descendant. Component-wise comparison, so
    /// `/usb1/1-1` does not overlap `/usb1/1-10`.
    pub fn overlaps(&self, other: &SysfsPath) -> bool {
        self.0.starts_with(&other.0) || other.0.starts_with(&self.0)
    }
}

impl fmt::Display for SysfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Device shape, selected once at discovery time and stored on the
/// descriptor rather than re-derived downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    VendorLighting,
    VendorCooling,
    Hwmon,
    Generic,
}

/// Discovered device metadata. Recreated on every discovery pass; the only
/// post-construction mutation is the configured kind override merged from
/// user settings.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub name: String,
    /// Opaque stable identifier; profile keys are `"<match_key>:<channel>"`.
    pub match_key: String,
    pub kind: DeviceKind,
    pub color_channels: Vec<String>,
    pub speed_channels: Vec<String>,
    pub color_modes: Vec<String>,
    pub supports_lighting: bool,
    pub supports_cooling: bool,
}

/// The live control surface behind a descriptor.
pub enum DeviceBinding {
    Vendor(Box<dyn VendorDevice>),
    Hwmon(HwmonChannelController),
}

impl fmt::Debug for DeviceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceBinding::Vendor(_) => write!(f, "DeviceBinding::Vendor"),
            DeviceBinding::Hwmon(c) => write!(f, "DeviceBinding::Hwmon({})", c.chip_name()),
        }
    }
}

#[derive(Debug)]
pub struct DiscoveredDevice {
    pub descriptor: DeviceDescriptor,
    pub binding: DeviceBinding,
}

/// One way of discovering and controlling hardware.
pub trait HardwareBackend {
    fn capabilities(&self) -> BackendCapabilities;

    /// Cheap probe; unavailable backends are left out of discovery entirely.
    fn is_available(&self) -> bool;

    /// Discover devices, ignoring hardware whose sysfs path overlaps one of
    /// `excluded` (already claimed by a higher-priority backend).
    fn discover(&self, excluded: &[SysfsPath]) -> Result<Vec<DiscoveredDevice>>;

    /// Sysfs paths claimed by `devices`, used to exclude them from
    /// lower-priority backends. Empty when not applicable.
    fn device_sysfs_paths(&self, devices: &[DiscoveredDevice]) -> Vec<SysfsPath>;
}

/// Explicitly constructed registry; backends are registered once during
/// process startup and the registry is passed to whoever needs it.
#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<Box<dyn HardwareBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        BackendRegistry { backends: Vec::new() }
    }

    /// Idempotent by backend name: re-registering a variant is a no-op.
    pub fn register(&mut self, backend: Box<dyn HardwareBackend>) {
        let caps = backend.capabilities();
        if self.backends.iter().any(|b| b.capabilities().name == caps.name) {
            return;
        }
        logger::log_event(
            "backend_registered",
            json!({ "name": caps.name, "priority": caps.priority }),
        );
        self.backends.push(backend);
    }

    /// Registered backends whose availability probe passes, sorted by
    /// descending priority. The sort is stable, so ties keep registration
    /// order.
    pub fn available_backends(&self) -> Vec<&dyn HardwareBackend> {
        let mut available: Vec<&dyn HardwareBackend> = self
            .backends
            .iter()
            .map(|b| b.as_ref())
            .filter(|b| b.is_available())
            .collect();
        available.sort_by(|a, b| b.capabilities().priority.cmp(&a.capabilities().priority));
        available
    }

    /// Discover devices from every available backend with automatic
    /// deduplication: each backend sees the sysfs paths every earlier
    /// (higher-or-equal priority) backend claimed and must not report
    /// hardware behind them. A backend whose discovery fails is logged and
    /// skipped; the remaining backends still run.
    pub fn discover_all(&self) -> Vec<(BackendCapabilities, Vec<DiscoveredDevice>)> {
        let mut results = Vec::new();
        let mut excluded: Vec<SysfsPath> = Vec::new();

        for backend in self.available_backends() {
            let caps = backend.capabilities();
            match backend.discover(&excluded) {
                Ok(devices) => {
                    if devices.is_empty() {
                        continue;
                    }
                    logger::log_event(
                        "backend_discovered",
                        json!({ "backend": caps.name, "devices": devices.len() }),
                    );
                    let claimed = backend.device_sysfs_paths(&devices);
                    excluded.extend(claimed);
                    results.push((caps, devices));
                }
                Err(e) => {
                    logger::warn(&format!("backend {} discovery failed: {}", caps.name, e));
                }
            }
        }

        results
    }
}
