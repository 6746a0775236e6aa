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

//! Stateful façade over the discovered device set.
//!
//! Translates each control intent into exactly one backend call and caches
//! the last applied color/mode/speed per `"device:channel"` key. The cache
//! pre-fills interactive prompts and feeds the current-state autosave;
//! failure-policy decisions live in the reconciler, not here.

use std::collections::BTreeMap;

use crate::backend::{
    BackendCapabilities, DeviceBinding, DeviceDescriptor, DeviceKind, DiscoveredDevice,
};
use crate::error::{ControlError, Result};
use crate::modes;
use crate::profile::{parse_hex_color, split_key, CurrentState, Profile};
use crate::vendor::{with_session, StatusEntry};

pub struct DeviceController {
    devices: BTreeMap<String, DiscoveredDevice>,
    last_colors: BTreeMap<String, String>,
    last_modes: BTreeMap<String, String>,
    last_speeds: BTreeMap<String, String>,
}

impl DeviceController {
    /// Index the discovery results by match key, applying configured
    /// device-kind overrides to the descriptors.
    pub fn new(
        discovered: Vec<(BackendCapabilities, Vec<DiscoveredDevice>)>,
        kind_overrides: &BTreeMap<String, DeviceKind>,
    ) -> Self {
        let mut devices = BTreeMap::new();
        for (_caps, list) in discovered {
            for mut device in list {
                if let Some(kind) = kind_overrides.get(&device.descriptor.match_key) {
                    device.descriptor.kind = *kind;
                }
                devices.insert(device.descriptor.match_key.clone(), device);
            }
        }
        DeviceController {
            devices,
            last_colors: BTreeMap::new(),
            last_modes: BTreeMap::new(),
            last_speeds: BTreeMap::new(),
        }
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.values().map(|d| &d.descriptor)
    }

    pub fn descriptor(&self, match_key: &str) -> Option<&DeviceDescriptor> {
        self.devices.get(match_key).map(|d| &d.descriptor)
    }

    pub fn has_device(&self, match_key: &str) -> bool {
        self.devices.contains_key(match_key)
    }

    fn device(&self, match_key: &str) -> Result<&DiscoveredDevice> {
        self.devices
            .get(match_key)
            .ok_or_else(|| ControlError::device_not_found(match_key))
    }

    fn cache_key(match_key: &str, channel: &str) -> String {
        format!("{}:{}", match_key, channel)
    }

    /// Set a fixed color on a lighting channel.
    pub fn set_led_color(&mut self, match_key: &str, channel: &str, color_hex: &str) -> Result<()> {
        self.set_led_mode_with_color(match_key, channel, "fixed", color_hex)
    }

    /// Set a colorless (self-generating) lighting mode. Color-requiring
    /// modes are rejected before any transport call.
    pub fn set_led_mode(&mut self, match_key: &str, channel: &str, mode: &str) -> Result<()> {
        if modes::requires_color(mode) {
            return Err(ControlError::InvalidArgument(format!(
                "mode '{}' requires a color",
                mode
            )));
        }
        self.apply_color_call(match_key, channel, mode, &[])?;
        self.last_modes
            .insert(Self::cache_key(match_key, channel), mode.to_string());
        Ok(())
    }

    /// Set a lighting mode with its color argument.
    pub fn set_led_mode_with_color(
        &mut self,
        match_key: &str,
        channel: &str,
        mode: &str,
        color_hex: &str,
    ) -> Result<()> {
        let rgb = parse_hex_color(color_hex)?;
        self.apply_color_call(match_key, channel, mode, &[rgb])?;
        let key = Self::cache_key(match_key, channel);
        self.last_colors.insert(key.clone(), normalize_hex(color_hex));
        self.last_modes.insert(key, mode.to_string());
        Ok(())
    }

    fn apply_color_call(
        &self,
        match_key: &str,
        channel: &str,
        mode: &str,
        colors: &[[u8; 3]],
    ) -> Result<()> {
        let device = self.device(match_key)?;
        match &device.binding {
            DeviceBinding::Vendor(handle) => {
                with_session(handle.as_ref(), |d| d.set_color(channel, mode, colors, "normal"))
            }
            DeviceBinding::Hwmon(_) => Err(ControlError::ChannelUnavailable {
                channel: channel.to_string(),
            }),
        }
    }

    /// Set fan/pump speed from a profile value (numeric string, 0-100).
    pub fn set_speed(&mut self, match_key: &str, channel: &str, speed: &str) -> Result<()> {
        let percent: u8 = speed
            .trim()
            .parse()
            .ok()
            .filter(|v| *v <= 100)
            .ok_or_else(|| {
                ControlError::InvalidArgument(format!("invalid speed value '{}'", speed))
            })?;

        let device = self.device(match_key)?;
        match &device.binding {
            DeviceBinding::Vendor(handle) => {
                with_session(handle.as_ref(), |d| d.set_fixed_speed(channel, percent))?
            }
            DeviceBinding::Hwmon(controller) => controller.set_speed_percent(channel, percent)?,
        }

        self.last_speeds
            .insert(Self::cache_key(match_key, channel), percent.to_string());
        Ok(())
    }

    /// Run the device's initialize sequence (manual-mode switch for hwmon,
    /// vendor init command otherwise).
    pub fn initialize_device(&mut self, match_key: &str) -> Result<Vec<StatusEntry>> {
        let device = self.device(match_key)?;
        match &device.binding {
            DeviceBinding::Vendor(handle) => with_session(handle.as_ref(), |d| d.initialize()),
            DeviceBinding::Hwmon(controller) => {
                let entries = controller
                    .initialize()
                    .into_iter()
                    .map(|(channel, result)| match result {
                        Ok(()) => StatusEntry::new(format!("{} mode", channel), "manual", ""),
                        Err(e) => StatusEntry::new(format!("{} mode", channel), e.to_string(), ""),
                    })
                    .collect();
                Ok(entries)
            }
        }
    }

    pub fn device_status(&self, match_key: &str) -> Result<Vec<StatusEntry>> {
        let device = self.device(match_key)?;
        match &device.binding {
            DeviceBinding::Vendor(handle) => with_session(handle.as_ref(), |d| d.get_status()),
            DeviceBinding::Hwmon(controller) => Ok(controller.read_status()),
        }
    }

    pub fn last_color(&self, match_key: &str, channel: &str) -> Option<&str> {
        self.last_colors
            .get(&Self::cache_key(match_key, channel))
            .map(String::as_str)
    }

    pub fn last_mode(&self, match_key: &str, channel: &str) -> Option<&str> {
        self.last_modes
            .get(&Self::cache_key(match_key, channel))
            .map(String::as_str)
    }

    pub fn last_speed(&self, match_key: &str, channel: &str) -> Option<&str> {
        self.last_speeds
            .get(&Self::cache_key(match_key, channel))
            .map(String::as_str)
    }

    /// Replace the cached state wholesale, e.g. when a profile was loaded
    /// and is about to be applied.
    pub fn seed_state(&mut self, profile: &Profile) {
        self.last_colors = profile.colors.clone();
        self.last_modes = profile.modes.clone();
        self.last_speeds = profile.speeds.clone();
    }

    /// Snapshot the cached state for autosave. Per-channel entries of
    /// devices running a global sync effect are filtered out: the sync
    /// entry already describes the whole device and stale channel entries
    /// would fight it on the next restore.
    pub fn current_state(&self, active_profile: Option<&str>) -> CurrentState {
        let mut synced_devices: Vec<&str> = Vec::new();
        for (key, mode) in &self.last_modes {
            if let Some((device, channel)) = split_key(key) {
                if channel == "sync" && modes::is_global_effect(mode) {
                    synced_devices.push(device);
                }
            }
        }

        let keep = |key: &str| -> bool {
            match split_key(key) {
                Some((device, channel)) => {
                    channel == "sync" || !synced_devices.contains(&device)
                }
                None => false,
            }
        };

        let mut profile = Profile::default();
        profile.colors = self
            .last_colors
            .iter()
            .filter(|(k, _)| keep(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        profile.modes = self
            .last_modes
            .iter()
            .filter(|(k, _)| keep(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        // speeds never conflict with lighting sync state
        profile.speeds = self.last_speeds.clone();

        CurrentState {
            profile,
            active_profile: active_profile.map(String::from),
        }
    }
}

fn normalize_hex(color: &str) -> String {
    let hex = color.strip_prefix('#').unwrap_or(color);
    format!("#{}", hex.to_lowercase())
}
