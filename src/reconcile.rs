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

//! Profile reconciliation: drive the device set to match a declarative
//! profile.
//!
//! Application runs as four strictly ordered passes:
//!
//! 1. sync-channel modes (they set the base state for every LED, and a
//!    global effect marks the device so later passes leave it alone)
//! 2. per-channel modes, skipped on globally-synced devices
//! 3. color-only entries (implicit `fixed`), skipped on globally-synced
//!    devices
//! 4. speeds, unconditional
//!
//! Every pass is best-effort: hardware named by the profile but not
//! currently connected is skipped silently, any other failure is logged
//! and reconciliation moves on. Re-applying the same profile converges to
//! the same device state.

use std::collections::BTreeSet;

use serde_json::json;

use crate::controller::DeviceController;
use crate::error::ControlError;
use crate::logger;
use crate::modes;
use crate::profile::{split_key, Profile};

/// Counters summarizing one `apply` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub applied: usize,
    /// Entries skipped because their device is not currently connected.
    pub skipped_missing: usize,
    /// Entries skipped because a global sync effect owns the device.
    pub skipped_synced: usize,
    pub failed: usize,
}

pub struct ProfileReconciler<'a> {
    controller: &'a mut DeviceController,
}

impl<'a> ProfileReconciler<'a> {
    pub fn new(controller: &'a mut DeviceController) -> Self {
        ProfileReconciler { controller }
    }

    pub fn apply(&mut self, profile: &Profile) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        // Classification is static on the profile: a device whose sync
        // channel names a global effect is off-limits for per-channel
        // passes even if the sync write itself fails later.
        let mut synced_devices: BTreeSet<String> = BTreeSet::new();
        for (key, mode) in &profile.modes {
            if let Some((device, channel)) = split_key(key) {
                if channel == "sync" && modes::is_global_effect(mode) {
                    synced_devices.insert(device.to_string());
                }
            }
        }

        // pass 1: sync channels
        for (key, mode) in &profile.modes {
            let Some((device, channel)) = split_key(key) else {
                continue;
            };
            if channel != "sync" {
                continue;
            }
            let result = self.apply_mode(device, channel, mode, profile.colors.get(key));
            self.record(&mut outcome, "sync mode", key, result);
        }

        // pass 2: per-channel modes
        for (key, mode) in &profile.modes {
            let Some((device, channel)) = split_key(key) else {
                continue;
            };
            if channel == "sync" {
                continue;
            }
            if synced_devices.contains(device) {
                outcome.skipped_synced += 1;
                logger::log_event(
                    "reconcile_skip_synced",
                    json!({ "key": key, "mode": mode }),
                );
                continue;
            }
            let result = self.apply_mode(device, channel, mode, profile.colors.get(key));
            self.record(&mut outcome, "mode", key, result);
        }

        // pass 3: colors without an explicit mode imply fixed
        for (key, color) in &profile.colors {
            if color.is_empty() || profile.modes.contains_key(key) {
                continue;
            }
            let Some((device, channel)) = split_key(key) else {
                continue;
            };
            if synced_devices.contains(device) {
                outcome.skipped_synced += 1;
                logger::log_event(
                    "reconcile_skip_synced",
                    json!({ "key": key, "color": color }),
                );
                continue;
            }
            let result = self.controller.set_led_color(device, channel, color);
            self.record(&mut outcome, "color", key, result);
        }

        // pass 4: speeds never conflict with lighting sync state
        for (key, speed) in &profile.speeds {
            let Some((device, channel)) = split_key(key) else {
                continue;
            };
            let result = self.controller.set_speed(device, channel, speed);
            self.record(&mut outcome, "speed", key, result);
        }

        logger::log_event(
            "reconcile_done",
            json!({
                "applied": outcome.applied,
                "skipped_missing": outcome.skipped_missing,
                "skipped_synced": outcome.skipped_synced,
                "failed": outcome.failed,
            }),
        );
        outcome
    }

    fn apply_mode(
        &mut self,
        device: &str,
        channel: &str,
        mode: &str,
        color: Option<&String>,
    ) -> Result<(), ControlError> {
        match color {
            Some(color) if !color.is_empty() && modes::requires_color(mode) => self
                .controller
                .set_led_mode_with_color(device, channel, mode, color),
            _ => self.controller.set_led_mode(device, channel, mode),
        }
    }

    fn record(
        &self,
        outcome: &mut ApplyOutcome,
        what: &str,
        key: &str,
        result: Result<(), ControlError>,
    ) {
        match result {
            Ok(()) => outcome.applied += 1,
            Err(e) if e.is_device_not_found() => {
                // hardware simply not connected right now
                outcome.skipped_missing += 1;
                logger::log_event("reconcile_skip_missing", json!({ "key": key }));
            }
            Err(e) => {
                outcome.failed += 1;
                logger::warn(&format!("failed to apply {} for {}: {}", what, key, e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendCapabilities;
    use crate::test_utils::test_utils::{vendor_discovery, Call, RecordingDevice};
    use std::collections::BTreeMap;

    fn caps() -> BackendCapabilities {
        BackendCapabilities {
            name: "vendor",
            priority: 90,
            supports_cooling: true,
            supports_lighting: true,
            supports_monitoring: true,
        }
    }

    fn profile(entries: &[(&str, &str, &str)]) -> Profile {
        let mut profile = Profile::default();
        for (map, key, value) in entries {
            let target = match *map {
                "colors" => &mut profile.colors,
                "modes" => &mut profile.modes,
                "speeds" => &mut profile.speeds,
                other => panic!("unknown map {other}"),
            };
            target.insert(key.to_string(), value.to_string());
        }
        profile
    }

    #[test]
    fn test_global_sync_excludes_per_channel_entries() {
        let (device, log) = RecordingDevice::new("dev");
        let mut controller = crate::controller::DeviceController::new(
            vec![(caps(), vendor_discovery("dev", device))],
            &BTreeMap::new(),
        );

        let profile = profile(&[
            ("modes", "dev:sync", "spectrum-wave"),
            ("modes", "dev:logo", "fixed"),
            ("colors", "dev:logo", "#ff0000"),
        ]);

        let outcome = ProfileReconciler::new(&mut controller).apply(&profile);
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.skipped_synced, 1);
        assert_eq!(outcome.failed, 0);

        let calls = log.borrow();
        // exactly one lighting command: the sync effect; nothing for logo
        let color_calls: Vec<_> = calls
            .iter()
            .filter(|c| matches!(c, Call::SetColor { .. }))
            .collect();
        assert_eq!(color_calls.len(), 1);
        assert!(matches!(
            color_calls[0],
            Call::SetColor { ref channel, ref mode, .. }
                if channel == "sync" && mode == "spectrum-wave"
        ));
    }

    #[test]
    fn test_non_global_sync_mode_does_not_exclude_channels() {
        let (device, log) = RecordingDevice::new("dev");
        let mut controller = crate::controller::DeviceController::new(
            vec![(caps(), vendor_discovery("dev", device))],
            &BTreeMap::new(),
        );

        // fixed on sync is not a global animation; per-channel entries stay
        let profile = profile(&[
            ("modes", "dev:sync", "fixed"),
            ("colors", "dev:sync", "#ffffff"),
            ("modes", "dev:logo", "pulse"),
            ("colors", "dev:logo", "#ff0000"),
        ]);

        let outcome = ProfileReconciler::new(&mut controller).apply(&profile);
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.skipped_synced, 0);

        let calls = log.borrow();
        let channels: Vec<String> = calls
            .iter()
            .filter_map(|c| match c {
                Call::SetColor { channel, .. } => Some(channel.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(channels, vec!["sync", "logo"]);
    }

    #[test]
    fn test_pass_ordering_sync_modes_colors_speeds() {
        let (device, log) = RecordingDevice::new("dev");
        let mut controller = crate::controller::DeviceController::new(
            vec![(caps(), vendor_discovery("dev", device))],
            &BTreeMap::new(),
        );

        let profile = profile(&[
            ("speeds", "dev:pump", "60"),
            ("colors", "dev:ring", "#00ff00"),
            ("modes", "dev:logo", "pulse"),
            ("colors", "dev:logo", "#ff0000"),
            ("modes", "dev:sync", "fixed"),
            ("colors", "dev:sync", "#0000ff"),
        ]);

        ProfileReconciler::new(&mut controller).apply(&profile);

        let calls = log.borrow();
        let ops: Vec<String> = calls
            .iter()
            .filter_map(|c| match c {
                Call::SetColor { channel, mode, .. } => Some(format!("{}={}", channel, mode)),
                Call::SetFixedSpeed { channel, duty } => Some(format!("{}@{}", channel, duty)),
                _ => None,
            })
            .collect();
        assert_eq!(
            ops,
            vec!["sync=fixed", "logo=pulse", "ring=fixed", "pump@60"]
        );
    }

    #[test]
    fn test_missing_device_skipped_silently_and_rest_applied() {
        let (device, log) = RecordingDevice::new("present");
        let mut controller = crate::controller::DeviceController::new(
            vec![(caps(), vendor_discovery("present", device))],
            &BTreeMap::new(),
        );

        let profile = profile(&[
            ("colors", "absent:ring", "#ff0000"),
            ("speeds", "absent:pump", "50"),
            ("colors", "present:ring", "#00ff00"),
            ("speeds", "present:pump", "70"),
        ]);

        let outcome = ProfileReconciler::new(&mut controller).apply(&profile);
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.skipped_missing, 2);
        assert_eq!(outcome.failed, 0);

        let calls = log.borrow();
        assert!(calls.iter().any(|c| matches!(
            c,
            Call::SetFixedSpeed { channel, duty: 70 } if channel == "pump"
        )));
    }

    #[test]
    fn test_channel_failure_does_not_abort_remaining_entries() {
        let (device, log) = RecordingDevice::new("dev");
        device.fail_on_channel("broken");
        let mut controller = crate::controller::DeviceController::new(
            vec![(caps(), vendor_discovery("dev", device))],
            &BTreeMap::new(),
        );

        let profile = profile(&[
            ("colors", "dev:broken", "#ff0000"),
            ("colors", "dev:ring", "#00ff00"),
            ("speeds", "dev:pump", "55"),
        ]);

        let outcome = ProfileReconciler::new(&mut controller).apply(&profile);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.applied, 2);

        let calls = log.borrow();
        assert!(calls.iter().any(|c| matches!(
            c,
            Call::SetColor { channel, .. } if channel == "ring"
        )));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let (device, log) = RecordingDevice::new("dev");
        let mut controller = crate::controller::DeviceController::new(
            vec![(caps(), vendor_discovery("dev", device))],
            &BTreeMap::new(),
        );

        let profile = profile(&[
            ("modes", "dev:sync", "spectrum-wave"),
            ("colors", "dev:ring", "#00ff00"),
            ("speeds", "dev:pump", "60"),
        ]);

        let first = ProfileReconciler::new(&mut controller).apply(&profile);
        let calls_after_first: Vec<Call> = log.borrow().clone();
        let second = ProfileReconciler::new(&mut controller).apply(&profile);
        let calls_after_second: Vec<Call> = log.borrow().clone();

        assert_eq!(first, second);
        // the second run issues exactly the same command sequence again
        assert_eq!(calls_after_second.len(), calls_after_first.len() * 2);
        assert_eq!(&calls_after_second[..calls_after_first.len()], &calls_after_first[..]);
        assert_eq!(&calls_after_second[calls_after_first.len()..], &calls_after_first[..]);
    }

    #[test]
    fn test_sync_mode_requiring_color_without_color_logs_and_continues() {
        let (device, log) = RecordingDevice::new("dev");
        let mut controller = crate::controller::DeviceController::new(
            vec![(caps(), vendor_discovery("dev", device))],
            &BTreeMap::new(),
        );

        // breathing needs a color; none in the profile
        let profile = profile(&[
            ("modes", "dev:sync", "breathing"),
            ("speeds", "dev:pump", "40"),
        ]);

        let outcome = ProfileReconciler::new(&mut controller).apply(&profile);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.applied, 1);
        // validation failed before transport: no SetColor recorded
        assert!(!log
            .borrow()
            .iter()
            .any(|c| matches!(c, Call::SetColor { .. })));
    }

    #[test]
    fn test_speeds_applied_even_on_globally_synced_device() {
        let (device, log) = RecordingDevice::new("dev");
        let mut controller = crate::controller::DeviceController::new(
            vec![(caps(), vendor_discovery("dev", device))],
            &BTreeMap::new(),
        );

        let profile = profile(&[
            ("modes", "dev:sync", "color-cycle"),
            ("speeds", "dev:fan1", "80"),
        ]);

        let outcome = ProfileReconciler::new(&mut controller).apply(&profile);
        assert_eq!(outcome.applied, 2);
        assert!(log.borrow().iter().any(|c| matches!(
            c,
            Call::SetFixedSpeed { channel, duty: 80 } if channel == "fan1"
        )));
    }
}
