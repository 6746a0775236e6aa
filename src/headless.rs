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

//! Headless startup restore: load the saved current state and push it to
//! whatever hardware is present. Run from a oneshot systemd unit or the
//! CLI; everything here is best-effort.

use std::collections::BTreeSet;

use serde_json::json;

use crate::controller::DeviceController;
use crate::logger;
use crate::profile::{split_key, Profile, ProfileStore};
use crate::reconcile::{ApplyOutcome, ProfileReconciler};
use crate::settings::Settings;

/// Device match keys referenced anywhere in a profile, sorted and deduped.
pub fn collect_device_matches(profile: &Profile) -> Vec<String> {
    let mut matches: BTreeSet<String> = BTreeSet::new();
    for key in profile
        .colors
        .keys()
        .chain(profile.modes.keys())
        .chain(profile.speeds.keys())
    {
        if let Some((device, _channel)) = split_key(key) {
            matches.insert(device.to_string());
        }
    }
    matches.into_iter().collect()
}

/// Initialize every device the profile references and is currently
/// connected. Absent devices are skipped quietly, other failures logged.
pub fn initialize_referenced_devices(controller: &mut DeviceController, profile: &Profile) {
    for match_key in collect_device_matches(profile) {
        if !controller.has_device(&match_key) {
            logger::log_event("startup_skip_missing", json!({ "device": match_key }));
            continue;
        }
        match controller.initialize_device(&match_key) {
            Ok(entries) => logger::log_event(
                "startup_initialized",
                json!({ "device": match_key, "properties": entries.len() }),
            ),
            Err(e) => logger::warn(&format!("initialization failed for {}: {}", match_key, e)),
        }
    }
}

/// Apply the saved current state to the discovered hardware. Returns None
/// when no state was ever saved.
pub fn apply_saved_state(
    controller: &mut DeviceController,
    store: &ProfileStore,
    settings: &Settings,
) -> Option<ApplyOutcome> {
    let state = store.load_current_state()?;

    if settings.auto_initialize_on_startup {
        initialize_referenced_devices(controller, &state.profile);
    }

    controller.seed_state(&state.profile);
    let outcome = ProfileReconciler::new(controller).apply(&state.profile);
    logger::log_event(
        "startup_state_applied",
        json!({
            "active_profile": state.active_profile,
            "applied": outcome.applied,
            "failed": outcome.failed,
        }),
    );
    Some(outcome)
}
