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

//! Declarative device profiles and their on-disk store.
//!
//! A profile is three flat maps keyed `"<device-match>:<channel>"`: fixed
//! colors, lighting modes, and fan/pump speeds. The current-state variant
//! adds the active profile name and is auto-saved so the last configuration
//! can be restored at startup.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};
use crate::vendor::Rgb;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub colors: BTreeMap<String, String>,
    #[serde(default)]
    pub modes: BTreeMap<String, String>,
    #[serde(default)]
    pub speeds: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentState {
    #[serde(flatten)]
    pub profile: Profile,
    #[serde(default)]
    pub active_profile: Option<String>,
}

/// Split a profile key into (device match, channel). Channels never contain
/// a colon while device matches may (`hwmon:nct6775`), so the split is on
/// the last separator.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.rsplit_once(':')
}

/// Parse `#rrggbb` (leading `#` optional) into an RGB triple.
pub fn parse_hex_color(color: &str) -> Result<Rgb> {
    let hex = color.strip_prefix('#').unwrap_or(color);
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ControlError::InvalidArgument(format!(
            "invalid color '{}', expected #rrggbb",
            color
        )));
    }
    let byte = |range| u8::from_str_radix(&hex[range], 16).unwrap_or(0);
    Ok([byte(0..2), byte(2..4), byte(4..6)])
}

fn is_safe_label(s: &str) -> bool {
    if s.is_empty() || s.len() > 128 {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-' | '.' | ' ' | '@' | '(' | ')' | '#'))
}

fn is_safe_profile_name(s: &str) -> bool {
    if s.is_empty() || s.len() > 64 {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '))
}

const MAX_ENTRIES: usize = 1024;

pub fn validate_profile(profile: &Profile) -> std::result::Result<(), String> {
    if profile.colors.len() > MAX_ENTRIES
        || profile.modes.len() > MAX_ENTRIES
        || profile.speeds.len() > MAX_ENTRIES
    {
        return Err(format!("too many profile entries (max {} per map)", MAX_ENTRIES));
    }

    for key in profile
        .colors
        .keys()
        .chain(profile.modes.keys())
        .chain(profile.speeds.keys())
    {
        if !is_safe_label(key) {
            return Err(format!("invalid characters or length in key '{}'", key));
        }
        if split_key(key).is_none() {
            return Err(format!("key '{}' must be of form 'device:channel'", key));
        }
    }

    for (key, color) in &profile.colors {
        if parse_hex_color(color).is_err() {
            return Err(format!("invalid color '{}' for '{}'", color, key));
        }
    }
    for (key, mode) in &profile.modes {
        if !is_safe_label(mode) {
            return Err(format!("invalid mode name for '{}'", key));
        }
    }
    for (key, speed) in &profile.speeds {
        match speed.trim().parse::<u8>() {
            Ok(v) if v <= 100 => {}
            _ => return Err(format!("speed '{}' for '{}' out of range (0-100)", speed, key)),
        }
    }
    Ok(())
}

pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg).join("coolctl");
    }
    if let Ok(home) = env::var("HOME") {
        return Path::new(&home).join(".config").join("coolctl");
    }
    PathBuf::from("/etc/coolctl")
}

/// Named profiles plus the auto-saved current state under one root
/// directory (`profiles/<name>.json` and `current.json`).
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    pub fn new() -> Self {
        ProfileStore { root: config_dir() }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        ProfileStore { root: root.into() }
    }

    fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    fn profile_path(&self, name: &str) -> Result<PathBuf> {
        if !is_safe_profile_name(name) {
            return Err(ControlError::InvalidArgument(format!(
                "invalid profile name '{}'",
                name
            )));
        }
        Ok(self.profiles_dir().join(format!("{}.json", name)))
    }

    fn current_state_path(&self) -> PathBuf {
        self.root.join("current.json")
    }

    pub fn save_profile(&self, name: &str, profile: &Profile) -> Result<PathBuf> {
        validate_profile(profile).map_err(ControlError::InvalidArgument)?;
        let path = self.profile_path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(profile)?)?;
        Ok(path)
    }

    pub fn load_profile(&self, name: &str) -> Result<Profile> {
        let path = self.profile_path(name)?;
        let data = fs::read_to_string(&path)?;
        let profile: Profile = serde_json::from_str(&data)?;
        validate_profile(&profile).map_err(ControlError::InvalidArgument)?;
        Ok(profile)
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(entries) = fs::read_dir(self.profiles_dir()) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.push(stem.to_string());
                    }
                }
            }
        }
        names.sort();
        names
    }

    pub fn delete_profile(&self, name: &str) -> Result<bool> {
        let path = self.profile_path(name)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    pub fn save_current_state(&self, state: &CurrentState) -> Result<()> {
        validate_profile(&state.profile).map_err(ControlError::InvalidArgument)?;
        fs::create_dir_all(&self.root)?;
        fs::write(
            self.current_state_path(),
            serde_json::to_string_pretty(state)?,
        )?;
        Ok(())
    }

    /// Missing or unparseable state yields None so startup restore stays
    /// best-effort.
    pub fn load_current_state(&self) -> Option<CurrentState> {
        let data = fs::read_to_string(self.current_state_path()).ok()?;
        serde_json::from_str(&data).ok()
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}
