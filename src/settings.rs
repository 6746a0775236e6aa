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

//! User settings: a JSON file deep-merged over built-in defaults.
//!
//! The core only consults `auto_initialize_on_startup` and the device-kind
//! overrides; presets exist for interactive frontends.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::DeviceKind;
use crate::profile::config_dir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetColor {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub auto_initialize_on_startup: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub preset_colors: Vec<PresetColor>,
    #[serde(default)]
    pub speed_presets: Vec<u8>,
    /// Per-device kind overrides keyed by match key, merged onto freshly
    /// discovered descriptors.
    #[serde(default)]
    pub device_kinds: BTreeMap<String, DeviceKind>,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            auto_initialize_on_startup: true,
            log_level: default_log_level(),
            preset_colors: Vec::new(),
            speed_presets: vec![25, 50, 75, 100],
            device_kinds: BTreeMap::new(),
        }
    }
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

/// Recursively overlay `overlay` onto `base`; objects merge key-wise,
/// everything else replaces.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, value) => *base_slot = value,
    }
}

/// Load settings from an explicit path, deep-merging the file's contents
/// over the defaults. A missing or unparseable file yields the defaults.
pub fn load_settings_from(path: &PathBuf) -> Settings {
    let defaults = Settings::default();
    let Ok(data) = fs::read_to_string(path) else {
        return defaults;
    };
    let Ok(overlay) = serde_json::from_str::<Value>(&data) else {
        return defaults;
    };
    let mut merged = match serde_json::to_value(&defaults) {
        Ok(v) => v,
        Err(_) => return defaults,
    };
    merge_values(&mut merged, overlay);
    serde_json::from_value(merged).unwrap_or(defaults)
}

pub fn load_settings() -> Settings {
    load_settings_from(&settings_path())
}

pub fn save_settings(settings: &Settings) -> io::Result<()> {
    let path = settings_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).unwrap_or_else(|_| "{}".to_string());
    fs::write(path, json)
}
