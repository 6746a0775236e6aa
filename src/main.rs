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

use anyhow::{bail, Context, Result};

use coolctl::backend::BackendRegistry;
use coolctl::controller::DeviceController;
use coolctl::headless;
use coolctl::hwmon::HwmonBackend;
use coolctl::logger;
use coolctl::profile::ProfileStore;
use coolctl::reconcile::ProfileReconciler;
use coolctl::settings::load_settings;
use coolctl::vendor::{CliEnumerator, VendorProtocolBackend};

fn usage() -> ! {
    eprintln!("usage: coolctl [--logging] <list|status|init|apply [profile]|profiles|delete <profile>>");
    std::process::exit(2);
}

fn build_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register(Box::new(VendorProtocolBackend::new(Box::new(
        CliEnumerator::detect(),
    ))));
    registry.register(Box::new(HwmonBackend::new()));
    registry
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let logging_enabled = args.iter().any(|a| a == "--logging");
    if logging_enabled {
        logger::init_logging();
        logger::log_event("startup", serde_json::json!({ "args": args }));
    }

    // hwmon writes normally need root; vendor devices may work via udev rules
    if unsafe { libc::geteuid() } != 0 {
        eprintln!("coolctl: not running as root; hwmon fan control may be unavailable");
    }

    let command = args
        .iter()
        .skip(1)
        .find(|a| !a.starts_with("--"))
        .map(String::as_str);

    let settings = load_settings();
    let registry = build_registry();
    let store = ProfileStore::new();

    match command {
        Some("list") => {
            let discovered = registry.discover_all();
            if discovered.is_empty() {
                println!("No devices found.");
                return Ok(());
            }
            for (caps, devices) in &discovered {
                for device in devices {
                    let d = &device.descriptor;
                    println!("{} [{}]", d.name, caps.name);
                    if !d.color_channels.is_empty() {
                        println!("  color channels: {}", d.color_channels.join(", "));
                    }
                    if !d.speed_channels.is_empty() {
                        println!("  speed channels: {}", d.speed_channels.join(", "));
                    }
                }
            }
        }
        Some("status") => {
            let controller =
                DeviceController::new(registry.discover_all(), &settings.device_kinds);
            for descriptor in controller.descriptors().cloned().collect::<Vec<_>>() {
                println!("{}", descriptor.name);
                match controller.device_status(&descriptor.match_key) {
                    Ok(entries) => {
                        for entry in entries {
                            println!("  {}: {} {}", entry.label, entry.value, entry.unit);
                        }
                    }
                    Err(e) => println!("  status unavailable: {}", e),
                }
            }
        }
        Some("init") => {
            let mut controller =
                DeviceController::new(registry.discover_all(), &settings.device_kinds);
            let matches: Vec<String> = controller
                .descriptors()
                .map(|d| d.match_key.clone())
                .collect();
            for match_key in matches {
                match controller.initialize_device(&match_key) {
                    Ok(entries) => {
                        println!("{}: initialized ({} properties)", match_key, entries.len())
                    }
                    Err(e) => eprintln!("{}: initialization failed: {}", match_key, e),
                }
            }
        }
        Some("apply") => {
            let mut controller =
                DeviceController::new(registry.discover_all(), &settings.device_kinds);
            let profile_name = args
                .iter()
                .skip(1)
                .filter(|a| !a.starts_with("--"))
                .nth(1)
                .cloned();

            let outcome = match profile_name {
                Some(name) => {
                    let profile = store
                        .load_profile(&name)
                        .with_context(|| format!("loading profile '{}'", name))?;
                    controller.seed_state(&profile);
                    let outcome = ProfileReconciler::new(&mut controller).apply(&profile);
                    store
                        .save_current_state(&controller.current_state(Some(name.as_str())))
                        .context("saving current state")?;
                    outcome
                }
                None => match headless::apply_saved_state(&mut controller, &store, &settings) {
                    Some(outcome) => outcome,
                    None => {
                        println!("No saved state found; nothing to apply.");
                        return Ok(());
                    }
                },
            };

            println!(
                "Applied {} entries ({} missing devices skipped, {} failed).",
                outcome.applied, outcome.skipped_missing, outcome.failed
            );
            if outcome.failed > 0 {
                bail!("{} profile entries failed to apply", outcome.failed);
            }
        }
        Some("profiles") => {
            let names = store.list_profiles();
            if names.is_empty() {
                println!("No saved profiles.");
            }
            for name in names {
                println!("{}", name);
            }
        }
        Some("delete") => {
            let name = args
                .iter()
                .skip(1)
                .filter(|a| !a.starts_with("--"))
                .nth(1)
                .cloned();
            let Some(name) = name else { usage() };
            if store.delete_profile(&name)? {
                println!("Deleted profile '{}'.", name);
            } else {
                bail!("no such profile '{}'", name);
            }
        }
        _ => usage(),
    }

    Ok(())
}
