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

//! Fixed classification of lighting modes.
//!
//! Two hardcoded sets drive reconciliation: modes that animate the whole
//! device as one visual unit when applied on the `sync` channel, and modes
//! that generate their own colors and therefore take no color argument.
//! The sets are intentionally closed; an unknown mode name is treated as a
//! per-channel, color-requiring effect.

use std::collections::HashSet;

use lazy_static::lazy_static;

lazy_static! {
    /// Effects that drive every LED of the device when set on `sync`.
    /// Individual channel writes are pointless (or conflicting) while one
    /// of these is active.
    static ref GLOBAL_SYNC_MODES: HashSet<&'static str> = [
        "spectrum-wave",
        "color-cycle",
        "rainbow-flow",
        "super-rainbow",
        "rainbow-pulse",
        "covering-marquee",
        "marquee-3",
        "marquee-4",
        "marquee-5",
        "marquee-6",
        "moving-alternating-3",
        "moving-alternating-4",
        "moving-alternating-5",
        "alternating-3",
        "alternating-4",
        "alternating-5",
    ]
    .iter()
    .copied()
    .collect();

    /// Self-generating effects that reject or ignore a color argument.
    static ref COLORLESS_MODES: HashSet<&'static str> = [
        "off",
        "spectrum-wave",
        "color-cycle",
        "rainbow-flow",
        "super-rainbow",
        "rainbow-pulse",
        "covering-marquee",
        "marquee-3",
        "marquee-4",
        "marquee-5",
        "marquee-6",
        "moving-alternating-3",
        "moving-alternating-4",
        "moving-alternating-5",
        "alternating-3",
        "alternating-4",
        "alternating-5",
    ]
    .iter()
    .copied()
    .collect();
}

/// True if `mode`, applied on the `sync` channel, owns every LED on the
/// device for the duration of the effect.
pub fn is_global_effect(mode: &str) -> bool {
    GLOBAL_SYNC_MODES.contains(mode)
}

/// True if `mode` needs a color argument supplied by the caller.
pub fn requires_color(mode: &str) -> bool {
    !COLORLESS_MODES.contains(mode)
}
