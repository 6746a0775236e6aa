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

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControlError>;

/// Error taxonomy for device control operations.
///
/// `DeviceNotFound` is always recoverable: reconciliation treats it as
/// "hardware not currently connected" and skips the entry silently. All
/// other variants are surfaced or logged depending on the call site.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("device not found: {match_key}")]
    DeviceNotFound { match_key: String },

    #[error("channel not available: {channel}")]
    ChannelUnavailable { channel: String },

    #[error("write to {path} rejected: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("permission denied writing {path}; run as root or install the coolctl udev rules")]
    PermissionDenied { path: PathBuf },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ControlError {
    /// Classify a failed sysfs/transport write, splitting permission
    /// problems from driver rejections so the caller can show an
    /// actionable message instead of a raw OS error.
    pub fn write_failed(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::PermissionDenied {
            ControlError::PermissionDenied { path }
        } else {
            ControlError::WriteFailed { path, source }
        }
    }

    pub fn device_not_found(match_key: impl Into<String>) -> Self {
        ControlError::DeviceNotFound {
            match_key: match_key.into(),
        }
    }

    pub fn is_device_not_found(&self) -> bool {
        matches!(self, ControlError::DeviceNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_failed_maps_permission_errors() {
        let err = ControlError::write_failed(
            "/sys/class/hwmon/hwmon0/pwm1",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, ControlError::PermissionDenied { .. }));
        let msg = format!("{}", err);
        assert!(msg.contains("udev"));
        assert!(!msg.contains("denied"), "raw OS text must not leak: {msg}");
    }

    #[test]
    fn test_write_failed_keeps_driver_errors() {
        let err = ControlError::write_failed(
            "/sys/class/hwmon/hwmon0/pwm1",
            io::Error::new(io::ErrorKind::InvalidInput, "write error"),
        );
        match err {
            ControlError::WriteFailed { path, source } => {
                assert_eq!(path, PathBuf::from("/sys/class/hwmon/hwmon0/pwm1"));
                assert_eq!(source.kind(), io::ErrorKind::InvalidInput);
            }
            other => panic!("expected WriteFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_device_not_found_classification() {
        let err = ControlError::device_not_found("NZXT Smart Device");
        assert!(err.is_device_not_found());
        assert_eq!(format!("{}", err), "device not found: NZXT Smart Device");

        let other = ControlError::ChannelUnavailable {
            channel: "pwm9".to_string(),
        };
        assert!(!other.is_device_not_found());
    }
}
