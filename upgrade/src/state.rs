// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::fmt;
use core::str::FromStr;

use heapless::String;

use crate::error::UpgradeError;

/// Longest file name accepted for a transferred image, in bytes
pub const MAX_FILE_NAME_LEN: usize = 32;

/// Coarse stage of the upgrade cycle, as reported to the core
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UpgradeStage {
    Idle,
    Ongoing,
    DeviceReboot,
    End,
}

/// Outcome of a finished upgrade cycle
///
/// The discriminants are the codes used on the wire and in the persisted reboot record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum EndState {
    Success = 1,
    UnknownError = 2,
}

impl EndState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(EndState::Success),
            2 => Some(EndState::UnknownError),
            _ => None,
        }
    }
}

/// UpgradeState pushed to the core
///
/// Only the payload of the current stage exists, so a progress value can never be read
/// while the device is rebooting and so on.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum UpgradeState {
    #[default]
    Idle,
    /// Progress in percent, 0..=100
    Ongoing { progress: u8 },
    /// Advisory time in seconds the terminal should wait for the device to come back
    DeviceReboot { timeout: u16 },
    End { end_state: EndState },
}

impl UpgradeState {
    pub fn stage(&self) -> UpgradeStage {
        match self {
            UpgradeState::Idle => UpgradeStage::Idle,
            UpgradeState::Ongoing { .. } => UpgradeStage::Ongoing,
            UpgradeState::DeviceReboot { .. } => UpgradeStage::DeviceReboot,
            UpgradeState::End { .. } => UpgradeStage::End,
        }
    }

    /// True while a cycle owns the state machine and must not be interrupted
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            UpgradeState::Ongoing { .. } | UpgradeState::DeviceReboot { .. }
        )
    }
}

/// Firmware version announced to the core, `major.minor.modify.debug`
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub modify: u8,
    pub debug: u8,
}

impl FirmwareVersion {
    pub const fn new(major: u8, minor: u8, modify: u8, debug: u8) -> Self {
        Self {
            major,
            minor,
            modify,
            debug,
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.modify, self.debug
        )
    }
}

impl FromStr for FirmwareVersion {
    type Err = UpgradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = [0u8; 4];
        let mut fields = s.trim().split('.');
        for part in parts.iter_mut() {
            let field = fields.next().ok_or(UpgradeError::InvalidParameter {
                reason: "firmware version needs four fields",
            })?;
            *part = field.parse().map_err(|_| UpgradeError::InvalidParameter {
                reason: "firmware version field is not a u8",
            })?;
        }
        if fields.next().is_some() {
            return Err(UpgradeError::InvalidParameter {
                reason: "firmware version has more than four fields",
            });
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

/// Metadata of the image being transferred, fixed when the transfer starts
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub file_size: u32,
    pub file_name: String<MAX_FILE_NAME_LEN>,
}

impl FileInfo {
    pub fn new(file_name: &str, file_size: u32) -> Result<Self, UpgradeError> {
        let mut name = String::new();
        name.push_str(file_name)
            .map_err(|_| UpgradeError::InvalidParameter {
                reason: "file name longer than 32 bytes",
            })?;
        Ok(Self {
            file_size,
            file_name: name,
        })
    }
}
