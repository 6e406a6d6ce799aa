// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

use embassy_time::Duration;

use crate::state::FirmwareVersion;

/// Tunables of the upgrade state machine
#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    /// Announced to the core when the service starts
    pub firmware_version: FirmwareVersion,
    /// Returned to the core by `enter_upgrade_mode`, in seconds
    pub enter_mode_wait_time: u16,
    /// Pushed together with the DeviceReboot stage, in seconds
    pub reboot_timeout: u16,
    /// Tick of the worker and the enter mode poller
    pub task_period: Duration,
    /// Delay between two progress pushes
    pub step_period: Duration,
    pub progress_step: u8,
    /// Sleep between the DeviceReboot push and persisting the reboot record
    pub reboot_settle: Duration,
    pub end_push_period: Duration,
    /// Copy the staged image over the running program and clean the store area before rebooting.
    /// Targets where the bootloader swaps images leave this off.
    pub replace_program_before_reboot: bool,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            firmware_version: FirmwareVersion::new(1, 0, 0, 0),
            enter_mode_wait_time: 10,
            reboot_timeout: 30,
            task_period: Duration::from_millis(50),
            step_period: Duration::from_secs(1),
            progress_step: 10,
            reboot_settle: Duration::from_secs(1),
            end_push_period: Duration::from_secs(1),
            replace_program_before_reboot: true,
        }
    }
}

impl UpgradeConfig {
    /// Defaults for targets where the bootloader applies the staged image
    pub fn for_bootloader_swap() -> Self {
        Self {
            replace_program_before_reboot: false,
            ..Self::default()
        }
    }
}
