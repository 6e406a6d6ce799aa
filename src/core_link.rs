// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::sync::atomic::{AtomicU32, Ordering};

#[allow(unused_imports)]
use log::{debug, error, info, warn};
use upgrade::interface::CoreLink;
use upgrade::{FirmwareVersion, UpgradeError, UpgradeState};

/// Stand-in for the SDK core: logs the registration and every pushed state
#[derive(Debug, Default)]
pub struct LogCore {
    pushes: AtomicU32,
}

impl LogCore {
    /// Number of states pushed so far
    pub fn pushes(&self) -> u32 {
        self.pushes.load(Ordering::Relaxed)
    }
}

impl CoreLink for LogCore {
    fn enable_local_upgrade(&self, version: &FirmwareVersion) -> Result<(), UpgradeError> {
        info!("Payload registered for local upgrade, firmware {}", version);
        Ok(())
    }

    fn push_upgrade_state(&self, state: &UpgradeState) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
        match state {
            UpgradeState::Idle => info!("Upgrade state: idle"),
            UpgradeState::Ongoing { progress } => info!("Upgrade state: ongoing {}%", progress),
            UpgradeState::DeviceReboot { timeout } => {
                info!("Upgrade state: rebooting, back within {}s", timeout)
            }
            UpgradeState::End { end_state } => info!("Upgrade state: end {:?}", end_state),
        }
    }
}
