// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! In memory platform and core used by the unit tests.

use std::sync::Mutex;

use crate::error::{PlatformError, PlatformResult, UpgradeError};
use crate::interface::CoreLink;
use crate::platform::UpgradePlatform;
use crate::state::{EndState, FileInfo, FirmwareVersion, UpgradeState};

#[derive(Debug, Default)]
pub struct MockState {
    pub image: Vec<u8>,
    pub open: bool,
    pub reboot_record: Option<EndState>,

    pub fail_create: bool,
    pub fail_write: bool,
    pub fail_read: bool,
    pub short_read: bool,
    pub fail_close: bool,
    pub fail_clean_store: bool,
    pub fail_replace: bool,
    pub fail_set_state: bool,
    pub fail_get_state: bool,
    pub fail_reboot: bool,

    pub writes: u32,
    pub closes: u32,
    pub store_cleans: u32,
    pub replaces: u32,
    pub state_cleans: u32,
    pub reboots: u32,
}

#[derive(Debug, Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }
}

impl UpgradePlatform for MockPlatform {
    async fn reboot_system(&self) -> PlatformResult<()> {
        self.with(|s| {
            if s.fail_reboot {
                return Err(PlatformError::RebootFailed);
            }
            s.reboots += 1;
            Ok(())
        })
    }

    async fn clean_program_store_area(&self) -> PlatformResult<()> {
        self.with(|s| {
            if s.fail_clean_store {
                return Err(PlatformError::EraseError);
            }
            s.store_cleans += 1;
            s.image.clear();
            Ok(())
        })
    }

    async fn create_program_file(&self, file_info: &FileInfo) -> PlatformResult<()> {
        self.with(|s| {
            if s.fail_create {
                return Err(PlatformError::WriteError);
            }
            s.image = vec![0; file_info.file_size as usize];
            s.open = true;
            Ok(())
        })
    }

    async fn write_program_file(&self, offset: u32, data: &[u8]) -> PlatformResult<()> {
        self.with(|s| {
            if s.fail_write {
                return Err(PlatformError::WriteError);
            }
            let offset = offset as usize;
            if s.image.len() < offset + data.len() {
                s.image.resize(offset + data.len(), 0);
            }
            s.image[offset..offset + data.len()].copy_from_slice(data);
            s.writes += 1;
            Ok(())
        })
    }

    async fn read_program_file(&self, offset: u32, data: &mut [u8]) -> PlatformResult<usize> {
        self.with(|s| {
            if s.fail_read {
                return Err(PlatformError::ReadError);
            }
            let offset = (offset as usize).min(s.image.len());
            let mut n = data.len().min(s.image.len() - offset);
            if s.short_read && n > 1 {
                n -= 1;
            }
            data[..n].copy_from_slice(&s.image[offset..offset + n]);
            Ok(n)
        })
    }

    async fn close_program_file(&self) -> PlatformResult<()> {
        self.with(|s| {
            s.closes += 1;
            s.open = false;
            if s.fail_close {
                return Err(PlatformError::InternalError);
            }
            Ok(())
        })
    }

    async fn replace_old_program(&self) -> PlatformResult<()> {
        self.with(|s| {
            if s.fail_replace {
                return Err(PlatformError::WriteError);
            }
            s.replaces += 1;
            Ok(())
        })
    }

    async fn set_reboot_state(&self, end_state: EndState) -> PlatformResult<()> {
        self.with(|s| {
            if s.fail_set_state {
                return Err(PlatformError::WriteError);
            }
            s.reboot_record = Some(end_state);
            Ok(())
        })
    }

    async fn get_reboot_state(&self) -> PlatformResult<Option<EndState>> {
        self.with(|s| {
            if s.fail_get_state {
                return Err(PlatformError::ReadError);
            }
            Ok(s.reboot_record)
        })
    }

    async fn clean_reboot_state(&self) -> PlatformResult<()> {
        self.with(|s| {
            s.state_cleans += 1;
            s.reboot_record = None;
            Ok(())
        })
    }
}

/// Core double recording every pushed state
#[derive(Debug, Default)]
pub struct RecordingCore {
    pub pushes: Mutex<Vec<UpgradeState>>,
    pub enabled: Mutex<Option<FirmwareVersion>>,
    pub refuse_enable: bool,
}

impl RecordingCore {
    pub fn pushes(&self) -> Vec<UpgradeState> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn last_push(&self) -> Option<UpgradeState> {
        self.pushes.lock().unwrap().last().copied()
    }
}

impl CoreLink for RecordingCore {
    fn enable_local_upgrade(&self, version: &FirmwareVersion) -> Result<(), UpgradeError> {
        if self.refuse_enable {
            return Err(UpgradeError::Unknown);
        }
        *self.enabled.lock().unwrap() = Some(*version);
        Ok(())
    }

    fn push_upgrade_state(&self, state: &UpgradeState) {
        self.pushes.lock().unwrap().push(*state);
    }
}
