// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Callback table for applications that provide the platform as plain functions
//! instead of implementing [`UpgradePlatform`] on a type.

#[allow(unused_imports)]
use log::{debug, error, info, warn};

use crate::error::{PlatformResult, UpgradeError};
use crate::platform::UpgradePlatform;
use crate::state::{EndState, FileInfo};

pub type RebootFn = fn() -> PlatformResult<()>;
pub type CleanStoreFn = fn() -> PlatformResult<()>;
pub type CreateFileFn = fn(&FileInfo) -> PlatformResult<()>;
pub type WriteFileFn = fn(u32, &[u8]) -> PlatformResult<()>;
pub type ReadFileFn = fn(u32, &mut [u8]) -> PlatformResult<usize>;
pub type CloseFileFn = fn() -> PlatformResult<()>;
pub type ReplaceProgramFn = fn() -> PlatformResult<()>;
pub type SetRebootStateFn = fn(EndState) -> PlatformResult<()>;
pub type GetRebootStateFn = fn() -> PlatformResult<Option<EndState>>;
pub type CleanRebootStateFn = fn() -> PlatformResult<()>;

/// Platform operations as registered by the embedding application. All of them are required.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformOpt {
    pub reboot: Option<RebootFn>,
    pub clean_program_store_area: Option<CleanStoreFn>,
    pub create_program_file: Option<CreateFileFn>,
    pub write_program_file: Option<WriteFileFn>,
    pub read_program_file: Option<ReadFileFn>,
    pub close_program_file: Option<CloseFileFn>,
    pub replace_old_program: Option<ReplaceProgramFn>,
    pub set_reboot_state: Option<SetRebootStateFn>,
    pub get_reboot_state: Option<GetRebootStateFn>,
    pub clean_reboot_state: Option<CleanRebootStateFn>,
}

fn require<T>(slot: Option<T>, reason: &'static str) -> Result<T, UpgradeError> {
    slot.ok_or_else(|| {
        error!("PlatformOpt registration failed: {}", reason);
        UpgradeError::InvalidParameter { reason }
    })
}

impl PlatformOpt {
    /// Validates that every slot is present
    ///
    /// The error names the first missing slot, in declaration order.
    pub fn register(self) -> Result<RegisteredPlatformOpt, UpgradeError> {
        let registered = RegisteredPlatformOpt {
            reboot: require(self.reboot, "reboot callback is missing")?,
            clean_program_store_area: require(
                self.clean_program_store_area,
                "clean_program_store_area callback is missing",
            )?,
            create_program_file: require(
                self.create_program_file,
                "create_program_file callback is missing",
            )?,
            write_program_file: require(
                self.write_program_file,
                "write_program_file callback is missing",
            )?,
            read_program_file: require(
                self.read_program_file,
                "read_program_file callback is missing",
            )?,
            close_program_file: require(
                self.close_program_file,
                "close_program_file callback is missing",
            )?,
            replace_old_program: require(
                self.replace_old_program,
                "replace_old_program callback is missing",
            )?,
            set_reboot_state: require(
                self.set_reboot_state,
                "set_reboot_state callback is missing",
            )?,
            get_reboot_state: require(
                self.get_reboot_state,
                "get_reboot_state callback is missing",
            )?,
            clean_reboot_state: require(
                self.clean_reboot_state,
                "clean_reboot_state callback is missing",
            )?,
        };
        debug!("PlatformOpt registered");
        Ok(registered)
    }
}

/// A validated [`PlatformOpt`], forwarding each [`UpgradePlatform`] call to its slot
#[derive(Debug, Clone, Copy)]
pub struct RegisteredPlatformOpt {
    reboot: RebootFn,
    clean_program_store_area: CleanStoreFn,
    create_program_file: CreateFileFn,
    write_program_file: WriteFileFn,
    read_program_file: ReadFileFn,
    close_program_file: CloseFileFn,
    replace_old_program: ReplaceProgramFn,
    set_reboot_state: SetRebootStateFn,
    get_reboot_state: GetRebootStateFn,
    clean_reboot_state: CleanRebootStateFn,
}

impl UpgradePlatform for RegisteredPlatformOpt {
    async fn reboot_system(&self) -> PlatformResult<()> {
        (self.reboot)()
    }

    async fn clean_program_store_area(&self) -> PlatformResult<()> {
        (self.clean_program_store_area)()
    }

    async fn create_program_file(&self, file_info: &FileInfo) -> PlatformResult<()> {
        (self.create_program_file)(file_info)
    }

    async fn write_program_file(&self, offset: u32, data: &[u8]) -> PlatformResult<()> {
        (self.write_program_file)(offset, data)
    }

    async fn read_program_file(&self, offset: u32, data: &mut [u8]) -> PlatformResult<usize> {
        (self.read_program_file)(offset, data)
    }

    async fn close_program_file(&self) -> PlatformResult<()> {
        (self.close_program_file)()
    }

    async fn replace_old_program(&self) -> PlatformResult<()> {
        (self.replace_old_program)()
    }

    async fn set_reboot_state(&self, end_state: EndState) -> PlatformResult<()> {
        (self.set_reboot_state)(end_state)
    }

    async fn get_reboot_state(&self) -> PlatformResult<Option<EndState>> {
        (self.get_reboot_state)()
    }

    async fn clean_reboot_state(&self) -> PlatformResult<()> {
        (self.clean_reboot_state)()
    }
}
