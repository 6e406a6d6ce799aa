// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Boundary with the SDK core.

use crate::error::UpgradeError;
use crate::state::{FileInfo, FirmwareVersion, UpgradeState};

/// Calls from this crate into the core
pub trait CoreLink {
    /// Registers the payload as capable of local upgrades
    fn enable_local_upgrade(&self, version: &FirmwareVersion) -> Result<(), UpgradeError>;

    /// Fire and forget. Called with the state lock held, so it must not block for long.
    fn push_upgrade_state(&self, state: &UpgradeState);
}

/// Upgrade callbacks invoked by the core at protocol driven moments
pub trait UpgradeHandler {
    /// Returns the time in seconds the terminal should wait before sending the image
    fn enter_upgrade_mode(&self) -> Result<u16, UpgradeError>;
    fn check_firmware(&self) -> Result<(), UpgradeError>;
    fn start_upgrade(&self) -> Result<(), UpgradeError>;
    fn finish_upgrade(&self) -> Result<(), UpgradeError>;
}

/// Chunked file transfer callbacks invoked by the core
pub trait FileTransferHandler {
    fn start(
        &mut self,
        file_info: &FileInfo,
    ) -> impl core::future::Future<Output = Result<(), UpgradeError>>;

    fn transfer(
        &mut self,
        data: &[u8],
    ) -> impl core::future::Future<Output = Result<(), UpgradeError>>;

    /// Verifies the whole image against `md5` and closes the transfer
    fn finish(
        &mut self,
        md5: &[u8; 16],
    ) -> impl core::future::Future<Output = Result<(), UpgradeError>>;
}
