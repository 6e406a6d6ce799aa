// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::PlatformResult;
use crate::state::{EndState, FileInfo};

/// Any board hosting the payload upgrade requires an implementation of this trait.
///
/// It covers the storage of the incoming image, the reboot persistent record telling the next
/// boot how the upgrade ended, and the reboot itself. Every operation is mandatory.
pub trait UpgradePlatform {
    /// Restarts the device. On success it usually does not come back.
    fn reboot_system(&self) -> impl core::future::Future<Output = PlatformResult<()>> + Send;

    /// Erases whatever is stored in the program store area
    fn clean_program_store_area(
        &self,
    ) -> impl core::future::Future<Output = PlatformResult<()>> + Send;

    /// Creates, or truncates, the destination of the image described by `file_info`
    fn create_program_file(
        &self,
        file_info: &FileInfo,
    ) -> impl core::future::Future<Output = PlatformResult<()>> + Send;

    /// Writes data at the given offset of the image being received
    fn write_program_file(
        &self,
        offset: u32,
        data: &[u8],
    ) -> impl core::future::Future<Output = PlatformResult<()>> + Send;

    /// Reads back the stored image. Returns the number of bytes read.
    fn read_program_file(
        &self,
        offset: u32,
        data: &mut [u8],
    ) -> impl core::future::Future<Output = PlatformResult<usize>> + Send;

    fn close_program_file(&self) -> impl core::future::Future<Output = PlatformResult<()>> + Send;

    /// Puts the staged image in place of the running program
    fn replace_old_program(&self)
    -> impl core::future::Future<Output = PlatformResult<()>> + Send;

    /// Persists the outcome so it survives the coming reboot
    fn set_reboot_state(
        &self,
        end_state: EndState,
    ) -> impl core::future::Future<Output = PlatformResult<()>> + Send;

    /// `None` when this boot does not follow an upgrade reboot
    fn get_reboot_state(
        &self,
    ) -> impl core::future::Future<Output = PlatformResult<Option<EndState>>> + Send;

    fn clean_reboot_state(&self) -> impl core::future::Future<Output = PlatformResult<()>> + Send;
}
