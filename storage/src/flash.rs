// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_storage::nor_flash::{NorFlash, NorFlashError};
#[allow(unused_imports)]
use log::{debug, error, info, warn};
use upgrade::{EndState, FileInfo, PlatformError, PlatformResult, UpgradePlatform};

use crate::record::{self, RECORD_LEN};

/// Largest erase sector supported by the read-modify-write buffer
pub const SECTOR_BUF_LEN: usize = 4096;

/// Where the staged image and the reboot record live in the flash
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FlashLayout {
    /// Start of the partition receiving the new image
    pub staging_offset: u32,
    pub staging_size: u32,
    /// Sector holding the reboot record
    pub state_offset: u32,
}

/// Flash and sector buffer stored together so a single lock covers both
struct FlashInner<F> {
    flash: F,
    sector: [u8; SECTOR_BUF_LEN],
    staged_len: u32,
    open: bool,
}

/// [`UpgradePlatform`] over a NOR flash
///
/// The image is written into the staging partition and applied by the bootloader, so
/// [`UpgradePlatform::replace_old_program`] does nothing here. Chunk offsets need not be aligned:
/// every write goes through a read-modify-write of the sectors it touches.
pub struct FlashPlatform<F> {
    inner: Mutex<CriticalSectionRawMutex, FlashInner<F>>,
    layout: FlashLayout,
    /// Board reset. Returning from it means the reset did not happen.
    reset: fn(),
}

fn flash_err<E: NorFlashError>(op: &str, offset: u32, e: E, kind: PlatformError) -> PlatformError {
    error!("Flash {} at 0x{:x} failed: {:?}", op, offset, e.kind());
    kind
}

impl<F: NorFlash> FlashPlatform<F> {
    /// Validates the layout against the flash geometry
    pub fn new(flash: F, layout: FlashLayout, reset: fn()) -> PlatformResult<Self> {
        let erase = F::ERASE_SIZE as u32;
        let capacity = flash.capacity() as u64;

        if F::ERASE_SIZE > SECTOR_BUF_LEN || F::ERASE_SIZE < RECORD_LEN {
            error!("Unsupported erase size {}", F::ERASE_SIZE);
            return Err(PlatformError::InvalidInput);
        }
        if layout.staging_offset % erase != 0
            || layout.staging_size % erase != 0
            || layout.state_offset % erase != 0
        {
            error!("Flash layout not aligned to the erase size {}: {:?}", erase, layout);
            return Err(PlatformError::InvalidInput);
        }
        let staging_end = u64::from(layout.staging_offset) + u64::from(layout.staging_size);
        let state_end = u64::from(layout.state_offset) + u64::from(erase);
        if layout.staging_size == 0 || staging_end > capacity || state_end > capacity {
            error!(
                "Flash layout {:?} does not fit a capacity of {} bytes",
                layout, capacity
            );
            return Err(PlatformError::InvalidInput);
        }
        let state = u64::from(layout.state_offset);
        if state < staging_end && state_end > u64::from(layout.staging_offset) {
            error!("Reboot state sector overlaps the staging partition");
            return Err(PlatformError::InvalidInput);
        }

        Ok(Self {
            inner: Mutex::new(FlashInner {
                flash,
                sector: [0u8; SECTOR_BUF_LEN],
                staged_len: 0,
                open: false,
            }),
            layout,
            reset,
        })
    }

    pub fn layout(&self) -> FlashLayout {
        self.layout
    }

    /// Hands the flash back, e.g. to share it with other users after the upgrade
    pub fn release(self) -> F {
        self.inner.into_inner().flash
    }

    async fn erase_staging(&self, len: u32) -> PlatformResult<()> {
        let erase = F::ERASE_SIZE as u32;
        let len = len.div_ceil(erase) * erase;
        let from = self.layout.staging_offset;
        let mut inner = self.inner.lock().await;
        inner
            .flash
            .erase(from, from + len)
            .map_err(|e| flash_err("erase", from, e, PlatformError::EraseError))
    }
}

impl<F: NorFlash + Send> UpgradePlatform for FlashPlatform<F> {
    async fn reboot_system(&self) -> PlatformResult<()> {
        info!("Resetting the board");
        (self.reset)();
        error!("Board reset returned");
        Err(PlatformError::RebootFailed)
    }

    async fn clean_program_store_area(&self) -> PlatformResult<()> {
        self.erase_staging(self.layout.staging_size).await?;
        let mut inner = self.inner.lock().await;
        inner.staged_len = 0;
        inner.open = false;
        debug!("Staging partition erased");
        Ok(())
    }

    async fn create_program_file(&self, file_info: &FileInfo) -> PlatformResult<()> {
        if file_info.file_size > self.layout.staging_size {
            error!(
                "Image of {} bytes does not fit the staging partition of {} bytes",
                file_info.file_size, self.layout.staging_size
            );
            return Err(PlatformError::NoSpace);
        }
        self.erase_staging(file_info.file_size).await?;
        let mut inner = self.inner.lock().await;
        inner.staged_len = file_info.file_size;
        inner.open = true;
        Ok(())
    }

    async fn write_program_file(&self, offset: u32, data: &[u8]) -> PlatformResult<()> {
        let erase = F::ERASE_SIZE as u32;
        let mut inner = self.inner.lock().await;
        if !inner.open {
            error!("Write with no program file open");
            return Err(PlatformError::InternalError);
        }
        if u64::from(offset) + data.len() as u64 > u64::from(inner.staged_len) {
            error!(
                "Write of {} bytes at {} beyond the image size {}",
                data.len(),
                offset,
                inner.staged_len
            );
            return Err(PlatformError::InvalidInput);
        }

        let FlashInner { flash, sector, .. } = &mut *inner;
        let buf = &mut sector[..F::ERASE_SIZE];
        let mut written = 0usize;
        while written < data.len() {
            let address = self.layout.staging_offset + offset + written as u32;
            let sector_start = address - address % erase;
            let in_sector = (address - sector_start) as usize;
            let n = (F::ERASE_SIZE - in_sector).min(data.len() - written);

            flash
                .read(sector_start, buf)
                .map_err(|e| flash_err("read", sector_start, e, PlatformError::ReadError))?;
            buf[in_sector..in_sector + n].copy_from_slice(&data[written..written + n]);
            flash
                .erase(sector_start, sector_start + erase)
                .map_err(|e| flash_err("erase", sector_start, e, PlatformError::EraseError))?;
            flash
                .write(sector_start, buf)
                .map_err(|e| flash_err("write", sector_start, e, PlatformError::WriteError))?;

            written += n;
        }
        Ok(())
    }

    async fn read_program_file(&self, offset: u32, data: &mut [u8]) -> PlatformResult<usize> {
        let erase = F::ERASE_SIZE as u32;
        let mut inner = self.inner.lock().await;
        let staged_len = inner.staged_len;
        if offset >= staged_len {
            return Ok(0);
        }
        let len = data.len().min((staged_len - offset) as usize);

        let FlashInner { flash, sector, .. } = &mut *inner;
        let buf = &mut sector[..F::ERASE_SIZE];
        let mut read = 0usize;
        while read < len {
            let address = self.layout.staging_offset + offset + read as u32;
            let sector_start = address - address % erase;
            let in_sector = (address - sector_start) as usize;
            let n = (F::ERASE_SIZE - in_sector).min(len - read);

            flash
                .read(sector_start, buf)
                .map_err(|e| flash_err("read", sector_start, e, PlatformError::ReadError))?;
            data[read..read + n].copy_from_slice(&buf[in_sector..in_sector + n]);
            read += n;
        }
        Ok(len)
    }

    async fn close_program_file(&self) -> PlatformResult<()> {
        self.inner.lock().await.open = false;
        Ok(())
    }

    async fn replace_old_program(&self) -> PlatformResult<()> {
        info!("Staged image is applied by the bootloader on reboot");
        Ok(())
    }

    async fn set_reboot_state(&self, end_state: EndState) -> PlatformResult<()> {
        let at = self.layout.state_offset;
        let mut inner = self.inner.lock().await;
        let FlashInner { flash, sector, .. } = &mut *inner;
        let buf = &mut sector[..F::ERASE_SIZE];

        buf.fill(0xff);
        buf[..RECORD_LEN].copy_from_slice(&record::encode(end_state));
        flash
            .erase(at, at + F::ERASE_SIZE as u32)
            .map_err(|e| flash_err("erase", at, e, PlatformError::EraseError))?;
        flash
            .write(at, buf)
            .map_err(|e| flash_err("write", at, e, PlatformError::WriteError))?;
        debug!("Reboot state {:?} persisted", end_state);
        Ok(())
    }

    async fn get_reboot_state(&self) -> PlatformResult<Option<EndState>> {
        let at = self.layout.state_offset;
        let mut inner = self.inner.lock().await;
        let FlashInner { flash, sector, .. } = &mut *inner;
        let buf = &mut sector[..F::ERASE_SIZE];

        flash
            .read(at, buf)
            .map_err(|e| flash_err("read", at, e, PlatformError::ReadError))?;
        let stored = &buf[..RECORD_LEN];
        if stored.iter().all(|b| *b == 0xff) {
            return Ok(None);
        }
        record::decode(stored).map(Some).map_err(|e| {
            error!("Corrupt reboot record: {:?}", e);
            PlatformError::ReadError
        })
    }

    async fn clean_reboot_state(&self) -> PlatformResult<()> {
        let at = self.layout.state_offset;
        let mut inner = self.inner.lock().await;
        inner
            .flash
            .erase(at, at + F::ERASE_SIZE as u32)
            .map_err(|e| flash_err("erase", at, e, PlatformError::EraseError))
    }
}
