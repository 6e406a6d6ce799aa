// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

#[allow(unused_imports)]
use log::{debug, error, info, warn};
use md5::{Digest, Md5};

use crate::error::{PlatformError, UpgradeError};
use crate::interface::FileTransferHandler;
use crate::platform::UpgradePlatform;
use crate::state::FileInfo;

/// Size of the chunks read back from the platform while verifying the image
pub const VERIFY_CHUNK_LEN: usize = 256;

/// # FileTransferReceiver for firmware images pushed by the core
///
/// Stores the incoming chunks through the platform at increasing offsets and, once the
/// declared size has been received, reads the stored image back to check it against the MD5
/// sent by the terminal.
///
/// The metadata and the transferred counter are reset at the start and at the end of every
/// transfer, whatever the outcome.
pub struct FileTransferReceiver<'a, P: UpgradePlatform> {
    platform: &'a P,
    file_info: FileInfo,
    transferred: u32,
}

impl<'a, P: UpgradePlatform> FileTransferReceiver<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self {
            platform,
            file_info: FileInfo::default(),
            transferred: 0,
        }
    }

    pub fn file_info(&self) -> &FileInfo {
        &self.file_info
    }

    pub fn transferred(&self) -> u32 {
        self.transferred
    }

    /// Percentage of the declared size received so far. 0 when no transfer is active.
    pub fn progress_percent(&self) -> u8 {
        if self.file_info.file_size == 0 {
            return 0;
        }
        let percent = u64::from(self.transferred) * 100 / u64::from(self.file_info.file_size);
        percent.min(100) as u8
    }

    fn reset(&mut self) {
        self.file_info = FileInfo::default();
        self.transferred = 0;
    }

    /// Streams the stored image back into an MD5 digest and compares it with `expected`
    async fn verify(&self, expected: &[u8; 16]) -> Result<(), UpgradeError> {
        let file_size = self.file_info.file_size;
        if self.transferred != file_size {
            error!(
                "Transfer incomplete: received {} of {} bytes",
                self.transferred, file_size
            );
            return Err(UpgradeError::InvalidParameter {
                reason: "transferred size does not match the declared size",
            });
        }

        let mut hasher = Md5::new();
        let mut buf = [0u8; VERIFY_CHUNK_LEN];
        let mut offset = 0u32;
        while offset < file_size {
            let want = VERIFY_CHUNK_LEN.min((file_size - offset) as usize);
            let read = self
                .platform
                .read_program_file(offset, &mut buf[..want])
                .await
                .map_err(|e| {
                    error!("Could not read back the image at offset {}: {:?}", offset, e);
                    UpgradeError::system("read back failed", e)
                })?;
            if read != want {
                error!(
                    "Short read at offset {}: wanted {} bytes, got {}",
                    offset, want, read
                );
                return Err(UpgradeError::system(
                    "short read while verifying",
                    PlatformError::ReadError,
                ));
            }
            hasher.update(&buf[..read]);
            offset += read as u32;
        }

        let digest = hasher.finalize();
        if digest.as_slice() != expected.as_slice() {
            error!(
                "MD5 mismatch. Expected: {:02x?}, computed: {:02x?}",
                expected,
                digest.as_slice()
            );
            return Err(UpgradeError::system(
                "md5 mismatch",
                PlatformError::InternalError,
            ));
        }
        info!("Image of {} bytes verified", file_size);
        Ok(())
    }
}

impl<P: UpgradePlatform> FileTransferHandler for FileTransferReceiver<'_, P> {
    async fn start(&mut self, file_info: &FileInfo) -> Result<(), UpgradeError> {
        self.reset();

        if file_info.file_size == 0 {
            error!("Refusing transfer of empty file {}", file_info.file_name);
            return Err(UpgradeError::InvalidParameter {
                reason: "file size is zero",
            });
        }

        self.platform
            .create_program_file(file_info)
            .await
            .map_err(|e| {
                error!(
                    "Could not create program file {}: {:?}",
                    file_info.file_name, e
                );
                UpgradeError::system("create program file failed", e)
            })?;

        info!(
            "Receiving {} ({} bytes)",
            file_info.file_name, file_info.file_size
        );
        self.file_info = file_info.clone();
        Ok(())
    }

    async fn transfer(&mut self, data: &[u8]) -> Result<(), UpgradeError> {
        let file_size = self.file_info.file_size;
        if self.transferred >= file_size {
            error!(
                "Transfer already complete: transferred = {}, file_size = {}",
                self.transferred, file_size
            );
            return Err(UpgradeError::InvalidParameter {
                reason: "transfer already complete",
            });
        }

        let remaining = u64::from(file_size - self.transferred);
        if data.len() as u64 > remaining {
            error!(
                "Chunk of {} bytes overruns the declared size, {} bytes left",
                data.len(),
                remaining
            );
            return Err(UpgradeError::InvalidParameter {
                reason: "chunk overruns the declared size",
            });
        }

        self.platform
            .write_program_file(self.transferred, data)
            .await
            .map_err(|e| {
                error!(
                    "Could not write {} bytes at offset {}: {:?}",
                    data.len(),
                    self.transferred,
                    e
                );
                UpgradeError::system("write program file failed", e)
            })?;

        self.transferred += data.len() as u32;
        debug!(
            "Received {}/{} bytes ({}%)",
            self.transferred,
            file_size,
            self.progress_percent()
        );
        Ok(())
    }

    async fn finish(&mut self, md5: &[u8; 16]) -> Result<(), UpgradeError> {
        // Empty starts are refused, so a zero size means no program file is open
        if self.file_info.file_size == 0 {
            error!("Finish without an active transfer");
            return Err(UpgradeError::InvalidParameter {
                reason: "no transfer in progress",
            });
        }

        let verified = self.verify(md5).await;
        let closed = self.platform.close_program_file().await;
        self.reset();

        verified?;
        closed.map_err(|e| {
            error!("Could not close the program file: {:?}", e);
            UpgradeError::system("close program file failed", e)
        })
    }
}
