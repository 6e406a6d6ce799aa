// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
#[allow(unused_imports)]
use log::{debug, error, info, warn};
use upgrade::{EndState, FileInfo, PlatformError, PlatformResult, UpgradePlatform};

use crate::record;

/// Where the Linux platform keeps things
#[derive(Debug, Clone)]
pub struct LinuxPlatformConfig {
    /// Program store area, removed and recreated by each clean
    pub store_dir: PathBuf,
    /// File holding the reboot record
    pub state_file: PathBuf,
    /// Program replaced by the staged image before rebooting
    pub program_path: PathBuf,
    /// Command line run to reboot, split on whitespace
    pub reboot_command: String,
}

#[derive(Default)]
struct ProgramFile {
    file: Option<File>,
    /// Last image created in the store area, kept after close for the replacement
    staged: Option<PathBuf>,
}

/// [`UpgradePlatform`] for payloads running Linux
pub struct LinuxPlatform {
    config: LinuxPlatformConfig,
    program: Mutex<CriticalSectionRawMutex, ProgramFile>,
}

fn io_err(what: &str, path: &Path, e: io::Error, kind: PlatformError) -> PlatformError {
    error!("{} {}: {}", what, path.display(), e);
    kind
}

/// `path` with `suffix` appended to its file name
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn valid_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
}

impl LinuxPlatform {
    pub fn new(config: LinuxPlatformConfig) -> Self {
        Self {
            config,
            program: Mutex::new(ProgramFile::default()),
        }
    }

    pub fn config(&self) -> &LinuxPlatformConfig {
        &self.config
    }

    /// Path of the image currently staged, if any
    pub async fn staged_path(&self) -> Option<PathBuf> {
        self.program.lock().await.staged.clone()
    }
}

impl UpgradePlatform for LinuxPlatform {
    async fn reboot_system(&self) -> PlatformResult<()> {
        let mut words = self.config.reboot_command.split_whitespace();
        let Some(program) = words.next() else {
            error!("Empty reboot command");
            return Err(PlatformError::InvalidInput);
        };
        info!("Running reboot command: {}", self.config.reboot_command);
        let status = Command::new(program).args(words).status().map_err(|e| {
            error!("Could not run {}: {}", program, e);
            PlatformError::RebootFailed
        })?;
        if !status.success() {
            error!("Reboot command exited with {}", status);
            return Err(PlatformError::RebootFailed);
        }
        Ok(())
    }

    async fn clean_program_store_area(&self) -> PlatformResult<()> {
        let dir = &self.config.store_dir;
        let mut program = self.program.lock().await;
        program.file = None;
        program.staged = None;

        match fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err("Could not remove", dir, e, PlatformError::EraseError)),
        }
        fs::create_dir_all(dir)
            .map_err(|e| io_err("Could not create", dir, e, PlatformError::WriteError))?;
        debug!("Program store area {} cleaned", dir.display());
        Ok(())
    }

    async fn create_program_file(&self, file_info: &FileInfo) -> PlatformResult<()> {
        let name = file_info.file_name.as_str();
        if !valid_file_name(name) {
            error!("Refusing program file name {:?}", name);
            return Err(PlatformError::InvalidInput);
        }
        let dir = &self.config.store_dir;
        fs::create_dir_all(dir)
            .map_err(|e| io_err("Could not create", dir, e, PlatformError::WriteError))?;

        let path = dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| io_err("Could not open", &path, e, PlatformError::WriteError))?;
        file.set_len(u64::from(file_info.file_size))
            .map_err(|e| io_err("Could not size", &path, e, PlatformError::NoSpace))?;

        info!("Staging image in {}", path.display());
        let mut program = self.program.lock().await;
        program.file = Some(file);
        program.staged = Some(path);
        Ok(())
    }

    async fn write_program_file(&self, offset: u32, data: &[u8]) -> PlatformResult<()> {
        let mut program = self.program.lock().await;
        let Some(file) = program.file.as_mut() else {
            error!("Write with no program file open");
            return Err(PlatformError::InternalError);
        };
        file.seek(SeekFrom::Start(u64::from(offset)))
            .and_then(|_| file.write_all(data))
            .map_err(|e| {
                error!("Could not write {} bytes at {}: {}", data.len(), offset, e);
                PlatformError::WriteError
            })
    }

    async fn read_program_file(&self, offset: u32, data: &mut [u8]) -> PlatformResult<usize> {
        let mut program = self.program.lock().await;
        let Some(file) = program.file.as_mut() else {
            error!("Read with no program file open");
            return Err(PlatformError::InternalError);
        };
        file.seek(SeekFrom::Start(u64::from(offset))).map_err(|e| {
            error!("Could not seek to {}: {}", offset, e);
            PlatformError::ReadError
        })?;

        let mut total = 0;
        while total < data.len() {
            match file.read(&mut data[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!("Could not read at {}: {}", offset, e);
                    return Err(PlatformError::ReadError);
                }
            }
        }
        Ok(total)
    }

    async fn close_program_file(&self) -> PlatformResult<()> {
        let mut program = self.program.lock().await;
        if let Some(file) = program.file.take() {
            file.sync_all().map_err(|e| {
                error!("Could not sync the program file: {}", e);
                PlatformError::WriteError
            })?;
        }
        Ok(())
    }

    async fn replace_old_program(&self) -> PlatformResult<()> {
        let Some(staged) = self.staged_path().await else {
            error!("No staged image to install");
            return Err(PlatformError::InvalidInput);
        };
        let target = &self.config.program_path;
        let tmp = with_suffix(target, ".upgrade");

        fs::copy(&staged, &tmp)
            .map_err(|e| io_err("Could not copy to", &tmp, e, PlatformError::WriteError))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o755))
                .map_err(|e| io_err("Could not chmod", &tmp, e, PlatformError::WriteError))?;
        }
        fs::rename(&tmp, target)
            .map_err(|e| io_err("Could not rename onto", target, e, PlatformError::WriteError))?;

        info!("{} replaced with {}", target.display(), staged.display());
        Ok(())
    }

    async fn set_reboot_state(&self, end_state: EndState) -> PlatformResult<()> {
        let path = &self.config.state_file;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| io_err("Could not create", parent, e, PlatformError::WriteError))?;
        }
        let tmp = with_suffix(path, ".tmp");
        let mut file = File::create(&tmp)
            .map_err(|e| io_err("Could not create", &tmp, e, PlatformError::WriteError))?;
        file.write_all(&record::encode(end_state))
            .and_then(|_| file.sync_all())
            .map_err(|e| io_err("Could not write", &tmp, e, PlatformError::WriteError))?;
        fs::rename(&tmp, path)
            .map_err(|e| io_err("Could not rename onto", path, e, PlatformError::WriteError))?;
        debug!("Reboot state {:?} persisted", end_state);
        Ok(())
    }

    async fn get_reboot_state(&self) -> PlatformResult<Option<EndState>> {
        let path = &self.config.state_file;
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err("Could not read", path, e, PlatformError::ReadError)),
        };
        record::decode(&bytes).map(Some).map_err(|e| {
            error!("Corrupt reboot record in {}: {:?}", path.display(), e);
            PlatformError::ReadError
        })
    }

    async fn clean_reboot_state(&self) -> PlatformResult<()> {
        let path = &self.config.state_file;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err("Could not remove", path, e, PlatformError::EraseError)),
        }
    }
}
