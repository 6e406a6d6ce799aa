// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, ArgMatches, Command};
use snafu::{OptionExt, ResultExt, Snafu};
use storage::linux::LinuxPlatformConfig;
use upgrade::{FirmwareVersion, UpgradeConfig};

use crate::settings::{
    DEFAULT_CHUNK_SIZE, DEFAULT_REBOOT_COMMAND, DEFAULT_STATE_FILE, DEFAULT_STORE_DIR,
    MAX_CHUNK_SIZE,
};

#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// Bad usage, `--help` and `--version` included
    #[snafu(display("{source}"))]
    Cli { source: clap::Error },

    #[snafu(display("invalid firmware version {value:?}"))]
    Version { value: String },

    #[snafu(display("chunk size must be between 1 and {max} bytes"))]
    ChunkSize { max: usize },

    #[snafu(display("could not locate the running program: {source}"))]
    CurrentExe { source: std::io::Error },
}

/// Everything the sample application needs, built from the command line
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub platform: LinuxPlatformConfig,
    pub upgrade: UpgradeConfig,
    /// Image to push through the simulated terminal. None runs the payload only.
    pub firmware: Option<PathBuf>,
    pub chunk_size: usize,
}

impl AppConfig {
    pub fn command() -> Command {
        Command::new("payload-upgrade")
            .about("Payload firmware upgrade service, with a simulated terminal to push an image.")
            .arg(clap::arg!(--"store-dir" <DIR> "Program store area").required(false))
            .arg(clap::arg!(--"state-file" <FILE> "Reboot state record").required(false))
            .arg(
                clap::arg!(--program <FILE> "Program to replace (default: this executable)")
                    .required(false),
            )
            .arg(clap::arg!(--"reboot-cmd" <CMD> "Command run to reboot").required(false))
            .arg(
                clap::arg!(--"no-replace" "Bootloader applies the image, keep the program")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                clap::arg!(--"firmware-version" <VERSION> "Announced version, a.b.c.d")
                    .required(false),
            )
            .arg(
                clap::arg!(--firmware <FILE> "Image to push through the simulated terminal")
                    .required(false),
            )
            .arg(
                clap::arg!(--"chunk-size" <BYTES> "Transfer chunk size")
                    .required(false)
                    .value_parser(clap::value_parser!(usize)),
            )
    }

    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command().try_get_matches_from(args).context(CliSnafu)?;
        Self::from_matches(&matches)
    }

    fn from_matches(matches: &ArgMatches) -> Result<Self, ConfigError> {
        let path_or = |id: &str, default: &str| {
            matches
                .get_one::<String>(id)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(default))
        };

        let program_path = match matches.get_one::<String>("program") {
            Some(p) => PathBuf::from(p),
            None => std::env::current_exe().context(CurrentExeSnafu)?,
        };

        let mut upgrade = UpgradeConfig::default();
        if let Some(value) = matches.get_one::<String>("firmware-version") {
            upgrade.firmware_version = value
                .parse::<FirmwareVersion>()
                .ok()
                .context(VersionSnafu { value })?;
        }
        upgrade.replace_program_before_reboot = !matches.get_flag("no-replace");

        let chunk_size = matches
            .get_one::<usize>("chunk-size")
            .copied()
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return ChunkSizeSnafu {
                max: MAX_CHUNK_SIZE,
            }
            .fail();
        }

        Ok(Self {
            platform: LinuxPlatformConfig {
                store_dir: path_or("store-dir", DEFAULT_STORE_DIR),
                state_file: path_or("state-file", DEFAULT_STATE_FILE),
                program_path,
                reboot_command: matches
                    .get_one::<String>("reboot-cmd")
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_REBOOT_COMMAND.to_string()),
            },
            upgrade,
            firmware: matches.get_one::<String>("firmware").map(PathBuf::from),
            chunk_size,
        })
    }
}
