#![cfg_attr(not(any(test, feature = "std")), no_std)]
// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Payload side of the firmware upgrade exchange.
//!
//! The external SDK core calls into [`interface::UpgradeHandler`] and
//! [`interface::FileTransferHandler`] while this crate pushes state changes back
//! through [`interface::CoreLink`]. Everything that touches storage or reboots the
//! device goes through [`platform::UpgradePlatform`].

pub mod config;
pub mod error;
pub mod interface;
pub mod platform;
pub mod service;
pub mod shim;
pub mod state;
pub mod transfer;

#[cfg(test)]
pub(crate) mod mock;

pub use config::UpgradeConfig;
pub use error::{PlatformError, PlatformResult, UpgradeError};
pub use platform::UpgradePlatform;
pub use service::UpgradeService;
pub use state::{EndState, FileInfo, FirmwareVersion, UpgradeStage, UpgradeState};
