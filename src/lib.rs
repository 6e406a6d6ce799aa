#![forbid(unsafe_code)]
// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod config;
pub mod core_link;
pub mod settings;
pub mod terminal;

use storage::linux::LinuxPlatform;
use upgrade::UpgradeService;

/// Service as wired by the Linux sample application
pub type LinuxUpgradeService = UpgradeService<LinuxPlatform, core_link::LogCore>;
