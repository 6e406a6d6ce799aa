#![cfg_attr(not(any(test, feature = "std")), no_std)]
// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! [`upgrade::UpgradePlatform`] implementations.

/// Persisted reboot record shared by the platforms
pub mod record;

/// Platform over any NOR flash: staging partition plus a reboot state sector
pub mod flash;

/// Platform for payloads running Linux: files on disk and a reboot command
#[cfg(any(test, feature = "std"))]
pub mod linux;
