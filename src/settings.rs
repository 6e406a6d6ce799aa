// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

// Static settings

// Linux platform defaults
pub const DEFAULT_STORE_DIR: &str = "/upgrade";
pub const DEFAULT_STATE_FILE: &str = "/upgrade_backup/reboot_state";
pub const DEFAULT_REBOOT_COMMAND: &str = "reboot -h now";

// Simulated terminal
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;
/// Time given to the payload to report the outcome of a cycle, in seconds
pub const OUTCOME_TIMEOUT_SECS: u64 = 120;
