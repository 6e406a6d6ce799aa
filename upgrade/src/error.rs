// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

use snafu::Snafu;

/// Failures reported by an [`crate::UpgradePlatform`] implementation.
///
/// Implementations log the root cause and map it onto one of these.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PlatformError {
    ReadError,
    WriteError,
    EraseError,
    /// The arguments can not be honoured by the platform (bad name, bad layout...)
    InvalidInput,
    /// The image does not fit in the program store area
    NoSpace,
    RebootFailed,
    InternalError,
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Errors returned to the core by the upgrade handlers
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum UpgradeError {
    #[snafu(display("invalid parameter: {reason}"))]
    InvalidParameter { reason: &'static str },

    #[snafu(display("system error: {reason} ({kind:?})"))]
    System {
        reason: &'static str,
        kind: PlatformError,
    },

    #[snafu(display("unknown error"))]
    Unknown,

    #[snafu(display("busy: {reason}"))]
    Busy { reason: &'static str },
}

impl UpgradeError {
    /// Shorthand used by the handlers when a platform call fails
    pub(crate) fn system(reason: &'static str, kind: PlatformError) -> Self {
        UpgradeError::System { reason, kind }
    }
}
