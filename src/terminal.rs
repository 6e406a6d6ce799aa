// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Simulated remote terminal, driving the payload the way the core does when an operator pushes
//! a firmware image.

use embassy_time::{Duration, Instant, Timer, with_timeout};
#[allow(unused_imports)]
use log::{debug, error, info, warn};
use md5::{Digest, Md5};
use upgrade::interface::{CoreLink, FileTransferHandler, UpgradeHandler};
use upgrade::{EndState, FileInfo, UpgradeError, UpgradePlatform, UpgradeService, UpgradeState};

/// Enter upgrade mode, send the image in chunks, verify it and start the upgrade cycle
pub async fn push_firmware<P, C>(
    service: &UpgradeService<P, C>,
    file_name: &str,
    image: &[u8],
    chunk_size: usize,
) -> Result<(), UpgradeError>
where
    P: UpgradePlatform,
    C: CoreLink,
{
    let file_size = u32::try_from(image.len()).map_err(|_| UpgradeError::InvalidParameter {
        reason: "image larger than 4 GiB",
    })?;
    let file_info = FileInfo::new(file_name, file_size)?;

    let wait_time = service.enter_upgrade_mode()?;
    let deadline = Instant::now() + Duration::from_secs(u64::from(wait_time));
    while service.is_enter_mode_pending() {
        if Instant::now() >= deadline {
            error!("Payload did not prepare within {}s", wait_time);
            return Err(UpgradeError::Busy {
                reason: "program store area not ready",
            });
        }
        Timer::after(service.config().task_period).await;
    }
    debug!("Payload ready for the transfer");

    let mut md5 = [0u8; 16];
    md5.copy_from_slice(&Md5::digest(image));

    let mut receiver = service.file_receiver();
    receiver.start(&file_info).await?;
    for chunk in image.chunks(chunk_size.max(1)) {
        receiver.transfer(chunk).await?;
    }
    receiver.finish(&md5).await?;
    info!("{} ({} bytes) transferred and verified", file_name, file_size);

    service.check_firmware()?;
    service.start_upgrade()
}

/// Waits until the worker is done with the cycle started by [`push_firmware`]. DeviceReboot once
/// the reboot record is persisted and the reboot requested, End when the cycle failed. None on
/// timeout.
pub async fn wait_for_outcome<P, C>(
    service: &UpgradeService<P, C>,
    timeout: Duration,
) -> Option<UpgradeState>
where
    P: UpgradePlatform,
    C: CoreLink,
{
    match with_timeout(timeout, service.wait_cycle_end()).await {
        Ok(rebooted) => {
            debug!("Upgrade cycle over, reboot requested: {}", rebooted);
            Some(service.state())
        }
        Err(_) => {
            warn!(
                "No upgrade outcome within {:?}, last state {:?}",
                timeout,
                service.state()
            );
            None
        }
    }
}

/// Pushes one image and waits for the outcome. Returns the process exit code.
///
/// When this returns 0 the reboot record is persisted and the reboot was requested, so the
/// caller may exit right away.
pub async fn run_session<P, C>(
    service: &UpgradeService<P, C>,
    file_name: &str,
    image: &[u8],
    chunk_size: usize,
    timeout: Duration,
) -> i32
where
    P: UpgradePlatform,
    C: CoreLink,
{
    if let Err(e) = push_firmware(service, file_name, image, chunk_size).await {
        error!("Firmware push failed: {}", e);
        return 1;
    }

    match wait_for_outcome(service, timeout).await {
        Some(UpgradeState::DeviceReboot { timeout }) => {
            info!("Payload rebooting, expected back within {}s", timeout);
            0
        }
        Some(UpgradeState::End { end_state }) => {
            error!("Upgrade ended with {:?}", end_state);
            acknowledge_end(service, timeout).await;
            1
        }
        _ => 1,
    }
}

/// Waits for the End state and acknowledges it, bringing the payload back to Idle
pub async fn acknowledge_end<P, C>(
    service: &UpgradeService<P, C>,
    timeout: Duration,
) -> Option<EndState>
where
    P: UpgradePlatform,
    C: CoreLink,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let UpgradeState::End { end_state } = service.state() {
            return match service.finish_upgrade() {
                Ok(()) => {
                    info!("Upgrade outcome {:?} acknowledged", end_state);
                    Some(end_state)
                }
                Err(e) => {
                    error!("Could not acknowledge the upgrade outcome: {}", e);
                    None
                }
            };
        }
        if Instant::now() >= deadline {
            return None;
        }
        Timer::after(service.config().task_period).await;
    }
}
