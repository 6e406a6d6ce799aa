// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;
use std::process::exit;

use embassy_executor::Spawner;
use embassy_time::Duration;
#[allow(unused_imports)]
use log::{debug, error, info, warn};
use static_cell::StaticCell;

use payload_upgrade::LinuxUpgradeService;
use payload_upgrade::config::{AppConfig, ConfigError};
use payload_upgrade::core_link::LogCore;
use payload_upgrade::settings::OUTCOME_TIMEOUT_SECS;
use payload_upgrade::terminal;
use storage::linux::LinuxPlatform;
use upgrade::{EndState, UpgradeService};

static SERVICE: StaticCell<LinuxUpgradeService> = StaticCell::new();

#[embassy_executor::task]
async fn upgrade_worker_task(service: &'static LinuxUpgradeService) {
    service.run_upgrade_worker().await
}

#[embassy_executor::task]
async fn enter_mode_task(service: &'static LinuxUpgradeService) {
    service.run_enter_mode_poller().await
}

/// Plays the terminal for one image. Returns the process exit code.
async fn push_session(
    service: &'static LinuxUpgradeService,
    firmware: &Path,
    chunk_size: usize,
) -> i32 {
    let image = match std::fs::read(firmware) {
        Ok(image) => image,
        Err(e) => {
            error!("Could not read {}: {}", firmware.display(), e);
            return 1;
        }
    };
    let name = firmware
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let timeout = Duration::from_secs(OUTCOME_TIMEOUT_SECS);
    terminal::run_session(service, &name, &image, chunk_size, timeout).await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match AppConfig::from_args(std::env::args_os()) {
        Ok(config) => config,
        Err(ConfigError::Cli { source }) => source.exit(),
        Err(e) => {
            error!("{}", e);
            exit(2);
        }
    };
    debug!("{:?}", config);

    let platform = LinuxPlatform::new(config.platform.clone());
    let started = UpgradeService::start(platform, LogCore::default(), config.upgrade.clone());
    let service = match started.await {
        Ok(service) => service,
        Err(e) => {
            error!("Could not start the upgrade service: {}", e);
            exit(1);
        }
    };
    let service: &'static LinuxUpgradeService = SERVICE.init(service);

    if let Err(e) = spawner.spawn(upgrade_worker_task(service)) {
        error!("Could not spawn the upgrade worker: {:?}", e);
        exit(1);
    }
    if let Err(e) = spawner.spawn(enter_mode_task(service)) {
        error!("Could not spawn the enter mode poller: {:?}", e);
        exit(1);
    }

    if let Some(firmware) = config.firmware.as_deref() {
        // Returns once the reboot record is persisted and the reboot requested, or the cycle ended
        let code = push_session(service, firmware, config.chunk_size).await;
        service.shutdown();
        exit(code);
    }

    info!("Waiting for upgrade outcomes");
    loop {
        if let Some(end_state) =
            terminal::acknowledge_end(service, Duration::from_secs(OUTCOME_TIMEOUT_SECS)).await
        {
            match end_state {
                EndState::Success => info!("Running the upgraded firmware"),
                EndState::UnknownError => warn!("Previous upgrade failed"),
            }
        }
    }
}
