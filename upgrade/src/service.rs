// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Instant, Timer};
#[allow(unused_imports)]
use log::{debug, error, info, warn};
use portable_atomic::{AtomicBool, Ordering};

use crate::config::UpgradeConfig;
use crate::error::UpgradeError;
use crate::interface::{CoreLink, UpgradeHandler};
use crate::platform::UpgradePlatform;
use crate::state::{EndState, UpgradeState};
use crate::transfer::FileTransferReceiver;

/// Progress reported once the running program has been replaced
const PROGRESS_REPLACED: u8 = 20;
/// Progress reported once the program store area has been cleaned
const PROGRESS_CLEANED: u8 = 30;

/// # UpgradeService driving the upgrade state machine
///
/// Owns the platform and the link to the core, holds the shared [`UpgradeState`] and runs the
/// background loops:
///
/// * [`UpgradeService::run_upgrade_worker`] walks an Ongoing cycle up to the reboot and keeps
///   pushing the End state until the terminal acknowledges it.
/// * [`UpgradeService::run_enter_mode_poller`] cleans the program store area when the core asks
///   the payload to enter upgrade mode.
///
/// The state lives in a blocking mutex. It is only touched inside `lock` closures, so it is never
/// held across an await. Every transition is pushed to the core while the lock is held.
pub struct UpgradeService<P, C> {
    platform: P,
    core: C,
    config: UpgradeConfig,
    state: Mutex<CriticalSectionRawMutex, Cell<UpgradeState>>,
    enter_mode_pending: AtomicBool,
    stop: Signal<CriticalSectionRawMutex, ()>,
    /// Raised by the worker when an Ongoing cycle is over, true when the reboot was requested
    cycle_done: Signal<CriticalSectionRawMutex, bool>,
}

impl<P: UpgradePlatform, C: CoreLink> UpgradeService<P, C> {
    /// Registers with the core and restores the outcome of a previous upgrade, if any.
    ///
    /// A reboot record found here means this boot follows an upgrade reboot and the service starts
    /// in End with the persisted outcome. The record is cleared right after reading it, so it is
    /// reported at most once.
    pub async fn start(platform: P, core: C, config: UpgradeConfig) -> Result<Self, UpgradeError> {
        core.enable_local_upgrade(&config.firmware_version)
            .map_err(|e| {
                error!("Core refused the local upgrade registration: {}", e);
                e
            })?;
        info!(
            "Local upgrade enabled, firmware version {}",
            config.firmware_version
        );

        let initial = match platform.get_reboot_state().await {
            Ok(Some(end_state)) => {
                info!("Booted after an upgrade reboot, outcome {:?}", end_state);
                UpgradeState::End { end_state }
            }
            Ok(None) => UpgradeState::Idle,
            Err(e) => {
                error!("Could not read the reboot state, assuming none: {:?}", e);
                UpgradeState::Idle
            }
        };

        if let Err(e) = platform.clean_reboot_state().await {
            warn!("Could not clean the reboot state: {:?}", e);
        }

        Ok(Self {
            platform,
            core,
            config,
            state: Mutex::new(Cell::new(initial)),
            enter_mode_pending: AtomicBool::new(false),
            stop: Signal::new(),
            cycle_done: Signal::new(),
        })
    }

    pub fn state(&self) -> UpgradeState {
        self.state.lock(|state| state.get())
    }

    pub fn config(&self) -> &UpgradeConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn core(&self) -> &C {
        &self.core
    }

    pub fn into_platform(self) -> P {
        self.platform
    }

    /// Receiver for the image chunks sent by the core, storing through this service's platform
    pub fn file_receiver(&self) -> FileTransferReceiver<'_, P> {
        FileTransferReceiver::new(&self.platform)
    }

    /// True until the enter mode poller has cleaned the program store area
    pub fn is_enter_mode_pending(&self) -> bool {
        self.enter_mode_pending.load(Ordering::Acquire)
    }

    /// Asks the worker and the poller to return. They notice it on their next tick.
    pub fn shutdown(&self) {
        info!("Upgrade service shutting down");
        self.stop.signal(());
    }

    /// Waits until the worker is done with the current Ongoing cycle. True when the reboot record
    /// was persisted and the reboot requested, false when the cycle ended in End.
    pub async fn wait_cycle_end(&self) -> bool {
        self.cycle_done.wait().await
    }

    fn stopping(&self) -> bool {
        self.stop.signaled()
    }

    fn transition(&self, next: UpgradeState) {
        self.state.lock(|state| {
            state.set(next);
            self.core.push_upgrade_state(&next);
        });
    }

    fn push_current(&self) {
        self.state.lock(|state| self.core.push_upgrade_state(&state.get()));
    }

    fn fail_cycle(&self) {
        error!("Upgrade cycle failed");
        self.transition(UpgradeState::End {
            end_state: EndState::UnknownError,
        });
    }

    /// Drives an Ongoing cycle until the reboot. Returns true when the reboot was requested.
    async fn run_cycle(&self, mut progress: u8) -> bool {
        let step_period = self.config.step_period;

        if self.config.replace_program_before_reboot {
            if let Err(e) = self.platform.replace_old_program().await {
                error!("Could not replace the running program: {:?}", e);
                self.fail_cycle();
                return false;
            }
            Timer::after(step_period).await;
            progress = PROGRESS_REPLACED;
            self.transition(UpgradeState::Ongoing { progress });

            if let Err(e) = self.platform.clean_program_store_area().await {
                error!("Could not clean the program store area: {:?}", e);
                self.fail_cycle();
                return false;
            }
            Timer::after(step_period).await;
            progress = PROGRESS_CLEANED;
            self.transition(UpgradeState::Ongoing { progress });
        }

        let step = self.config.progress_step.max(1);
        while progress < 100 {
            progress = progress.saturating_add(step).min(100);
            Timer::after(step_period).await;
            self.transition(UpgradeState::Ongoing { progress });
        }

        self.transition(UpgradeState::DeviceReboot {
            timeout: self.config.reboot_timeout,
        });
        Timer::after(self.config.reboot_settle).await;

        if let Err(e) = self.platform.set_reboot_state(EndState::Success).await {
            error!("Could not persist the reboot state: {:?}", e);
            self.fail_cycle();
            return false;
        }

        info!("Rebooting into the new firmware");
        if let Err(e) = self.platform.reboot_system().await {
            error!("Reboot failed: {:?}", e);
            if let Err(e) = self.platform.clean_reboot_state().await {
                warn!("Could not clear the reboot state after a failed reboot: {:?}", e);
            }
            self.fail_cycle();
            return false;
        }
        true
    }

    /// Background loop of the state machine, ticking every `task_period`
    pub async fn run_upgrade_worker(&self) {
        info!("Upgrade worker started");
        let mut parked = false;
        let mut next_end_push = Instant::now();

        while !self.stopping() {
            if !parked {
                match self.state() {
                    UpgradeState::Ongoing { progress } => {
                        info!("Upgrade cycle started at {}%", progress);
                        parked = self.run_cycle(progress).await;
                        if parked {
                            info!("Reboot requested, worker parked");
                        }
                        self.cycle_done.signal(parked);
                        next_end_push = Instant::now();
                    }
                    UpgradeState::End { .. } => {
                        let now = Instant::now();
                        if now >= next_end_push {
                            self.push_current();
                            next_end_push = now + self.config.end_push_period;
                        }
                    }
                    UpgradeState::Idle | UpgradeState::DeviceReboot { .. } => {}
                }
            }
            Timer::after(self.config.task_period).await;
        }
        info!("Upgrade worker stopped");
    }

    /// Background loop cleaning the program store area once per enter upgrade mode request
    pub async fn run_enter_mode_poller(&self) {
        debug!("Enter mode poller started");
        while !self.stopping() {
            if self.enter_mode_pending.load(Ordering::Acquire) {
                match self.platform.clean_program_store_area().await {
                    Ok(()) => info!("Program store area cleaned"),
                    Err(e) => error!("Could not clean the program store area: {:?}", e),
                }
                self.enter_mode_pending.store(false, Ordering::Release);
            }
            Timer::after(self.config.task_period).await;
        }
        debug!("Enter mode poller stopped");
    }
}

impl<P: UpgradePlatform, C: CoreLink> UpgradeHandler for UpgradeService<P, C> {
    fn enter_upgrade_mode(&self) -> Result<u16, UpgradeError> {
        // A concurrent start_upgrade must not slip in between the check and the request
        self.state.lock(|state| {
            if state.get().is_busy() {
                warn!("Enter upgrade mode refused, an upgrade is in progress");
                return Err(UpgradeError::Busy {
                    reason: "upgrade in progress",
                });
            }
            self.enter_mode_pending.store(true, Ordering::Release);
            Ok(())
        })?;
        info!(
            "Entering upgrade mode, wait time {}s",
            self.config.enter_mode_wait_time
        );
        Ok(self.config.enter_mode_wait_time)
    }

    fn check_firmware(&self) -> Result<(), UpgradeError> {
        debug!("Firmware check requested, nothing to verify");
        Ok(())
    }

    fn start_upgrade(&self) -> Result<(), UpgradeError> {
        self.state.lock(|state| {
            if state.get().is_busy() {
                warn!("Start upgrade refused, state {:?}", state.get());
                return Err(UpgradeError::Busy {
                    reason: "upgrade already in progress",
                });
            }
            let next = UpgradeState::Ongoing { progress: 0 };
            self.cycle_done.reset();
            state.set(next);
            self.core.push_upgrade_state(&next);
            info!("Upgrade started");
            Ok(())
        })
    }

    fn finish_upgrade(&self) -> Result<(), UpgradeError> {
        self.state.lock(|state| match state.get() {
            UpgradeState::End { end_state } => {
                info!("Upgrade finished with {:?}, back to idle", end_state);
                state.set(UpgradeState::Idle);
                self.core.push_upgrade_state(&UpgradeState::Idle);
                Ok(())
            }
            UpgradeState::Idle => Ok(()),
            busy => {
                warn!("Finish upgrade refused, state {:?}", busy);
                Err(UpgradeError::Busy {
                    reason: "upgrade in progress",
                })
            }
        })
    }
}

#[cfg(test)]
mod service_tests {
    use super::*;
    use crate::mock::{MockPlatform, RecordingCore};
    use crate::state::FirmwareVersion;
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_time::Duration;

    fn fast_config() -> UpgradeConfig {
        UpgradeConfig {
            firmware_version: FirmwareVersion::new(2, 1, 0, 7),
            task_period: Duration::from_millis(1),
            step_period: Duration::from_millis(1),
            reboot_settle: Duration::from_millis(1),
            end_push_period: Duration::from_millis(5),
            ..UpgradeConfig::default()
        }
    }

    fn service_with(
        platform: MockPlatform,
        config: UpgradeConfig,
    ) -> UpgradeService<MockPlatform, RecordingCore> {
        block_on(UpgradeService::start(
            platform,
            RecordingCore::default(),
            config,
        ))
        .unwrap()
    }

    /// Runs the worker until `done` holds, then stops it
    fn run_worker_until(
        service: &UpgradeService<MockPlatform, RecordingCore>,
        done: impl Fn(&UpgradeService<MockPlatform, RecordingCore>) -> bool,
    ) {
        block_on(join(service.run_upgrade_worker(), async {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !done(service) && Instant::now() < deadline {
                Timer::after_millis(1).await;
            }
            service.shutdown();
        }));
    }

    fn ongoing(progress: u8) -> UpgradeState {
        UpgradeState::Ongoing { progress }
    }

    #[test]
    fn fresh_boot_starts_idle() {
        let service = service_with(MockPlatform::default(), fast_config());

        assert_eq!(service.state(), UpgradeState::Idle);
        assert_eq!(
            *service.core().enabled.lock().unwrap(),
            Some(FirmwareVersion::new(2, 1, 0, 7))
        );
        assert_eq!(service.platform().with(|s| s.state_cleans), 1);
    }

    #[test]
    fn reboot_record_is_restored_once() {
        let platform = MockPlatform::default();
        platform.with(|s| s.reboot_record = Some(EndState::Success));

        let service = service_with(platform, fast_config());
        assert_eq!(
            service.state(),
            UpgradeState::End {
                end_state: EndState::Success
            }
        );

        // Next boot without an upgrade in between
        let platform = service.into_platform();
        assert_eq!(platform.with(|s| s.reboot_record), None);
        let service = service_with(platform, fast_config());
        assert_eq!(service.state(), UpgradeState::Idle);
    }

    #[test]
    fn unreadable_reboot_record_means_idle() {
        let platform = MockPlatform::default();
        platform.with(|s| {
            s.reboot_record = Some(EndState::UnknownError);
            s.fail_get_state = true;
        });

        let service = service_with(platform, fast_config());
        assert_eq!(service.state(), UpgradeState::Idle);
        assert_eq!(service.platform().with(|s| s.state_cleans), 1);
    }

    #[test]
    fn refused_registration_aborts_start() {
        let platform = MockPlatform::default();
        platform.with(|s| s.reboot_record = Some(EndState::Success));
        let core = RecordingCore {
            refuse_enable: true,
            ..RecordingCore::default()
        };

        let res = block_on(UpgradeService::start(platform, core, fast_config()));
        assert!(res.is_err());
    }

    #[test]
    fn enter_mode_cleans_store_once() {
        let service = service_with(MockPlatform::default(), fast_config());

        assert_eq!(service.enter_upgrade_mode().unwrap(), 10);
        assert!(service.is_enter_mode_pending());

        block_on(join(service.run_enter_mode_poller(), async {
            while service.is_enter_mode_pending() {
                Timer::after_millis(1).await;
            }
            // A few more ticks must not clean again
            Timer::after_millis(10).await;
            service.shutdown();
        }));

        assert_eq!(service.platform().with(|s| s.store_cleans), 1);
        assert_eq!(service.state(), UpgradeState::Idle);
    }

    #[test]
    fn full_cycle_with_program_replacement() {
        let service = service_with(MockPlatform::default(), fast_config());

        service.check_firmware().unwrap();
        service.start_upgrade().unwrap();
        run_worker_until(&service, |s| s.platform().with(|p| p.reboots) == 1);

        let mut expected = vec![ongoing(0), ongoing(20), ongoing(30)];
        expected.extend((4..=10).map(|i| ongoing(i * 10)));
        expected.push(UpgradeState::DeviceReboot { timeout: 30 });
        assert_eq!(service.core().pushes(), expected);

        service.platform().with(|p| {
            assert_eq!(p.replaces, 1);
            assert_eq!(p.store_cleans, 1);
            assert_eq!(p.reboots, 1);
            assert_eq!(p.reboot_record, Some(EndState::Success));
        });
        assert_eq!(service.state(), UpgradeState::DeviceReboot { timeout: 30 });
    }

    #[test]
    fn full_cycle_without_program_replacement() {
        let config = UpgradeConfig {
            replace_program_before_reboot: false,
            ..fast_config()
        };
        let service = service_with(MockPlatform::default(), config);

        service.start_upgrade().unwrap();
        run_worker_until(&service, |s| s.platform().with(|p| p.reboots) == 1);

        let mut expected: Vec<_> = (0..=10).map(|i| ongoing(i * 10)).collect();
        expected.push(UpgradeState::DeviceReboot { timeout: 30 });
        assert_eq!(service.core().pushes(), expected);
        assert_eq!(service.platform().with(|p| p.replaces), 0);
    }

    #[test]
    fn uneven_step_still_reaches_100() {
        let config = UpgradeConfig {
            replace_program_before_reboot: false,
            progress_step: 30,
            ..fast_config()
        };
        let service = service_with(MockPlatform::default(), config);

        service.start_upgrade().unwrap();
        run_worker_until(&service, |s| s.platform().with(|p| p.reboots) == 1);

        let pushes = service.core().pushes();
        assert_eq!(
            pushes,
            vec![
                ongoing(0),
                ongoing(30),
                ongoing(60),
                ongoing(90),
                ongoing(100),
                UpgradeState::DeviceReboot { timeout: 30 },
            ]
        );
    }

    #[test]
    fn replace_failure_ends_cycle_with_error() {
        let platform = MockPlatform::default();
        platform.with(|s| s.fail_replace = true);
        let service = service_with(platform, fast_config());

        service.start_upgrade().unwrap();
        run_worker_until(&service, |s| s.state().stage() == crate::UpgradeStage::End);

        assert_eq!(
            service.state(),
            UpgradeState::End {
                end_state: EndState::UnknownError
            }
        );
        service.platform().with(|p| {
            assert_eq!(p.reboots, 0);
            assert_eq!(p.reboot_record, None);
        });
    }

    #[test]
    fn clean_failure_ends_cycle_with_error() {
        let platform = MockPlatform::default();
        platform.with(|s| s.fail_clean_store = true);
        let service = service_with(platform, fast_config());

        service.start_upgrade().unwrap();
        run_worker_until(&service, |s| s.state().stage() == crate::UpgradeStage::End);

        let end = UpgradeState::End {
            end_state: EndState::UnknownError,
        };
        // The worker may re-push End before it sees the shutdown
        let pushes = service.core().pushes();
        assert_eq!(pushes[..3], [ongoing(0), ongoing(20), end]);
        assert!(pushes[3..].iter().all(|p| *p == end));
        service.platform().with(|p| {
            assert_eq!(p.replaces, 1);
            assert_eq!(p.reboots, 0);
            assert_eq!(p.reboot_record, None);
        });
    }

    #[test]
    fn cycle_end_is_reported_after_the_reboot_request() {
        let service = service_with(MockPlatform::default(), fast_config());

        block_on(join(service.run_upgrade_worker(), async {
            service.start_upgrade().unwrap();
            assert!(service.wait_cycle_end().await);
            // Everything is on disk by the time the waiter wakes up
            service.platform().with(|p| {
                assert_eq!(p.reboot_record, Some(EndState::Success));
                assert_eq!(p.reboots, 1);
            });
            service.shutdown();
        }));
    }

    #[test]
    fn cycle_end_is_reported_on_failure() {
        let platform = MockPlatform::default();
        platform.with(|s| s.fail_reboot = true);
        let service = service_with(platform, fast_config());

        block_on(join(service.run_upgrade_worker(), async {
            service.start_upgrade().unwrap();
            assert!(!service.wait_cycle_end().await);
            assert_eq!(
                service.state(),
                UpgradeState::End {
                    end_state: EndState::UnknownError
                }
            );
            service.shutdown();
        }));
    }

    #[test]
    fn persist_failure_skips_reboot() {
        let platform = MockPlatform::default();
        platform.with(|s| s.fail_set_state = true);
        let service = service_with(platform, fast_config());

        service.start_upgrade().unwrap();
        run_worker_until(&service, |s| s.state().stage() == crate::UpgradeStage::End);

        assert_eq!(
            service.state(),
            UpgradeState::End {
                end_state: EndState::UnknownError
            }
        );
        assert_eq!(service.platform().with(|p| p.reboots), 0);
    }

    #[test]
    fn reboot_failure_clears_record() {
        let platform = MockPlatform::default();
        platform.with(|s| s.fail_reboot = true);
        let service = service_with(platform, fast_config());

        service.start_upgrade().unwrap();
        run_worker_until(&service, |s| s.state().stage() == crate::UpgradeStage::End);

        assert_eq!(
            service.state(),
            UpgradeState::End {
                end_state: EndState::UnknownError
            }
        );
        assert_eq!(service.platform().with(|p| p.reboot_record), None);

        // The failure is acknowledged and a new cycle may start
        service.finish_upgrade().unwrap();
        assert_eq!(service.state(), UpgradeState::Idle);
        service.start_upgrade().unwrap();
    }

    #[test]
    fn end_state_is_pushed_until_finished() {
        let platform = MockPlatform::default();
        platform.with(|s| s.reboot_record = Some(EndState::Success));
        let service = service_with(platform, fast_config());

        let end = UpgradeState::End {
            end_state: EndState::Success,
        };
        run_worker_until(&service, |s| {
            s.core().pushes().iter().filter(|p| **p == end).count() >= 3
        });

        service.finish_upgrade().unwrap();
        assert_eq!(service.state(), UpgradeState::Idle);
        assert_eq!(service.core().last_push(), Some(UpgradeState::Idle));
    }

    #[test]
    fn busy_while_cycle_runs() {
        let service = service_with(MockPlatform::default(), fast_config());

        // Idle finish is a no-op
        service.finish_upgrade().unwrap();
        assert!(service.core().pushes().is_empty());

        service.start_upgrade().unwrap();
        assert!(matches!(
            service.start_upgrade(),
            Err(UpgradeError::Busy { .. })
        ));
        assert!(matches!(
            service.finish_upgrade(),
            Err(UpgradeError::Busy { .. })
        ));
        assert!(matches!(
            service.enter_upgrade_mode(),
            Err(UpgradeError::Busy { .. })
        ));
        assert!(!service.is_enter_mode_pending());
        assert_eq!(service.state(), ongoing(0));
    }
}
