// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the per-device power engine.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeDriver, Harness, Relay, settle};
use powerhub_lib::device::DeviceConfig;
use powerhub_lib::error::Error;
use powerhub_lib::event::PowerEvent;
use powerhub_lib::host::{HardwareState, ServiceAction};
use powerhub_lib::{Initialization, PowerAction, PowerState};
use tokio::time::sleep;

fn plug() -> DeviceConfig {
    DeviceConfig::new("printer", "fake")
}

// ============================================================================
// Request processing
// ============================================================================

mod requests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn requests_on_one_device_never_overlap() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        let device = harness.add(plug(), FakeDriver::new(&relay)).await;
        relay.set_delay(Duration::from_millis(50));

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let device = Arc::clone(&device);
            tasks.push(tokio::spawn(async move {
                device.process_request(PowerAction::Toggle, false).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(!relay.overlapped());
        assert_eq!(relay.set_calls(), 5);
        // Five toggles starting from off
        assert_eq!(device.state(), PowerState::On);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_resolves_against_refreshed_state() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        let device = harness.add(plug(), FakeDriver::new(&relay)).await;
        assert_eq!(device.state(), PowerState::Off);

        relay.flip(PowerState::On);
        let state = device.process_request(PowerAction::Toggle, false).await.unwrap();

        assert_eq!(state, PowerState::Off);
        assert_eq!(relay.state(), PowerState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn matching_state_skips_set_power() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::On);
        let device = harness.add(plug(), FakeDriver::new(&relay)).await;

        let state = device.process_request(PowerAction::On, false).await.unwrap();

        assert_eq!(state, PowerState::On);
        assert_eq!(relay.set_calls(), 0);
        assert!(device.last_update().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn locked_while_printing_requires_force() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        let device = harness
            .add(plug().with_locked_while_printing(true), FakeDriver::new(&relay))
            .await;
        harness.hardware.set_printing(true);

        let err = device.process_request(PowerAction::On, false).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(ref msg) if msg.contains("while printing")));
        assert_eq!(device.state(), PowerState::Off);
        assert_eq!(relay.set_calls(), 0);

        let state = device.process_request(PowerAction::On, true).await.unwrap();
        assert_eq!(state, PowerState::On);
        assert_eq!(device.state(), PowerState::On);
    }

    #[tokio::test(start_paused = true)]
    async fn status_is_allowed_while_printing() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::On);
        let device = harness
            .add(plug().with_locked_while_printing(true), FakeDriver::new(&relay))
            .await;
        harness.hardware.set_printing(true);

        let state = device.process_request(PowerAction::Status, false).await.unwrap();
        assert_eq!(state, PowerState::On);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_failure_sets_error_state() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::On);
        let device = harness.add(plug(), FakeDriver::new(&relay)).await;

        relay.set_unreachable(true);
        let state = device.process_request(PowerAction::Status, false).await.unwrap();
        assert_eq!(state, PowerState::Error);
        assert_eq!(device.state(), PowerState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn set_power_failure_is_reported() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        let device = harness.add(plug(), FakeDriver::new(&relay)).await;

        relay.set_unreachable(true);
        // The refresh fails, then the switch is rejected
        let err = device.process_request(PowerAction::On, false).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(device.state(), PowerState::Error);
    }
}

// ============================================================================
// Observed changes and side effects
// ============================================================================

mod side_effects {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn restricted_external_change_only_notifies() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::On);
        let device = harness
            .add(plug().with_bound_services(["klipper_mcu"]), FakeDriver::new(&relay))
            .await;
        let mut events = harness.manager.events().subscribe();

        relay.flip(PowerState::Off);
        device.process_request(PowerAction::Status, false).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.status(), PowerState::Off);
        assert!(harness.services.actions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unrestricted_external_change_runs_bound_services() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::On);
        let device = harness
            .add(
                plug()
                    .with_bound_services(["klipper_mcu", "webcamd.service"])
                    .with_restrict_actions(false),
                FakeDriver::new(&relay),
            )
            .await;

        relay.flip(PowerState::Off);
        device.process_request(PowerAction::Status, false).await.unwrap();

        assert_eq!(
            harness.services.actions(),
            vec![
                (ServiceAction::Stop, "klipper_mcu".to_string()),
                (ServiceAction::Stop, "webcamd".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn requested_change_notifies_and_starts_services() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        let device = harness
            .add(plug().with_bound_services(["webcamd"]), FakeDriver::new(&relay))
            .await;
        let mut events = harness.manager.events().subscribe();

        device.process_request(PowerAction::On, false).await.unwrap();

        let PowerEvent::PowerChanged(info) = events.recv().await.unwrap();
        assert_eq!(info.device, "printer");
        assert_eq!(info.status, PowerState::On);
        assert_eq!(harness.services.actions(), vec![(ServiceAction::Start, "webcamd".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_bound_service_does_not_stop_the_rest() {
        let harness = Harness::with_services(["klipper_mcu", "webcamd"]);
        harness.services.fail_on("klipper_mcu");
        let relay = Relay::new(PowerState::Off);
        let device = harness
            .add(
                plug().with_bound_services(["klipper_mcu", "webcamd"]),
                FakeDriver::new(&relay),
            )
            .await;

        let state = device.process_request(PowerAction::On, false).await.unwrap();

        assert_eq!(state, PowerState::On);
        assert_eq!(harness.services.actions(), vec![(ServiceAction::Start, "webcamd".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn reported_state_triggers_external_change() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::On);
        let device = harness
            .add(
                plug().with_bound_services(["klipper_mcu"]).with_restrict_actions(false),
                FakeDriver::new(&relay).without_polling(),
            )
            .await;
        let mut events = harness.manager.events().subscribe();

        relay.report(PowerState::Off);
        settle().await;

        assert_eq!(device.state(), PowerState::Off);
        assert_eq!(events.recv().await.unwrap().status(), PowerState::Off);
        assert_eq!(harness.services.actions(), vec![(ServiceAction::Stop, "klipper_mcu".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_report_is_not_a_change() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::On);
        let device = harness.add(plug(), FakeDriver::new(&relay)).await;
        let mut events = harness.manager.events().subscribe();

        relay.report(PowerState::On);
        settle().await;

        assert_eq!(device.state(), PowerState::On);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_scheduled_after_power_on() {
        let harness = Harness::new();
        harness.hardware.set_state(HardwareState::Error);
        let relay = Relay::new(PowerState::Off);
        let device = harness
            .add(plug().with_restart_when_powered(2.0), FakeDriver::new(&relay))
            .await;

        device.process_request(PowerAction::On, false).await.unwrap();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(harness.hardware.restarts(), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(harness.hardware.restarts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_waits_for_startup_and_skips_when_ready() {
        let harness = Harness::new();
        harness.hardware.set_state(HardwareState::Startup);
        let relay = Relay::new(PowerState::Off);
        let device = harness
            .add(plug().with_restart_when_powered(1.0), FakeDriver::new(&relay))
            .await;

        device.process_request(PowerAction::On, false).await.unwrap();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(harness.hardware.restarts(), 0);

        harness.hardware.set_state(HardwareState::Ready);
        harness.manager.handle_hardware_started(HardwareState::Ready);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(harness.hardware.restarts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_runs_when_startup_fails() {
        let harness = Harness::new();
        harness.hardware.set_state(HardwareState::Startup);
        let relay = Relay::new(PowerState::Off);
        let device = harness
            .add(plug().with_restart_when_powered(1.0), FakeDriver::new(&relay))
            .await;

        device.process_request(PowerAction::On, false).await.unwrap();
        harness.manager.handle_hardware_started(HardwareState::Error);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(harness.hardware.restarts(), 1);

        // The pending restart was consumed
        harness.manager.handle_hardware_started(HardwareState::Error);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(harness.hardware.restarts(), 1);
    }
}

// ============================================================================
// Timers
// ============================================================================

mod timers {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn shutdown_off_is_immediate_without_delay() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::On);
        let device = harness
            .add(plug().with_off_when_shutdown(0.0), FakeDriver::new(&relay))
            .await;

        harness.hardware.set_state(HardwareState::Shutdown);
        harness.manager.handle_shutdown();
        settle().await;

        assert_eq!(device.state(), PowerState::Off);
        assert_eq!(relay.state(), PowerState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_shutdown_off_rechecks_hardware() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::On);
        let device = harness
            .add(plug().with_off_when_shutdown(2.0), FakeDriver::new(&relay))
            .await;

        harness.hardware.set_state(HardwareState::Shutdown);
        harness.manager.handle_shutdown();
        sleep(Duration::from_secs(1)).await;
        harness.hardware.set_state(HardwareState::Ready);
        sleep(Duration::from_secs(2)).await;

        assert_eq!(device.state(), PowerState::On);
        assert_eq!(relay.set_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_shutdown_off_fires_if_still_shut_down() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::On);
        let device = harness
            .add(plug().with_off_when_shutdown(2.0), FakeDriver::new(&relay))
            .await;

        harness.hardware.set_state(HardwareState::Shutdown);
        harness.manager.handle_shutdown();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(device.state(), PowerState::On);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(device.state(), PowerState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_ignored_without_option() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::On);
        let device = harness.add(plug(), FakeDriver::new(&relay)).await;

        harness.hardware.set_state(HardwareState::Shutdown);
        harness.manager.handle_shutdown();
        settle().await;

        assert_eq!(device.state(), PowerState::On);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_off_rearms_instead_of_stacking() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        let device = harness.add(plug().with_auto_off(10.0), FakeDriver::new(&relay)).await;

        device.process_request(PowerAction::On, false).await.unwrap();
        sleep(Duration::from_secs(5)).await;
        device.process_request(PowerAction::Off, false).await.unwrap();
        device.process_request(PowerAction::On, false).await.unwrap();

        // The first timer would have fired at t=10
        sleep(Duration::from_secs(7)).await;
        assert_eq!(device.state(), PowerState::On);

        sleep(Duration::from_secs(4)).await;
        assert_eq!(device.state(), PowerState::Off);
        assert_eq!(relay.set_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn redundant_on_keeps_pending_auto_off() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        let device = harness.add(plug().with_auto_off(10.0), FakeDriver::new(&relay)).await;

        device.process_request(PowerAction::On, false).await.unwrap();
        sleep(Duration::from_secs(5)).await;
        device.process_request(PowerAction::On, false).await.unwrap();
        assert_eq!(relay.set_calls(), 1);

        // Still the timer armed at t=0
        sleep(Duration::from_secs(6)).await;
        assert_eq!(device.state(), PowerState::Off);
        assert_eq!(relay.set_calls(), 2);

        sleep(Duration::from_secs(20)).await;
        assert_eq!(relay.set_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_auto_off() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        let device = harness.add(plug().with_auto_off(3.0), FakeDriver::new(&relay)).await;

        device.process_request(PowerAction::On, false).await.unwrap();
        device.close().await;
        sleep(Duration::from_secs(5)).await;

        assert_eq!(relay.state(), PowerState::On);
    }
}

// ============================================================================
// Bring-up and polling
// ============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn requests_return_init_while_bring_up_holds_lock() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        relay.set_unreachable(true);
        let device = harness.add(plug(), FakeDriver::new(&relay)).await;

        assert_eq!(device.state(), PowerState::Init);
        assert!(device.is_busy());
        let state = device.process_request(PowerAction::On, false).await.unwrap();
        assert_eq!(state, PowerState::Init);
        assert_eq!(relay.set_calls(), 0);

        relay.set_unreachable(false);
        sleep(Duration::from_secs(6)).await;
        assert_eq!(device.state(), PowerState::Off);
        assert!(!device.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn bring_up_retries_on_fixed_interval() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        relay.set_unreachable(true);
        let _device = harness.add(plug(), FakeDriver::new(&relay)).await;

        sleep(Duration::from_secs(12)).await;
        // Attempts at t=0, 5 and 10
        assert_eq!(relay.refresh_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_state_applied_after_bring_up() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        let device = harness
            .add(
                plug().with_initial_state(true).with_bound_services(["webcamd"]),
                FakeDriver::new(&relay),
            )
            .await;

        assert_eq!(device.state(), PowerState::On);
        assert_eq!(harness.services.actions(), vec![(ServiceAction::Start, "webcamd".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn apply_initial_defaults_to_off() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::On);
        let device = harness
            .add(
                plug(),
                FakeDriver::new(&relay).with_initialization(Initialization::ApplyInitial),
            )
            .await;

        assert_eq!(device.state(), PowerState::Off);
        assert_eq!(relay.refresh_calls(), 0);
        assert!(device.last_update().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn external_initialization_waits_for_reports() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::On);
        let device = harness
            .add(plug(), FakeDriver::new(&relay).with_initialization(Initialization::External))
            .await;
        assert_eq!(device.state(), PowerState::Init);

        relay.report(PowerState::On);
        settle().await;
        assert_eq!(device.state(), PowerState::On);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_refreshes_on_interval() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        let device = harness.add(plug().with_poll_interval(2.0), FakeDriver::new(&relay)).await;
        assert!(device.is_polling());
        let after_init = relay.refresh_calls();

        relay.flip(PowerState::On);
        sleep(Duration::from_secs(5)).await;
        assert!(relay.refresh_calls() >= after_init + 2);
        assert_eq!(device.state(), PowerState::On);

        device.close().await;
        assert!(!device.is_polling());
        let after_close = relay.refresh_calls();
        sleep(Duration::from_secs(10)).await;
        assert_eq!(relay.refresh_calls(), after_close);
    }

    #[tokio::test(start_paused = true)]
    async fn close_lets_in_flight_poll_finish() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        let device = harness.add(plug().with_poll_interval(1.0), FakeDriver::new(&relay)).await;
        relay.set_delay(Duration::from_millis(300));
        let before = relay.refresh_calls();

        sleep(Duration::from_millis(1100)).await;
        assert!(device.is_busy());

        let started = tokio::time::Instant::now();
        device.close().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!device.is_polling());
        assert!(!device.is_busy());
        assert_eq!(relay.refresh_calls(), before + 1);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(relay.refresh_calls(), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_aborts_stuck_poll_after_grace() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        let device = harness.add(plug().with_poll_interval(1.0), FakeDriver::new(&relay)).await;
        relay.set_delay(Duration::from_secs(5));
        let before = relay.refresh_calls();

        sleep(Duration::from_millis(1500)).await;
        assert!(device.is_busy());

        let started = tokio::time::Instant::now();
        device.close().await;
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!device.is_polling());
        // Aborting the poller releases the request lock
        settle().await;
        assert!(!device.is_busy());

        sleep(Duration::from_secs(10)).await;
        assert_eq!(relay.refresh_calls(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_interval_ignored_without_driver_support() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        let device = harness
            .add(plug().with_poll_interval(2.0), FakeDriver::new(&relay).without_polling())
            .await;

        assert!(device.settings().poll_interval.is_none());
        assert!(!device.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_bound_service_fails_initialize() {
        let harness = Harness::new();
        let relay = Relay::new(PowerState::Off);
        let config = plug().with_bound_services(["octoprint"]);
        let device = harness
            .manager
            .create_device(&config, FakeDriver::new(&relay).boxed())
            .unwrap();

        let err = harness.manager.add_device(device).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("octoprint is not available")));
        assert_eq!(harness.manager.device_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn binding_own_service_fails_initialize() {
        let harness = Harness::with_services(["moonraker"]);
        let relay = Relay::new(PowerState::Off);
        let config = plug().with_bound_services(["moonraker.service"]);
        let device = harness
            .manager
            .create_device(&config, FakeDriver::new(&relay).boxed())
            .unwrap();

        let err = harness.manager.add_device(device).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("Cannot bind")));
    }
}
