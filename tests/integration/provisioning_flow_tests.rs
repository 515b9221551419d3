//! Integration tests for cold-boot provisioning and warm-boot resume.
//!
//! Verifies the one-time network setup sequence, that a warm boot skips it
//! and restores the session instead, and that boot-time failures never
//! stop the loop from reaching its first report.

use dispenser::app::events::AppEvent;
use dispenser::app::ports::{JoinMode, NetworkCredentials, RetainedState};
use dispenser::config::DeviceConfig;
use dispenser::events::Edge;
use dispenser::pins::{DISPENSE_GPIO, LOW_BATTERY_GPIO, RESET_GPIO};
use dispenser::scheduler::WakeCause;

use crate::control_loop_tests::{Rig, interval};
use crate::mock_hw::{MockPlatform, MockStore, NetCall};

// ── Cold boot ─────────────────────────────────────────────────

#[test]
fn cold_boot_provisions_the_stack_in_order() {
    let config = interval(60);
    let credentials = NetworkCredentials::from_config(&config);
    let mut rig = Rig::new(config);
    rig.boot();

    assert_eq!(
        rig.net.calls,
        vec![
            NetCall::ResetConfig,
            NetCall::ResetSession,
            NetCall::SetJoinMode(JoinMode::Otaa),
            NetCall::SetCredentials(credentials),
            NetCall::SetDutyCycle(true),
            NetCall::SetAdr(false),
            NetCall::SetDataRate(5),
            NetCall::SaveConfig,
        ]
    );
    assert_eq!(rig.platform.wake_pin, Some(DISPENSE_GPIO));
}

#[test]
fn cold_boot_attaches_all_three_handlers() {
    let mut rig = Rig::new(interval(60));
    rig.boot();

    let attached: Vec<(i32, Edge)> = rig
        .platform
        .registrations
        .iter()
        .map(|r| (r.pin, r.edge))
        .collect();
    assert_eq!(
        attached,
        vec![
            (DISPENSE_GPIO, Edge::Rising),
            (RESET_GPIO, Edge::Falling),
            (LOW_BATTERY_GPIO, Edge::Falling),
        ]
    );
}

#[test]
fn cold_boot_emits_started() {
    let mut rig = Rig::new(interval(60));
    rig.boot();
    assert_eq!(
        rig.sink.events.last(),
        Some(&AppEvent::Started {
            warm: false,
            remaining: 1000,
            interval_secs: 60,
        })
    );
    assert_eq!(rig.platform.indicator, vec![true]);
}

#[test]
fn cold_boot_clamps_a_stored_interval_to_the_ceiling() {
    let mut store = MockStore::new();
    store.interval = Some(300);
    let mut rig = Rig::with(interval(60), MockPlatform::new(), store);
    rig.boot();

    assert_eq!(rig.cl.interval_secs(), 60);
    assert_eq!(rig.store.interval_writes, vec![60]);
}

#[test]
fn cold_boot_keeps_a_shorter_stored_interval() {
    let mut store = MockStore::new();
    store.interval = Some(30);
    let mut rig = Rig::with(interval(60), MockPlatform::new(), store);
    rig.boot();

    assert_eq!(rig.cl.interval_secs(), 30);
    assert!(rig.store.interval_writes.is_empty());
}

#[test]
fn cold_boot_resumes_the_stored_count() {
    let mut store = MockStore::new();
    store.remaining = Some(640);
    let mut rig = Rig::with(interval(60), MockPlatform::new(), store);
    rig.boot();
    rig.cycle();

    assert_eq!(rig.net.sent(), vec![vec![0x02, 0x80]]);
}

#[test]
fn provisioning_failures_are_reported_and_skipped() {
    let mut rig = Rig::new(interval(60));
    rig.net.failing = vec!["credentials", "adr"];
    rig.boot();

    assert_eq!(
        rig.sink.failures(),
        vec!["ConfigurationError", "ConfigurationError"]
    );
    assert_eq!(rig.net.count(&NetCall::SaveConfig), 1);

    rig.cycle();
    assert_eq!(rig.net.sent().len(), 1);
}

#[test]
fn derived_dev_eui_reaches_the_stack() {
    let config = interval(60);
    let dev_eui = [0xDE, 0xAD, 0xBE, 0xFF, 0xFE, 0xEF, 0xCA, 0xFE];
    let credentials = NetworkCredentials::from_config(&config).with_dev_eui(dev_eui);

    let mut rig = Rig::new(config);
    rig.cl = rig.cl.with_credentials(credentials);
    rig.boot();

    assert!(rig.net.calls.iter().any(|c| matches!(
        c,
        NetCall::SetCredentials(NetworkCredentials { dev_eui: Some(eui), .. }) if *eui == dev_eui
    )));
}

// ── Warm boot ─────────────────────────────────────────────────

#[test]
fn warm_boot_restores_instead_of_provisioning() {
    let mut store = MockStore::new();
    store.remaining = Some(640);
    store.interval = Some(300);
    let mut rig = Rig::with(interval(60), MockPlatform::warm(WakeCause::Timer), store);
    rig.boot();

    assert_eq!(rig.net.calls, vec![NetCall::RestoreSession]);
    assert_eq!(rig.cl.interval_secs(), 300);
    assert_eq!(
        rig.sink.events.last(),
        Some(&AppEvent::Started {
            warm: true,
            remaining: 640,
            interval_secs: 300,
        })
    );
}

#[test]
fn warm_boot_reports_on_the_first_cycle_without_rejoining() {
    let mut store = MockStore::new();
    store.remaining = Some(640);
    let mut rig = Rig::with(interval(60), MockPlatform::warm(WakeCause::Timer), store);
    rig.net.joined = true;
    rig.boot();
    rig.cycle();

    assert_eq!(rig.net.joins(), 0);
    assert_eq!(rig.net.sent(), vec![vec![0x02, 0x80]]);
}

#[test]
fn warm_boot_from_dispense_pin_counts_the_edge() {
    let mut store = MockStore::new();
    store.remaining = Some(640);
    let mut platform = MockPlatform::warm(WakeCause::Interrupt {
        pin: Some(DISPENSE_GPIO),
    });
    platform.set_level(DISPENSE_GPIO, true);
    let mut rig = Rig::with(interval(60), platform, store);
    rig.net.joined = true;
    rig.boot();
    rig.cycle();

    assert_eq!(rig.net.sent(), vec![vec![0x02, 0x7F]]);
    assert_eq!(rig.store.remaining, Some(639));
}

#[test]
fn warm_boot_with_retained_deadline_counts_without_reporting() {
    let mut store = MockStore::new();
    store.remaining = Some(640);
    let mut platform = MockPlatform::warm(WakeCause::Interrupt {
        pin: Some(DISPENSE_GPIO),
    });
    platform.clock = 30;
    platform.set_level(DISPENSE_GPIO, true);
    platform.retained = Some(RetainedState {
        report_deadline: Some(60),
        ..RetainedState::default()
    });
    let mut rig = Rig::with(interval(60), platform, store);
    rig.net.joined = true;
    rig.boot();
    assert_eq!(rig.cl.next_deadline(), Some(60));

    rig.cycle();
    assert!(rig.net.sent().is_empty());
    assert_eq!(rig.store.remaining, Some(639));
    assert_eq!(rig.platform.durations(), vec![30]);
}

#[test]
fn warm_boot_with_pin_high_since_sleep_does_not_recount() {
    let mut store = MockStore::new();
    store.remaining = Some(640);
    let mut platform = MockPlatform::warm(WakeCause::Interrupt {
        pin: Some(DISPENSE_GPIO),
    });
    platform.clock = 30;
    platform.set_level(DISPENSE_GPIO, true);
    platform.retained = Some(RetainedState {
        report_deadline: Some(60),
        dispense_high: true,
        low_pending: false,
    });
    let mut rig = Rig::with(interval(60), platform, store);
    rig.boot();
    rig.cycle();

    assert_eq!(rig.cl.remaining(), 640);
    assert!(rig.store.remaining_writes.is_empty());
    assert!(rig.net.sent().is_empty());
}

#[test]
fn warm_boot_carries_a_pending_battery_trip() {
    let mut platform = MockPlatform::warm(WakeCause::Timer);
    platform.retained = Some(RetainedState {
        low_pending: true,
        ..RetainedState::default()
    });
    let mut rig = Rig::with(interval(60), platform, MockStore::new());
    rig.net.joined = true;
    rig.boot();
    rig.cycle();

    assert_eq!(rig.net.sent(), vec![vec![0x03, 0xE8, 0x01]]);
    assert_eq!(rig.store.battery_writes, vec![true]);
}

#[test]
fn warm_boot_session_restore_failure_falls_back_to_join() {
    let mut rig = Rig::with(interval(60), MockPlatform::warm(WakeCause::Timer), MockStore::new());
    rig.net.failing = vec!["restore_session"];
    rig.boot();
    assert_eq!(rig.sink.failures(), vec!["PersistenceFailure"]);

    rig.cycle();
    assert_eq!(rig.net.joins(), 1);
    assert_eq!(rig.net.sent().len(), 1);
}

#[test]
fn custom_full_count_is_the_reset_target() {
    let config = DeviceConfig {
        full_count: 250,
        ..interval(60)
    };
    let mut rig = Rig::new(config);
    rig.boot();
    rig.cycle();
    assert_eq!(rig.net.sent(), vec![vec![0x00, 0xFA]]);
}
