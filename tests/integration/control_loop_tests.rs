//! Integration tests: ControlLoop → FSM → ports, cycle by cycle.

use dispenser::app::events::AppEvent;
use dispenser::app::ports::NetworkError;
use dispenser::app::service::ControlLoop;
use dispenser::battery::BatteryStatus;
use dispenser::config::DeviceConfig;
use dispenser::events::SharedState;
use dispenser::fsm::StateId;
use dispenser::payload;
use dispenser::pins::{DISPENSE_GPIO, LOW_BATTERY_GPIO, RESET_GPIO};
use dispenser::scheduler::{SleepDepth, WakeCause, WakeSource};

use crate::mock_hw::{MockNetwork, MockPlatform, MockStore, NetCall, RecordingSink, ScriptedWake};

// ── Rig ───────────────────────────────────────────────────────

pub struct Rig {
    pub cl: ControlLoop,
    pub net: MockNetwork,
    pub store: MockStore,
    pub platform: MockPlatform,
    pub sink: RecordingSink,
}

impl Rig {
    pub fn new(config: DeviceConfig) -> Self {
        Self::with(config, MockPlatform::new(), MockStore::new())
    }

    pub fn with(config: DeviceConfig, platform: MockPlatform, store: MockStore) -> Self {
        let shared = SharedState::leak(config.full_count, false, config.full_count);
        Self {
            cl: ControlLoop::new(config, shared),
            net: MockNetwork::new(),
            store,
            platform,
            sink: RecordingSink::new(),
        }
    }

    pub fn boot(&mut self) {
        self.cl
            .boot(&mut self.net, &mut self.store, &mut self.platform, &mut self.sink);
    }

    pub fn cycle(&mut self) {
        self.cl
            .run_cycle(&mut self.net, &mut self.store, &mut self.platform, &mut self.sink);
    }

    pub fn cycles(&mut self, n: usize) {
        for _ in 0..n {
            self.cycle();
        }
    }
}

pub fn interval(secs: u32) -> DeviceConfig {
    DeviceConfig {
        default_tx_interval_secs: secs,
        tx_interval_ceiling_secs: secs,
        ..Default::default()
    }
}

fn report(remaining: u32, battery: Option<BatteryStatus>) -> AppEvent {
    AppEvent::ReportSent {
        payload: payload::compose(remaining, battery),
        battery,
    }
}

// ── First cycle ───────────────────────────────────────────────

#[test]
fn first_wake_after_cold_boot_joins_and_reports() {
    let mut rig = Rig::new(interval(60));
    rig.boot();
    rig.net.calls.clear();
    rig.cycle();

    assert_eq!(
        rig.net.calls,
        vec![
            NetCall::IsJoined,
            NetCall::Join,
            NetCall::SetDutyCycle(false),
            NetCall::SetDataRate(5),
            NetCall::Transmit(vec![0x03, 0xE8]),
        ]
    );
    assert!(rig.sink.has(&AppEvent::Joined));
    assert!(rig.sink.has(&report(1000, None)));
    assert_eq!(rig.platform.durations(), vec![60]);
    assert_eq!(rig.cl.reports(), 1);
    assert_eq!(rig.cl.state(), StateId::AwakeProcessing);
    assert_eq!(rig.cl.next_deadline(), Some(60));
}

#[test]
fn indicator_is_off_only_while_asleep() {
    let mut rig = Rig::new(interval(60));
    rig.boot();
    rig.cycle();
    assert_eq!(rig.platform.indicator, vec![true, false, true]);
    assert!(rig.platform.indicator_on());
}

#[test]
fn state_changes_follow_the_cycle() {
    let mut rig = Rig::new(interval(60));
    rig.boot();
    rig.cycle();
    let transitions: Vec<(StateId, StateId)> = rig
        .sink
        .events
        .iter()
        .filter_map(|e| match e {
            AppEvent::StateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (StateId::AwakeProcessing, StateId::Transmitting),
            (StateId::Transmitting, StateId::Sleeping),
            (StateId::Sleeping, StateId::AwakeProcessing),
        ]
    );
}

// ── Dispense fast path ────────────────────────────────────────

#[test]
fn dispense_wakes_sleep_out_the_remaining_interval() {
    let mut rig = Rig::new(interval(120));
    rig.platform
        .push(ScriptedWake::interrupt_at(30, &[DISPENSE_GPIO, DISPENSE_GPIO, DISPENSE_GPIO]));
    rig.boot();

    rig.cycle(); // report at t=0, wakes at t=30
    rig.cycle(); // dispense-only: back to sleep until t=120
    assert_eq!(rig.cl.remaining(), 997);
    assert_eq!(rig.net.sent(), vec![vec![0x03, 0xE8]]);
    assert_eq!(rig.cl.next_deadline(), Some(120));

    rig.cycle(); // deadline report
    assert_eq!(rig.net.sent(), vec![vec![0x03, 0xE8], vec![0x03, 0xE5]]);
    assert_eq!(rig.platform.durations(), vec![120, 90, 120]);
    assert_eq!(rig.net.joins(), 1);
}

#[test]
fn dispense_count_is_persisted_before_sleeping_again() {
    let mut rig = Rig::new(interval(60));
    rig.platform.push(ScriptedWake::interrupt_at(10, &[DISPENSE_GPIO]));
    rig.boot();
    rig.cycles(2);

    assert_eq!(rig.store.remaining_writes, vec![999]);
    assert!(rig.sink.has(&AppEvent::DispenseCounted { remaining: 999 }));
}

#[test]
fn repeated_dispense_wakes_keep_the_deadline() {
    let mut rig = Rig::new(interval(100));
    rig.platform.push(ScriptedWake::interrupt_at(10, &[DISPENSE_GPIO]));
    rig.platform.push(ScriptedWake::interrupt_at(25, &[DISPENSE_GPIO]));
    rig.platform.push(ScriptedWake::interrupt_at(5, &[DISPENSE_GPIO]));
    rig.boot();
    rig.cycles(4);

    assert_eq!(rig.platform.durations(), vec![100, 90, 65, 60]);
    assert_eq!(rig.net.sent().len(), 1);
    assert_eq!(rig.cl.remaining(), 997);
}

#[test]
fn counter_clamps_at_zero() {
    let mut store = MockStore::new();
    store.remaining = Some(1);
    let mut rig = Rig::with(interval(60), MockPlatform::new(), store);
    rig.platform.push(ScriptedWake::edges_during(&[DISPENSE_GPIO; 4]));
    rig.boot();
    rig.cycles(2);

    assert_eq!(rig.cl.remaining(), 0);
    assert_eq!(rig.net.sent()[1], vec![0x00, 0x00]);
}

#[test]
fn timer_only_edges_are_counted_at_the_deadline() {
    let config = DeviceConfig {
        wake_source: WakeSource::TimerOnly,
        ..interval(60)
    };
    let mut rig = Rig::new(config);
    rig.platform
        .push(ScriptedWake::edges_during(&[DISPENSE_GPIO, DISPENSE_GPIO]));
    rig.boot();
    rig.cycles(2);

    assert_eq!(rig.net.sent(), vec![vec![0x03, 0xE8], vec![0x03, 0xE6]]);
    assert!(rig.platform.requests.iter().all(|r| r.wake_source == WakeSource::TimerOnly));
}

// ── Reset ─────────────────────────────────────────────────────

#[test]
fn reset_alongside_dispenses_forces_a_report() {
    let mut rig = Rig::new(interval(60));
    rig.platform
        .push(ScriptedWake::interrupt_at(10, &[DISPENSE_GPIO, DISPENSE_GPIO, RESET_GPIO]));
    rig.boot();
    rig.cycles(2);

    assert!(rig.sink.has(&AppEvent::CounterReset { full_count: 1000 }));
    assert_eq!(rig.net.sent(), vec![vec![0x03, 0xE8], vec![0x03, 0xE8]]);
    assert_eq!(rig.cl.remaining(), 1000);
    // A report restarts the cadence from the wake that carried it.
    assert_eq!(rig.cl.next_deadline(), Some(70));
}

#[test]
fn reset_wins_over_dispenses_drained_with_it() {
    let mut store = MockStore::new();
    store.remaining = Some(10);
    let mut rig = Rig::with(interval(60), MockPlatform::new(), store);
    rig.platform
        .push(ScriptedWake::interrupt_at(5, &[RESET_GPIO, DISPENSE_GPIO]));
    rig.boot();
    rig.cycles(2);

    assert_eq!(rig.net.sent()[1], vec![0x03, 0xE8]);
    assert_eq!(rig.store.remaining, Some(1000));
}

// ── Missed edges ──────────────────────────────────────────────

#[test]
fn dispense_wake_without_handler_is_recovered_from_pin_level() {
    let mut rig = Rig::new(interval(60));
    rig.platform
        .push(ScriptedWake::missed_edge_at(20, DISPENSE_GPIO, true));
    rig.boot();
    rig.cycles(2);

    assert_eq!(rig.cl.remaining(), 999);
    assert_eq!(rig.net.sent().len(), 1);

    rig.cycle();
    assert_eq!(rig.net.sent()[1], vec![0x03, 0xE7]);
}

#[test]
fn reset_wake_without_handler_is_recovered_from_pin_level() {
    let mut store = MockStore::new();
    store.remaining = Some(5);
    let mut rig = Rig::with(interval(60), MockPlatform::new(), store);
    rig.platform
        .push(ScriptedWake::missed_edge_at(20, RESET_GPIO, false));
    rig.boot();
    rig.cycles(2);

    assert!(rig.sink.has(&AppEvent::CounterReset { full_count: 1000 }));
    assert_eq!(rig.net.sent(), vec![vec![0x00, 0x05], vec![0x03, 0xE8]]);
}

#[test]
fn handled_edge_is_not_counted_twice() {
    let mut rig = Rig::new(interval(60));
    rig.platform.push(
        ScriptedWake::interrupt_at(20, &[DISPENSE_GPIO]).with_levels(&[(DISPENSE_GPIO, true)]),
    );
    rig.boot();
    rig.cycles(2);
    assert_eq!(rig.cl.remaining(), 999);
}

#[test]
fn pulse_still_high_on_the_next_wake_is_counted_once() {
    let mut rig = Rig::new(interval(60));
    // The handler counts the pulse, then the MCU wakes again before the
    // pin has dropped.
    rig.platform.push(
        ScriptedWake::anonymous_at(10)
            .with_pulses(&[DISPENSE_GPIO])
            .with_levels(&[(DISPENSE_GPIO, true)]),
    );
    rig.platform.push(ScriptedWake::anonymous_at(2));
    rig.boot();
    rig.cycles(3);

    assert_eq!(rig.cl.remaining(), 999);
    assert_eq!(rig.net.sent(), vec![vec![0x03, 0xE8]]);
    assert_eq!(rig.platform.durations(), vec![60, 50, 48]);
}

#[test]
fn next_pulse_after_the_pin_fell_is_recovered() {
    let mut rig = Rig::new(interval(60));
    rig.platform.push(
        ScriptedWake::anonymous_at(10)
            .with_pulses(&[DISPENSE_GPIO])
            .with_levels(&[(DISPENSE_GPIO, true)]),
    );
    rig.platform
        .push(ScriptedWake::anonymous_at(5).with_levels(&[(DISPENSE_GPIO, false)]));
    rig.platform
        .push(ScriptedWake::anonymous_at(5).with_levels(&[(DISPENSE_GPIO, true)]));
    rig.boot();
    rig.cycles(4);

    assert_eq!(rig.cl.remaining(), 998);
    assert_eq!(rig.net.sent().len(), 1);
    assert_eq!(rig.platform.durations(), vec![60, 50, 45, 40]);
}

// ── Battery ───────────────────────────────────────────────────

#[test]
fn low_battery_is_reported_then_recovery_once() {
    let mut rig = Rig::new(interval(60));
    rig.platform.push(
        ScriptedWake::edges_during(&[LOW_BATTERY_GPIO]).with_levels(&[(LOW_BATTERY_GPIO, false)]),
    );
    rig.platform
        .push(ScriptedWake::timer().with_levels(&[(LOW_BATTERY_GPIO, true)]));
    rig.boot();
    rig.cycles(4);

    assert_eq!(
        rig.net.sent(),
        vec![
            vec![0x03, 0xE8],
            vec![0x03, 0xE8, 0x01],
            vec![0x03, 0xE8, 0x00],
            vec![0x03, 0xE8],
        ]
    );
    assert_eq!(rig.store.battery_writes, vec![true, false]);
    assert!(rig.sink.has(&report(1000, Some(BatteryStatus::Stable))));
}

#[test]
fn persistent_low_battery_alerts_every_report() {
    let mut rig = Rig::new(interval(60));
    rig.platform.set_level(LOW_BATTERY_GPIO, false);
    rig.boot();
    rig.cycles(3);

    assert!(rig.net.sent().iter().all(|p| p.len() == 3 && p[2] == 0x01));
    assert_eq!(rig.store.battery_writes, vec![true]);
}

#[test]
fn brief_comparator_trip_still_counts_as_low() {
    let mut rig = Rig::new(interval(60));
    // Handler fires but the pin is back high by the time the report reads it.
    rig.platform
        .push(ScriptedWake::edges_during(&[LOW_BATTERY_GPIO]));
    rig.boot();
    rig.cycles(3);

    assert_eq!(rig.net.sent()[1], vec![0x03, 0xE8, 0x01]);
    assert_eq!(rig.net.sent()[2], vec![0x03, 0xE8, 0x00]);
}

#[test]
fn battery_trip_survives_a_failed_join() {
    let mut rig = Rig::new(interval(60));
    rig.platform
        .push(ScriptedWake::edges_during(&[LOW_BATTERY_GPIO]));
    rig.boot();
    rig.cycle();

    // The session drops and the next join attempt is refused.
    rig.net.joined = false;
    rig.net.join_results.push_back(Err(NetworkError::JoinDenied));
    rig.cycles(3);

    assert_eq!(rig.sink.failures(), vec!["JoinFailure"]);
    assert_eq!(
        rig.net.sent(),
        vec![
            vec![0x03, 0xE8],
            vec![0x03, 0xE8, 0x01],
            vec![0x03, 0xE8, 0x00],
        ]
    );
    assert_eq!(rig.store.battery_writes, vec![true, false]);
}

#[test]
fn stored_alert_survives_restart() {
    let mut store = MockStore::new();
    store.battery = Some(true);
    let mut rig = Rig::with(interval(60), MockPlatform::new(), store);
    rig.boot();
    rig.cycles(2);

    assert_eq!(rig.net.sent(), vec![vec![0x03, 0xE8, 0x00], vec![0x03, 0xE8]]);
}

// ── Network failures ──────────────────────────────────────────

#[test]
fn join_failure_skips_transmit_and_retries_next_wake() {
    let mut rig = Rig::new(interval(60));
    rig.net.join_results.push_back(Err(NetworkError::JoinDenied));
    rig.boot();

    rig.cycle();
    assert!(rig.net.sent().is_empty());
    assert_eq!(rig.sink.failures(), vec!["JoinFailure"]);
    assert_eq!(rig.platform.durations(), vec![60]);

    rig.cycle();
    assert_eq!(rig.net.joins(), 2);
    assert_eq!(rig.net.sent(), vec![vec![0x03, 0xE8]]);
    assert_eq!(rig.cl.reports(), 2);
}

#[test]
fn transmit_failure_leaves_battery_state_uncommitted() {
    let mut rig = Rig::new(interval(60));
    rig.platform.set_level(LOW_BATTERY_GPIO, false);
    rig.net
        .transmit_results
        .push_back(Err(NetworkError::Timeout));
    rig.boot();

    rig.cycle();
    assert_eq!(rig.sink.failures(), vec!["TransmitFailure"]);
    assert!(rig.store.battery_writes.is_empty());

    rig.cycle();
    assert_eq!(rig.store.battery_writes, vec![true]);
    assert_eq!(rig.net.sent().len(), 2);
}

#[test]
fn undelivered_recovery_notice_is_sent_again() {
    let mut store = MockStore::new();
    store.battery = Some(true);
    let mut rig = Rig::with(interval(60), MockPlatform::new(), store);
    rig.net
        .transmit_results
        .push_back(Err(NetworkError::Timeout));
    rig.boot();
    rig.cycles(2);

    assert_eq!(
        rig.net.sent(),
        vec![vec![0x03, 0xE8, 0x00], vec![0x03, 0xE8, 0x00]]
    );
    assert_eq!(rig.store.battery_writes, vec![false]);
}

#[test]
fn data_rate_failure_does_not_block_transmit() {
    let mut rig = Rig::new(interval(60));
    rig.boot();
    rig.net.failing.push("data_rate");
    rig.cycle();

    assert_eq!(rig.sink.failures(), vec!["ConfigurationError"]);
    assert_eq!(rig.net.sent().len(), 1);
}

// ── Persistence failures ──────────────────────────────────────

#[test]
fn storage_write_failure_keeps_the_live_count() {
    let mut rig = Rig::new(interval(60));
    rig.platform.push(ScriptedWake::edges_during(&[DISPENSE_GPIO]));
    rig.boot();
    rig.store.fail_writes = true;
    rig.cycles(2);

    assert!(rig.sink.failures().contains(&"PersistenceFailure"));
    assert_eq!(rig.net.sent()[1], vec![0x03, 0xE7]);
}

#[test]
fn unreadable_store_falls_back_to_defaults() {
    let mut store = MockStore::new();
    store.fail_reads = true;
    let mut rig = Rig::with(interval(60), MockPlatform::new(), store);
    rig.boot();

    assert_eq!(rig.cl.remaining(), 1000);
    assert_eq!(rig.cl.interval_secs(), 60);
    assert!(rig.sink.failures().iter().all(|k| *k == "PersistenceFailure"));
}

// ── Interval ──────────────────────────────────────────────────

#[test]
fn interval_written_between_reports_takes_effect() {
    let mut rig = Rig::new(interval(60));
    rig.boot();
    rig.store.interval = Some(90);
    rig.cycle();

    assert_eq!(rig.cl.interval_secs(), 90);
    assert_eq!(rig.platform.durations(), vec![90]);
}

#[test]
fn overrun_sleep_is_floored() {
    let config = DeviceConfig {
        min_sleep_secs: 5,
        ..interval(60)
    };
    let mut rig = Rig::new(config);
    // Wake one second before the deadline with a dispense.
    rig.platform.push(ScriptedWake::interrupt_at(59, &[DISPENSE_GPIO]));
    rig.boot();
    rig.cycles(2);
    assert_eq!(rig.platform.durations(), vec![60, 5]);
}

// ── Volatile sleep ────────────────────────────────────────────

#[test]
fn volatile_sleep_saves_and_restores_the_session() {
    let config = DeviceConfig {
        sleep_depth: SleepDepth::Volatile,
        ..interval(60)
    };
    let mut rig = Rig::new(config);
    rig.boot();
    rig.cycle();

    assert_eq!(rig.net.count(&NetCall::SaveSession), 1);
    assert_eq!(rig.net.count(&NetCall::RestoreSession), 1);
    assert_eq!(rig.cl.next_deadline(), Some(60));
    assert!(rig.platform.requests[0].depth == SleepDepth::Volatile);
}

#[test]
fn volatile_dispense_wake_sleeps_out_the_retained_deadline() {
    let config = DeviceConfig {
        sleep_depth: SleepDepth::Volatile,
        ..interval(120)
    };
    let mut rig = Rig::new(config);
    // RAM is gone after a volatile wake: the deadline comes back from RTC
    // memory and the edge from the pin level.
    rig.platform
        .push(ScriptedWake::missed_edge_at(10, DISPENSE_GPIO, true));
    rig.boot();
    rig.cycles(2);

    assert_eq!(rig.net.sent(), vec![vec![0x03, 0xE8]]);
    assert_eq!(rig.platform.durations(), vec![120, 110]);
    assert_eq!(rig.store.remaining, Some(999));
    assert_eq!(rig.cl.next_deadline(), Some(120));

    rig.cycle();
    assert_eq!(rig.net.sent(), vec![vec![0x03, 0xE8], vec![0x03, 0xE7]]);
    assert_eq!(rig.platform.durations(), vec![120, 110, 120]);
    assert_eq!(rig.net.joins(), 1);
}

#[test]
fn retained_sleep_never_touches_the_session() {
    let mut rig = Rig::new(interval(60));
    rig.boot();
    rig.cycles(3);
    assert_eq!(rig.net.count(&NetCall::SaveSession), 0);
    assert_eq!(rig.net.count(&NetCall::RestoreSession), 0);
}

#[test]
fn woke_event_carries_the_cause() {
    let mut rig = Rig::new(interval(60));
    rig.platform.push(ScriptedWake::interrupt_at(3, &[RESET_GPIO]));
    rig.boot();
    rig.cycle();
    assert!(rig.sink.has(&AppEvent::Woke(WakeCause::Interrupt {
        pin: Some(RESET_GPIO)
    })));
}
