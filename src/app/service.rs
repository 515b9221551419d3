//! Control loop: the hexagonal core.
//!
//! [`ControlLoop`] owns the state machine, the sleep scheduler and the
//! loop-side view of the interrupt-shared state.  Every collaborator is a
//! port trait passed in at the call site, so the whole loop runs against
//! the mocks in `tests/`.
//!
//! ```text
//!  PlatformPort ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!                   │         ControlLoop          │
//!  NetworkPort  ◀──▶│  FSM · SleepScheduler        │
//!                   │  battery · payload           │
//!  CounterStore ◀──▶└──────────────────────────────┘
//!                              ▲ drain()
//!                   SharedState (ISR-written atomics)
//! ```
//!
//! One call to [`ControlLoop::run_cycle`] is one wake: recover missed
//! edges, drain latches, report if due, sleep.  Failures from any port are
//! logged once, emitted as [`AppEvent::Failure`] and otherwise ignored.

use log::{debug, info, warn};

use crate::battery;
use crate::config::DeviceConfig;
use crate::error::Error;
use crate::events::{EdgeHandler, PendingEvents, SharedState};
use crate::fsm::context::FsmContext;
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, StateId};
use crate::payload;
use crate::pins;
use crate::scheduler::{SleepScheduler, WakeCause};

use super::events::AppEvent;
use super::ports::{
    CounterStorePort, EventSink, JoinMode, NetworkCredentials, NetworkPort, PlatformPort,
    RetainedState,
};

// ───────────────────────────────────────────────────────────────
// ControlLoop
// ───────────────────────────────────────────────────────────────

/// The power-aware event loop.
pub struct ControlLoop {
    fsm: Fsm,
    ctx: FsmContext,
    config: DeviceConfig,
    credentials: NetworkCredentials,
    scheduler: SleepScheduler,
    shared: &'static SharedState,
    /// Reporting period in force (already clamped on cold boot).
    interval_secs: u32,
    /// Clock reading taken right after the most recent wake.
    woke_at: u64,
    /// `None` after a cold boot and whenever nothing survived a volatile
    /// wake.
    next_deadline: Option<u64>,
    /// Cause of the wake this cycle is processing.
    wake_cause: WakeCause,
    /// Dispense input level sampled as the wake sources were armed.
    dispense_high: bool,
    /// A battery trip was latched but no accepted uplink has carried it.
    low_pending: bool,
    /// Count last written to the store; the live count is dirty when it
    /// differs.
    persisted_remaining: u32,
    /// Battery alert state last written to the store.
    persisted_alert: bool,
}

impl ControlLoop {
    /// Construct the loop from configuration and the shared interrupt state.
    ///
    /// Does **not** touch any port; call [`boot`](Self::boot) next.
    pub fn new(config: DeviceConfig, shared: &'static SharedState) -> Self {
        let scheduler =
            SleepScheduler::new(config.min_sleep_secs, config.wake_source, config.sleep_depth);
        let fsm = Fsm::new(build_state_table(), StateId::AwakeProcessing);

        Self {
            fsm,
            ctx: FsmContext::default(),
            interval_secs: config.default_tx_interval_secs,
            persisted_remaining: shared.remaining(),
            persisted_alert: shared.battery_low(),
            credentials: NetworkCredentials::from_config(&config),
            config,
            scheduler,
            shared,
            woke_at: 0,
            next_deadline: None,
            wake_cause: WakeCause::PowerOn,
            dispense_high: false,
            low_pending: false,
        }
    }

    /// Provision with `credentials` instead of the ones in the config
    /// (e.g. a DevEUI derived from the factory MAC).
    pub fn with_credentials(mut self, credentials: NetworkCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// One-time startup.
    ///
    /// Cold boot provisions the network stack and clamps the reporting
    /// interval; a warm boot restores the saved session instead.  Both load
    /// the counters from the store and attach the edge handlers, which are
    /// only armed once the shared state holds the stored values.
    pub fn boot(
        &mut self,
        net: &mut impl NetworkPort,
        store: &mut impl CounterStorePort,
        platform: &mut impl PlatformPort,
        sink: &mut impl EventSink,
    ) {
        platform.set_awake_indicator(true);
        self.wake_cause = platform.boot_wake_cause();
        let warm = self.wake_cause != WakeCause::PowerOn;

        self.load_counters(store, sink);
        self.interval_secs = match store.interval_secs(self.config.default_tx_interval_secs) {
            Ok(secs) => secs,
            Err(_) => {
                self.fail(Error::Persistence("interval load"), sink);
                self.config.default_tx_interval_secs
            }
        };

        if warm {
            info!("Warm wake ({:?}): restoring network session", self.wake_cause);
            if net.restore_session().is_err() {
                self.fail(Error::Persistence("session restore"), sink);
            }
        } else {
            self.clamp_interval(store, sink);
            self.provision(net, platform, sink);
        }

        self.register_handlers(platform, sink);

        self.fsm.start(&mut self.ctx);
        self.woke_at = platform.monotonic_secs();
        if warm {
            self.restore_retained(&*platform);
        }

        info!(
            "ControlLoop started: warm={} remaining={} interval={}s depth={:?} wake={:?}",
            warm,
            self.shared.remaining(),
            self.interval_secs,
            self.scheduler.depth(),
            self.scheduler.wake_source()
        );
        sink.emit(&AppEvent::Started {
            warm,
            remaining: self.shared.remaining(),
            interval_secs: self.interval_secs,
        });
    }

    // ── Per-wake orchestration ────────────────────────────────

    /// Process one wake and go back to sleep.
    ///
    /// Returns when the platform's sleep call returns, with the loop back in
    /// `AwakeProcessing`.  On hardware a volatile sleep never returns.
    pub fn run_cycle(
        &mut self,
        net: &mut impl NetworkPort,
        store: &mut impl CounterStorePort,
        platform: &mut impl PlatformPort,
        sink: &mut impl EventSink,
    ) {
        // 1. AWAKE_PROCESSING: settle what happened while asleep
        let timer_wake = self.wake_cause == WakeCause::Timer;
        self.recover_missed_edges(platform);
        let pending = self.shared.latches.drain();
        self.low_pending |= pending.low_battery;
        let now = platform.monotonic_secs();
        self.ctx.pending = pending;
        self.ctx.deadline_elapsed =
            timer_wake || self.scheduler.deadline_elapsed(now, self.next_deadline);

        if pending.dispense {
            sink.emit(&AppEvent::DispenseCounted {
                remaining: self.shared.remaining(),
            });
        }
        self.flush_counter(store, sink);

        // 2. Decide: fast path or report
        let duration = match self.step(sink) {
            StateId::Transmitting => {
                self.report(pending, net, store, platform, sink);
                self.ctx.report_done = true;
                self.step(sink);

                self.next_deadline =
                    Some(self.scheduler.next_deadline(self.woke_at, self.interval_secs));

                if !self.scheduler.depth().retains_memory() {
                    debug!("Saving network session before volatile sleep");
                    if net.save_session().is_err() {
                        self.fail(Error::Persistence("session save"), sink);
                    }
                }
                let elapsed = platform.monotonic_secs().saturating_sub(self.woke_at);
                self.scheduler.sleep_duration(self.interval_secs, elapsed)
            }
            _ => {
                // The FSM only skips the report while a deadline is known.
                let deadline = self.next_deadline.unwrap_or(now);
                let secs = self
                    .scheduler
                    .remaining_until(platform.monotonic_secs(), deadline);
                debug!("No report due, back to sleep for {}s", secs);
                secs
            }
        };

        // 3. SLEEPING
        self.sleep(duration, net, store, platform, sink);
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> StateId {
        self.fsm.current_state()
    }

    /// Live dispenses-remaining value.
    pub fn remaining(&self) -> u32 {
        self.shared.remaining()
    }

    pub fn interval_secs(&self) -> u32 {
        self.interval_secs
    }

    /// Absolute deadline of the next report, if known.
    pub fn next_deadline(&self) -> Option<u64> {
        self.next_deadline
    }

    /// Awake cycles entered since boot.
    pub fn cycles(&self) -> u64 {
        self.ctx.cycles
    }

    /// Report attempts since boot, successful or not.
    pub fn reports(&self) -> u64 {
        self.ctx.reports
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    // ── Internal: boot ────────────────────────────────────────

    fn load_counters(&mut self, store: &mut impl CounterStorePort, sink: &mut impl EventSink) {
        let full = self.config.full_count;
        let remaining = match store.remaining_count(full) {
            Ok(n) => n,
            Err(_) => {
                self.fail(Error::Persistence("counter load"), sink);
                full
            }
        };
        let alert = match store.battery_alert() {
            Ok(low) => low,
            Err(_) => {
                self.fail(Error::Persistence("battery state load"), sink);
                false
            }
        };
        self.shared.set_remaining(remaining);
        self.shared.set_battery_low(alert);
        self.persisted_remaining = remaining;
        self.persisted_alert = alert;
    }

    /// The interval ceiling only applies at cold start; a longer interval
    /// written later stays in force until the next power cycle.
    fn clamp_interval(&mut self, store: &mut impl CounterStorePort, sink: &mut impl EventSink) {
        let ceiling = self.config.tx_interval_ceiling_secs;
        if self.interval_secs <= ceiling {
            return;
        }
        info!(
            "Clamping report interval {}s to ceiling {}s",
            self.interval_secs, ceiling
        );
        self.interval_secs = ceiling;
        if store.set_interval_secs(ceiling).is_err() {
            self.fail(Error::Persistence("interval save"), sink);
        }
    }

    fn provision(
        &mut self,
        net: &mut impl NetworkPort,
        platform: &mut impl PlatformPort,
        sink: &mut impl EventSink,
    ) {
        info!("Cold boot: provisioning network stack");
        let credentials = self.credentials;

        let steps: [(&'static str, Result<(), _>); 7] = [
            ("radio config reset", net.reset_config()),
            ("session reset", net.reset_session()),
            ("join mode", net.set_join_mode(JoinMode::Otaa)),
            ("credentials", net.set_credentials(&credentials)),
            // Kept on until the first successful join.
            ("duty cycle", net.set_duty_cycle_enforced(true)),
            ("adr", net.set_adr(self.config.adr)),
            ("data rate", net.set_data_rate(self.config.data_rate)),
        ];
        for (what, result) in steps {
            if let Err(e) = result {
                warn!("Provisioning step '{}' failed: {}", what, e);
                self.fail(Error::Configuration(what), sink);
            }
        }

        if platform.set_wake_pin(pins::DISPENSE_GPIO).is_err() {
            self.fail(Error::Configuration("wake pin"), sink);
        }
        if net.save_config().is_err() {
            self.fail(Error::Configuration("radio config save"), sink);
        }
    }

    fn register_handlers(&mut self, platform: &mut impl PlatformPort, sink: &mut impl EventSink) {
        let bindings = [
            (pins::DISPENSE_GPIO, EdgeHandler::Dispense),
            (pins::RESET_GPIO, EdgeHandler::Reset),
            (pins::LOW_BATTERY_GPIO, EdgeHandler::LowBattery),
        ];
        for (pin, handler) in bindings {
            if let Err(e) = platform.register_edge_handler(pin, handler.edge(), handler, self.shared)
            {
                warn!("Edge handler {:?} on GPIO{} not attached: {}", handler, pin, e);
                self.fail(Error::Configuration("edge handler"), sink);
            }
        }
    }

    // ── Internal: cycle ───────────────────────────────────────

    /// Edges that woke the MCU may not have reached a handler (the pin
    /// triggered the wake but no ISR ran).  Re-read the level of the wake
    /// pins and synthesize the handler call when its latch is missing.
    ///
    /// A dispense input that was already high when the sleep was armed is
    /// the pulse counted before, so only a low-to-high change counts.
    fn recover_missed_edges(&mut self, platform: &mut impl PlatformPort) {
        let WakeCause::Interrupt { pin } = self.wake_cause else {
            return;
        };
        let seen = self.shared.latches.peek();
        let candidate = |p: i32| pin.is_none_or(|w| w == p);

        if candidate(pins::DISPENSE_GPIO)
            && !seen.dispense
            && !self.dispense_high
            && platform.read_pin(pins::DISPENSE_GPIO)
        {
            debug!("Dispense edge recovered from pin level");
            EdgeHandler::Dispense.fire(self.shared);
        }
        if candidate(pins::RESET_GPIO) && !seen.reset && !platform.read_pin(pins::RESET_GPIO) {
            debug!("Reset edge recovered from pin level");
            EdgeHandler::Reset.fire(self.shared);
        }
    }

    /// TRANSMITTING body: reset drain, join, compose, send.
    fn report(
        &mut self,
        pending: PendingEvents,
        net: &mut impl NetworkPort,
        store: &mut impl CounterStorePort,
        platform: &mut impl PlatformPort,
        sink: &mut impl EventSink,
    ) {
        // (a) reset wins over any decrement drained in the same cycle
        if pending.reset {
            let full = self.shared.full_count();
            self.shared.set_remaining(full);
            info!("Counter reset to {}", full);
            sink.emit(&AppEvent::CounterReset { full_count: full });
            self.flush_counter(store, sink);
        }

        match store.interval_secs(self.interval_secs) {
            Ok(secs) => self.interval_secs = secs,
            Err(_) => self.fail(Error::Persistence("interval load"), sink),
        }

        // (b) join, then lift the pre-join duty-cycle restriction
        if !net.is_joined() {
            info!("Not joined: joining network");
            match net.join() {
                Ok(()) => {
                    sink.emit(&AppEvent::Joined);
                    if net.set_duty_cycle_enforced(false).is_err() {
                        self.fail(Error::Configuration("duty cycle"), sink);
                    }
                }
                Err(e) => {
                    self.fail(Error::Join(e), sink);
                    return;
                }
            }
        }

        // (c) compose; a tripped comparator counts as low even if it has
        // recovered by now, until an uplink carrying it is accepted
        let pin_low = !platform.read_pin(pins::LOW_BATTERY_GPIO) || self.low_pending;
        let decision = battery::evaluate(pin_low, self.shared.battery_low());
        let remaining = self.shared.remaining();
        let frame = payload::compose(remaining, decision.status);

        // (d) send at the configured rate; ADR may have moved it since
        if net.set_data_rate(self.config.data_rate).is_err() {
            self.fail(Error::Configuration("data rate"), sink);
        }
        info!("Sending dispenses left {} ({:02X?})", remaining, frame.as_slice());
        match net.transmit(&frame) {
            Ok(()) => {
                self.commit_battery(decision.stored_low, store, sink);
                sink.emit(&AppEvent::ReportSent {
                    payload: frame,
                    battery: decision.status,
                });
            }
            Err(e) => self.fail(Error::Transmit(e), sink),
        }
    }

    /// Record the alert state only once the report carrying it went out, so
    /// an undelivered stable notification is sent again next time.
    fn commit_battery(
        &mut self,
        stored_low: bool,
        store: &mut impl CounterStorePort,
        sink: &mut impl EventSink,
    ) {
        self.low_pending = false;
        self.shared.set_battery_low(stored_low);
        if stored_low == self.persisted_alert {
            return;
        }
        match store.set_battery_alert(stored_low) {
            Ok(()) => self.persisted_alert = stored_low,
            Err(_) => self.fail(Error::Persistence("battery state save"), sink),
        }
    }

    fn sleep(
        &mut self,
        duration_secs: u32,
        net: &mut impl NetworkPort,
        store: &mut impl CounterStorePort,
        platform: &mut impl PlatformPort,
        sink: &mut impl EventSink,
    ) {
        self.flush_counter(store, sink);
        self.dispense_high = platform.read_pin(pins::DISPENSE_GPIO);
        platform.retain(RetainedState {
            report_deadline: self.next_deadline,
            dispense_high: self.dispense_high,
            low_pending: self.low_pending,
        });

        let request = self.scheduler.request(duration_secs);
        sink.emit(&AppEvent::Sleeping {
            secs: request.duration_secs,
            depth: request.depth,
        });
        platform.set_awake_indicator(false);
        let cause = platform.enter_low_power_mode(&request);
        platform.set_awake_indicator(true);

        self.woke_at = platform.monotonic_secs();
        self.wake_cause = cause;
        self.ctx.woke = true;
        self.step(sink);

        if !request.depth.retains_memory() {
            self.resume_volatile(net, store, &*platform, sink);
        }
        sink.emit(&AppEvent::Woke(cause));
    }

    /// Same recovery a restart out of volatile sleep performs in `boot`.
    fn resume_volatile(
        &mut self,
        net: &mut impl NetworkPort,
        store: &mut impl CounterStorePort,
        platform: &impl PlatformPort,
        sink: &mut impl EventSink,
    ) {
        if net.restore_session().is_err() {
            self.fail(Error::Persistence("session restore"), sink);
        }
        // A restart begins with empty latches; edges that woke the chip are
        // picked up from the pin levels instead.
        let _ = self.shared.latches.drain();
        self.load_counters(store, sink);
        self.restore_retained(platform);
    }

    /// Pick up the deadline, dispense level and pending battery trip kept
    /// through a volatile sleep.  With nothing kept the deadline is unknown
    /// and the next cycle reports.
    fn restore_retained(&mut self, platform: &impl PlatformPort) {
        let kept = platform.retained().unwrap_or_default();
        debug!("Retained across restart: {:?}", kept);
        self.next_deadline = kept.report_deadline;
        self.dispense_high = kept.dispense_high;
        self.low_pending = kept.low_pending;
    }

    /// Write the live count to the store if it moved since the last write.
    fn flush_counter(&mut self, store: &mut impl CounterStorePort, sink: &mut impl EventSink) {
        let remaining = self.shared.remaining();
        if remaining == self.persisted_remaining {
            return;
        }
        match store.set_remaining_count(remaining) {
            Ok(()) => self.persisted_remaining = remaining,
            Err(_) => self.fail(Error::Persistence("counter save"), sink),
        }
    }

    /// Tick the FSM and report the transition, if any.
    fn step(&mut self, sink: &mut impl EventSink) -> StateId {
        let from = self.fsm.current_state();
        let to = self.fsm.tick(&mut self.ctx);
        if to != from {
            sink.emit(&AppEvent::StateChanged { from, to });
        }
        to
    }

    fn fail(&mut self, err: Error, sink: &mut impl EventSink) {
        warn!("{}: {}", err.kind(), err);
        sink.emit(&AppEvent::Failure(err));
    }
}
