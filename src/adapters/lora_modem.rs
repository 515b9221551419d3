//! LoRaWAN modem adapter (AT command set over a UART).
//!
//! Implements [`NetworkPort`] for a RUI3-style module (RAK3172 family).
//! The modem runs the whole LoRaWAN stack; this adapter only speaks its
//! line protocol:
//!
//! ```text
//!  ControlLoop ──▶ LoraModem ──AT+SEND=1:03E5\r\n──▶ ModemTransport ──▶ UART
//!                      ▲                                    │
//!                      └── OK / AT_*_ERROR / +EVT:... ◀─────┘
//! ```
//!
//! Every command is answered by `OK` or an `AT_..._ERROR` line.  Join and
//! send complete asynchronously with a `+EVT:` line, which the adapter
//! waits for with a bounded timeout.

use core::fmt::Write as _;

use log::{debug, info, warn};

use crate::app::ports::{JoinMode, NetworkCredentials, NetworkError, NetworkPort};

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Plain command round trip.
pub const COMMAND_TIMEOUT_MS: u32 = 1_000;
/// Join request including the modem's own retries.
pub const JOIN_TIMEOUT_MS: u32 = 45_000;
/// Uplink plus both receive windows.
pub const SEND_TIMEOUT_MS: u32 = 10_000;

/// Longest line the modem emits that we care about.
pub const LINE_CAPACITY: usize = 96;

type Command = heapless::String<64>;
type Value = heapless::String<32>;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Byte-line link to the modem.
pub trait ModemTransport {
    /// Send one command.  The transport appends the line terminator.
    fn send_line(&mut self, line: &str) -> Result<(), NetworkError>;

    /// Read one line into `buf`, terminator stripped.  `Ok(None)` when
    /// nothing complete arrived within `timeout_ms`.
    fn read_line(&mut self, buf: &mut [u8], timeout_ms: u32)
    -> Result<Option<usize>, NetworkError>;
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Asynchronous notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemEvent {
    Joined,
    JoinFailed,
    /// Unconfirmed uplink left the radio.
    TxDone,
    /// Confirmed uplink finished; `true` when the network acknowledged it.
    SendConfirmed(bool),
}

/// One classified modem line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response<'a> {
    Ok,
    Error(NetworkError),
    /// Query answer `AT+KEY=value`.
    Value(&'a str),
    Event(ModemEvent),
    /// Echo, banner, blank or anything unrecognised.
    Other,
}

/// Classify a single line.  Never panics on arbitrary input.
pub fn parse_line(raw: &[u8]) -> Response<'_> {
    let Ok(text) = core::str::from_utf8(raw) else {
        return Response::Other;
    };
    let line = text.trim();

    match line {
        "OK" => return Response::Ok,
        "AT_NO_NETWORK_JOINED" => return Response::Error(NetworkError::NotJoined),
        "+EVT:JOINED" => return Response::Event(ModemEvent::Joined),
        "+EVT:TX_DONE" => return Response::Event(ModemEvent::TxDone),
        "+EVT:SEND_CONFIRMED_OK" => return Response::Event(ModemEvent::SendConfirmed(true)),
        _ => {}
    }

    if line.starts_with("AT_") && line.ends_with("ERROR") {
        return Response::Error(NetworkError::Rejected);
    }
    if line.starts_with("+EVT:JOIN_FAILED") {
        return Response::Event(ModemEvent::JoinFailed);
    }
    if line.starts_with("+EVT:SEND_CONFIRMED_FAILED") {
        return Response::Event(ModemEvent::SendConfirmed(false));
    }
    match line.strip_prefix("AT+").and_then(|rest| rest.split_once('=')) {
        Some((_, value)) => Response::Value(value),
        None => Response::Other,
    }
}

fn push_hex(out: &mut Command, bytes: &[u8]) -> Result<(), NetworkError> {
    for b in bytes {
        write!(out, "{:02X}", b).map_err(|_| NetworkError::Protocol)?;
    }
    Ok(())
}

fn command(args: core::fmt::Arguments<'_>) -> Result<Command, NetworkError> {
    let mut cmd = Command::new();
    cmd.write_fmt(args).map_err(|_| NetworkError::Protocol)?;
    Ok(cmd)
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// [`NetworkPort`] over an AT modem.
pub struct LoraModem<T: ModemTransport> {
    transport: T,
    app_port: u8,
    confirmed: bool,
    line: [u8; LINE_CAPACITY],
}

impl<T: ModemTransport> LoraModem<T> {
    pub fn new(transport: T, app_port: u8) -> Self {
        Self {
            transport,
            app_port,
            confirmed: false,
            line: [0; LINE_CAPACITY],
        }
    }

    /// Give the transport back (tests inspect what was sent).
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Send `cmd` and wait for its final `OK`/error, returning any query
    /// value seen on the way.
    fn exchange(&mut self, cmd: &str) -> Result<Option<Value>, NetworkError> {
        debug!("modem <- {}", cmd);
        self.transport.send_line(cmd)?;

        let mut value = None;
        loop {
            let Some(n) = self.transport.read_line(&mut self.line, COMMAND_TIMEOUT_MS)? else {
                warn!("modem: no answer to {}", cmd);
                return Err(NetworkError::Timeout);
            };
            match parse_line(&self.line[..n]) {
                Response::Ok => return Ok(value),
                Response::Error(e) => {
                    debug!("modem -> error for {}: {}", cmd, e);
                    return Err(e);
                }
                Response::Value(v) => {
                    let mut owned = Value::new();
                    owned.push_str(v).map_err(|_| NetworkError::Protocol)?;
                    value = Some(owned);
                }
                Response::Event(ev) => debug!("modem -> stray event {:?}", ev),
                Response::Other => {}
            }
        }
    }

    fn set(&mut self, args: core::fmt::Arguments<'_>) -> Result<(), NetworkError> {
        let cmd = command(args)?;
        self.exchange(&cmd).map(|_| ())
    }

    /// Wait for the first event `decide` has an opinion on.
    fn await_event(
        &mut self,
        timeout_ms: u32,
        decide: impl Fn(ModemEvent) -> Option<Result<(), NetworkError>>,
    ) -> Result<(), NetworkError> {
        loop {
            let Some(n) = self.transport.read_line(&mut self.line, timeout_ms)? else {
                return Err(NetworkError::Timeout);
            };
            if let Response::Event(ev) = parse_line(&self.line[..n]) {
                debug!("modem -> {:?}", ev);
                if let Some(outcome) = decide(ev) {
                    return outcome;
                }
            }
        }
    }
}

impl<T: ModemTransport> NetworkPort for LoraModem<T> {
    fn is_joined(&mut self) -> bool {
        matches!(self.exchange("AT+NJS=?"), Ok(Some(v)) if v.as_str() == "1")
    }

    fn join(&mut self) -> Result<(), NetworkError> {
        // join now, no auto-join, 10 s retry period, 8 attempts
        self.exchange("AT+JOIN=1:0:10:8")?;
        self.await_event(JOIN_TIMEOUT_MS, |ev| match ev {
            ModemEvent::Joined => Some(Ok(())),
            ModemEvent::JoinFailed => Some(Err(NetworkError::JoinDenied)),
            _ => None,
        })?;
        info!("modem: joined");
        Ok(())
    }

    fn transmit(&mut self, payload: &[u8]) -> Result<(), NetworkError> {
        let mut cmd = command(format_args!("AT+SEND={}:", self.app_port))?;
        push_hex(&mut cmd, payload)?;
        self.exchange(&cmd)?;

        let confirmed = self.confirmed;
        self.await_event(SEND_TIMEOUT_MS, |ev| match ev {
            ModemEvent::TxDone if !confirmed => Some(Ok(())),
            ModemEvent::SendConfirmed(true) => Some(Ok(())),
            ModemEvent::SendConfirmed(false) => Some(Err(NetworkError::Timeout)),
            _ => None,
        })
    }

    /// The session lives in the modem, which stays powered through every
    /// MCU sleep depth.  Nothing to write.
    fn save_session(&mut self) -> Result<(), NetworkError> {
        Ok(())
    }

    fn restore_session(&mut self) -> Result<(), NetworkError> {
        if self.is_joined() {
            Ok(())
        } else {
            Err(NetworkError::NotJoined)
        }
    }

    fn set_data_rate(&mut self, rate: u8) -> Result<(), NetworkError> {
        self.set(format_args!("AT+DR={}", rate))
    }

    fn set_duty_cycle_enforced(&mut self, enforced: bool) -> Result<(), NetworkError> {
        self.set(format_args!("AT+DCS={}", u8::from(enforced)))
    }

    fn reset_config(&mut self) -> Result<(), NetworkError> {
        self.exchange("ATR").map(|_| ())
    }

    fn reset_session(&mut self) -> Result<(), NetworkError> {
        // Re-selecting LoRaWAN work mode restarts the MAC and drops the session.
        self.exchange("AT+NWM=1").map(|_| ())
    }

    fn set_join_mode(&mut self, mode: JoinMode) -> Result<(), NetworkError> {
        let njm = match mode {
            JoinMode::Otaa => 1,
        };
        self.set(format_args!("AT+NJM={}", njm))
    }

    fn set_credentials(&mut self, credentials: &NetworkCredentials) -> Result<(), NetworkError> {
        if let Some(dev_eui) = credentials.dev_eui {
            let mut cmd = command(format_args!("AT+DEVEUI="))?;
            push_hex(&mut cmd, &dev_eui)?;
            self.exchange(&cmd)?;
        }

        let mut cmd = command(format_args!("AT+APPEUI="))?;
        push_hex(&mut cmd, &credentials.join_eui)?;
        self.exchange(&cmd)?;

        let mut cmd = command(format_args!("AT+APPKEY="))?;
        push_hex(&mut cmd, &credentials.app_key)?;
        self.exchange(&cmd)?;

        // Sub-band 0 keeps the region's default channel mask.
        if credentials.frequency_sub_band > 0 {
            let mask = 1u16 << (credentials.frequency_sub_band - 1);
            self.set(format_args!("AT+MASK={:04X}", mask))?;
        }

        self.set(format_args!(
            "AT+PNM={}",
            u8::from(credentials.public_network)
        ))?;
        self.set(format_args!(
            "AT+CFM={}",
            u8::from(credentials.confirmed_uplinks)
        ))?;
        self.confirmed = credentials.confirmed_uplinks;
        Ok(())
    }

    fn set_adr(&mut self, enabled: bool) -> Result<(), NetworkError> {
        self.set(format_args!("AT+ADR={}", u8::from(enabled)))
    }

    /// Parameters are written to the modem's flash as they are set.
    fn save_config(&mut self) -> Result<(), NetworkError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ESP32 UART transport
// ---------------------------------------------------------------------------

#[cfg(target_os = "espidf")]
pub use uart::UartTransport;

#[cfg(target_os = "espidf")]
mod uart {
    use std::time::{Duration, Instant};

    use esp_idf_hal::delay::TickType;
    use esp_idf_hal::uart::UartDriver;

    use super::{ModemTransport, NetworkError};

    /// [`ModemTransport`] on an ESP-IDF UART driver.
    pub struct UartTransport {
        uart: UartDriver<'static>,
    }

    impl UartTransport {
        pub fn new(uart: UartDriver<'static>) -> Self {
            Self { uart }
        }
    }

    impl ModemTransport for UartTransport {
        fn send_line(&mut self, line: &str) -> Result<(), NetworkError> {
            self.uart
                .write(line.as_bytes())
                .and_then(|_| self.uart.write(b"\r\n"))
                .map(|_| ())
                .map_err(|_| NetworkError::Io)
        }

        fn read_line(
            &mut self,
            buf: &mut [u8],
            timeout_ms: u32,
        ) -> Result<Option<usize>, NetworkError> {
            let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
            let mut len = 0;
            let mut byte = [0u8; 1];
            loop {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                let wait = TickType::from(deadline - now).ticks();
                match self.uart.read(&mut byte, wait) {
                    Ok(0) => continue,
                    Ok(_) => {}
                    Err(_) => return Err(NetworkError::Io),
                }
                match byte[0] {
                    b'\n' if len > 0 => return Ok(Some(len)),
                    b'\n' | b'\r' => {}
                    // Overlong lines are truncated; the tail is dropped.
                    b if len < buf.len() => {
                        buf[len] = b;
                        len += 1;
                    }
                    _ => {}
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
