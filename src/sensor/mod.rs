//! Ultrasonic ranging state machine
//!
//! Drives the trigger-then-listen protocol of an HC-SR04 class sensor on top
//! of the [`capture`](crate::capture) abstraction and produces distance
//! readings in centimeters.
//!
//! # Protocol
//! - Arm a fresh measurement session and clear the capture counter
//! - Hold the trigger pin high for ≥10µs to start the ultrasonic burst
//! - The echo pin goes high while the sensor listens; the rising edge is
//!   captured, polarity is flipped, and the falling edge ends the pulse
//! - Pulse width in timer ticks is converted to centimeters, halved for the
//!   round trip
//!
//! # Split
//! [`EchoSequencer`] is the interrupt-side half: it is registered as the
//! capture client and owns the session state. [`Ranger`] is the main-line
//! half: it owns the trigger pin and awaits the completed width under a
//! timeout, so a missing echo yields [`Reading::OutOfRange`] instead of a
//! hang.

use core::cell::Cell;
use core::fmt;

use critical_section::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration, Timer};
use embedded_hal::digital::OutputPin;

use crate::capture::{CaptureClient, CaptureConfig, CaptureTimer, EdgePolarity, Prescaler};

pub mod convert;

/// Minimum trigger pulse width required by the sensor protocol.
const TRIGGER_PULSE: Duration = Duration::from_micros(10);

/// Default echo timeout, the datasheet-recommended upper bound on one
/// measurement cycle.
pub const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_millis(60);

/// Edge the session is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    WaitingForRisingEdge,
    WaitingForFallingEdge,
}

/// One distance reading.
///
/// A missing echo (object absent or beyond range) is an expected outcome and
/// is reported as data, not as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reading {
    /// Distance to the nearest object, in centimeters
    Distance(u16),
    /// No echo arrived within the timeout window
    OutOfRange,
}

impl Reading {
    /// Distance in centimeters, or `None` when out of range.
    pub fn distance_cm(self) -> Option<u16> {
        match self {
            Reading::Distance(cm) => Some(cm),
            Reading::OutOfRange => None,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Distance(cm) => write!(f, "{cm} cm"),
            Reading::OutOfRange => f.write_str("out of range"),
        }
    }
}

/// Rejected ranger configuration.
///
/// Typed enums already rule out the invalid raw values the hardware registers
/// would accept; what remains rejectable is a configuration under which no
/// measurement could ever complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// [`Prescaler::Off`] halts the counter; nothing can be timed
    ClockStopped,
    /// `timer_hz / divisor` floors to zero ticks per second
    TickRateUnderflow,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ClockStopped => f.write_str("prescaler halts the capture counter"),
            ConfigError::TickRateUnderflow => f.write_str("tick rate floors to zero"),
        }
    }
}

/// Ranger configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RangerConfig {
    /// Capture counter prescaler
    pub prescaler: Prescaler,
    /// Base frequency of the capture timer, in Hz
    pub timer_hz: u32,
    /// Upper bound on the wait for a complete echo pulse
    pub echo_timeout: Duration,
}

impl Default for RangerConfig {
    /// The classic arrangement: 8MHz timer, /8 prescaler for a 1µs tick,
    /// datasheet timeout.
    fn default() -> Self {
        Self {
            prescaler: Prescaler::Div8,
            timer_hz: 8_000_000,
            echo_timeout: DEFAULT_ECHO_TIMEOUT,
        }
    }
}

/// Interrupt-side half of the ranging protocol.
///
/// Registered as the capture client; sequences rising-then-falling edge
/// detection and hands the completed pulse width to the awaiting reader.
/// Session fields are single-writer (capture context) / single-reader (main
/// line); the width signal is written last so a reader that observes it sees
/// a consistent snapshot.
pub struct EchoSequencer<'a, C: CaptureTimer<'a>> {
    capture: &'a C,
    phase: Mutex<Cell<Phase>>,
    start_tick: Mutex<Cell<u16>>,
    width: Signal<CriticalSectionRawMutex, u16>,
}

impl<'a, C: CaptureTimer<'a> + Sync> EchoSequencer<'a, C> {
    pub const fn new(capture: &'a C) -> Self {
        Self {
            capture,
            phase: Mutex::new(Cell::new(Phase::WaitingForRisingEdge)),
            start_tick: Mutex::new(Cell::new(0)),
            width: Signal::new(),
        }
    }

    /// Register this sequencer as the capture client, replacing any prior
    /// registration, then initialize the capture timer. Registration comes
    /// first so no edge can be dispatched into an empty slot.
    fn attach(&'a self, config: CaptureConfig) {
        self.capture.set_client(self);
        self.capture.init(config);
    }

    /// Start a fresh measurement session.
    ///
    /// Resets the edge phase, discards any stale width, restores rising
    /// polarity and clears the counter, so the upcoming width is simply the
    /// falling-edge tick minus the rising-edge tick.
    fn arm(&self) {
        critical_section::with(|cs| {
            self.phase.borrow(cs).set(Phase::WaitingForRisingEdge);
            self.start_tick.borrow(cs).set(0);
        });
        self.width.reset();
        self.capture.set_edge_polarity(EdgePolarity::Rising);
        self.capture.clear_counter();
    }

    /// Wait for the falling edge to complete the pulse.
    async fn pulse_width(&self) -> u16 {
        self.width.wait().await
    }

    /// Disable the capture timer.
    fn shutdown(&self) {
        self.capture.deinit();
    }
}

impl<'a, C: CaptureTimer<'a> + Sync> CaptureClient for EchoSequencer<'a, C> {
    /// Runs in capture interrupt context. Nothing in here may block,
    /// allocate or fail outward; an edge that does not fit the protocol is
    /// absorbed by the next [`arm`](Self::arm).
    fn edge_captured(&self, ticks: u16) {
        let phase = critical_section::with(|cs| {
            let phase = self.phase.borrow(cs).get();
            match phase {
                Phase::WaitingForRisingEdge => {
                    self.start_tick.borrow(cs).set(ticks);
                    self.phase.borrow(cs).set(Phase::WaitingForFallingEdge);
                }
                Phase::WaitingForFallingEdge => {
                    self.phase.borrow(cs).set(Phase::WaitingForRisingEdge);
                }
            }
            phase
        });

        match phase {
            Phase::WaitingForRisingEdge => {
                // Echo pulse has started; the next qualifying edge is its end.
                self.capture.set_edge_polarity(EdgePolarity::Falling);
            }
            Phase::WaitingForFallingEdge => {
                self.capture.set_edge_polarity(EdgePolarity::Rising);
                let start = critical_section::with(|cs| self.start_tick.borrow(cs).get());
                // Counter was cleared at arm, so this cannot have wrapped
                // within a sane tick rate; wrapping keeps slower ticks sound.
                self.width.signal(ticks.wrapping_sub(start));
            }
        }
    }
}

/// Ultrasonic ranging driver.
///
/// Owns the trigger pin and the main-line side of the measurement protocol.
/// `read_distance` takes `&mut self`, so overlapping sessions are rejected at
/// compile time rather than at runtime.
pub struct Ranger<'a, C: CaptureTimer<'a>, TRIG: OutputPin> {
    sequencer: &'a EchoSequencer<'a, C>,
    trigger: TRIG,
    tick_hz: u32,
    config: RangerConfig,
}

impl<'a, C: CaptureTimer<'a> + Sync, TRIG: OutputPin> Ranger<'a, C, TRIG> {
    /// Create a driver from a sequencer, the trigger output pin and a
    /// configuration.
    ///
    /// Validates that the configuration yields a usable tick rate and forces
    /// the trigger pin low so every session starts from a known level.
    pub fn new(
        sequencer: &'a EchoSequencer<'a, C>,
        mut trigger: TRIG,
        config: RangerConfig,
    ) -> Result<Self, ConfigError> {
        let divisor = config.prescaler.divisor().ok_or(ConfigError::ClockStopped)?;
        let tick_hz = config.timer_hz / divisor;
        if tick_hz == 0 {
            return Err(ConfigError::TickRateUnderflow);
        }
        trigger.set_low().ok();
        Ok(Self {
            sequencer,
            trigger,
            tick_hz,
            config,
        })
    }

    /// Initialize the capture timer and register the sequencer for capture
    /// events. Initial polarity is rising: the first qualifying edge of a
    /// session is the start of the echo pulse.
    pub fn init(&mut self) {
        self.sequencer.attach(CaptureConfig {
            prescaler: self.config.prescaler,
            polarity: EdgePolarity::Rising,
        });
    }

    /// Measure the distance to the nearest object.
    ///
    /// Synchronous from the caller's view: returns once the echo pulse has
    /// been timed, or [`Reading::OutOfRange`] once the echo timeout elapses.
    /// Never hangs on a missing echo.
    pub async fn read_distance(&mut self) -> Reading {
        self.sequencer.arm();
        self.send_trigger().await;
        match with_timeout(self.config.echo_timeout, self.sequencer.pulse_width()).await {
            Ok(width) => Reading::Distance(convert::pulse_to_cm(width, self.tick_hz)),
            Err(_) => Reading::OutOfRange,
        }
    }

    /// Disable the capture timer and park the trigger pin low.
    pub fn deinit(&mut self) {
        self.sequencer.shutdown();
        self.trigger.set_low().ok();
    }

    /// Drive the trigger output high for at least [`TRIGGER_PULSE`], then
    /// low, starting an ultrasonic burst.
    async fn send_trigger(&mut self) {
        self.trigger.set_high().ok();
        Timer::after(TRIGGER_PULSE).await;
        self.trigger.set_low().ok();
    }
}
