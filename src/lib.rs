//! Ultrasonic echo-ranging driver
//!
//! Measures the distance to a nearby object with an HC-SR04 class ultrasonic
//! sensor: a trigger pulse starts the burst, a hardware timer's input-capture
//! unit timestamps the echo pulse's rising and falling edges, and the pulse
//! width is converted into whole centimeters.
//!
//! # Layout
//! - [`capture`]: the input-capture abstraction hardware back-ends implement,
//!   plus a software mock back-end for host tests (feature `mock`)
//! - [`sensor`]: the trigger-then-listen state machine and the public
//!   [`Ranger`] driver
//!
//! # Sensor operation
//! - Trigger pin held high for ≥10µs to start an ultrasonic burst
//! - Echo pin timed exclusively through the capture hardware, never polled
//! - Distance reported in centimeters, or [`Reading::OutOfRange`] when no
//!   echo returns within the timeout window
//!
//! # Concurrency model
//! One main line of control plus one interrupt source. Capture events are
//! produced in interrupt context and consumed by the awaiting reader; shared
//! session state sits behind brief critical sections and the completed pulse
//! width is handed over through a signal written last, so a reader that
//! observes it sees a consistent snapshot.

#![cfg_attr(not(test), no_std)]

pub mod capture;
pub mod sensor;

pub use capture::{CaptureClient, CaptureConfig, CaptureTimer, EdgePolarity, Prescaler};
pub use sensor::{convert::pulse_to_cm, ConfigError, EchoSequencer, Ranger, RangerConfig, Reading};
