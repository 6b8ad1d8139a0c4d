//! Timer input-capture abstraction
//!
//! Defines the interface a hardware timer with an input-capture unit has to
//! provide: a free-running 16-bit counter, a capture register that latches the
//! counter on a qualifying signal edge, and a single-slot client that is told
//! about each capture. Edge-phase sequencing (rising-then-falling protocols)
//! deliberately does not live here; that belongs to the sensor layer.

use core::cell::Cell;

use critical_section::Mutex;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// Clock prescaler feeding the capture counter.
///
/// Mirrors the clock-select options of a classic 16-bit timer: the counter
/// ticks at the timer base frequency divided by the selected divisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Prescaler {
    /// No clock source, counter halted
    Off,
    /// Base frequency, undivided
    Div1,
    /// Base frequency / 8
    Div8,
    /// Base frequency / 64
    Div64,
    /// Base frequency / 256
    Div256,
    /// Base frequency / 1024
    Div1024,
}

impl Prescaler {
    /// Divisor applied to the timer base frequency, or `None` when the
    /// counter is halted.
    pub const fn divisor(self) -> Option<u32> {
        match self {
            Prescaler::Off => None,
            Prescaler::Div1 => Some(1),
            Prescaler::Div8 => Some(8),
            Prescaler::Div64 => Some(64),
            Prescaler::Div256 => Some(256),
            Prescaler::Div1024 => Some(1024),
        }
    }
}

/// Signal transition that qualifies for the next capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EdgePolarity {
    Rising,
    Falling,
}

/// Capture unit configuration, set once at [`CaptureTimer::init`].
///
/// Immutable until re-init, with one exception: the active edge polarity may
/// be toggled at runtime through [`CaptureTimer::set_edge_polarity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CaptureConfig {
    pub prescaler: Prescaler,
    pub polarity: EdgePolarity,
}

/// Receiver of capture events.
///
/// `edge_captured` runs synchronously in the timing-critical interrupt
/// context: it must not block, must not allocate, and must complete in
/// bounded, short time. `ticks` is the counter value latched at the instant
/// of the edge.
pub trait CaptureClient: Sync {
    fn edge_captured(&self, ticks: u16);
}

/// Hardware timer with input-capture support.
///
/// All methods take `&self`: implementations rely on interior mutability so
/// that a client may reconfigure the unit (typically flip the edge polarity)
/// from within its own `edge_captured` dispatch.
///
/// # Capture contract
///
/// Each qualifying edge latches the counter into the capture register and
/// invokes the registered client exactly once, synchronously, before control
/// returns. There is no event queue: with a single capture register, a client
/// that overruns the time to the next edge loses that edge's data.
pub trait CaptureTimer<'a> {
    /// Configure the capture input, prescaler and initial edge polarity,
    /// reset counter and capture register to 0 and enable the capture
    /// interrupt. Re-init fully overwrites prior state.
    fn init(&self, config: CaptureConfig);

    /// Register `client` for capture events, replacing any prior
    /// registration.
    fn set_client(&self, client: &'a dyn CaptureClient);

    /// Select which transition triggers the *next* capture. Takes effect
    /// immediately.
    fn set_edge_polarity(&self, polarity: EdgePolarity);

    /// Counter value latched at the most recent capture.
    fn capture_value(&self) -> u16;

    /// Reset the free-running counter to 0 without disabling capture.
    fn clear_counter(&self);

    /// Disable the capture interrupt and zero all registers and config.
    fn deinit(&self);
}

/// Single-slot client registration.
///
/// Holds at most one [`CaptureClient`]; registering a new one silently
/// discards the prior registration. Back-end implementations embed one of
/// these and call [`dispatch`](ClientSlot::dispatch) from their capture
/// interrupt handler.
pub struct ClientSlot<'a> {
    client: Mutex<Cell<Option<&'a dyn CaptureClient>>>,
}

impl<'a> ClientSlot<'a> {
    /// Create an empty slot.
    pub const fn new() -> Self {
        Self {
            client: Mutex::new(Cell::new(None)),
        }
    }

    /// Atomically replace the registered client. Last registration wins.
    pub fn replace(&self, client: &'a dyn CaptureClient) {
        critical_section::with(|cs| self.client.borrow(cs).set(Some(client)));
    }

    /// Drop the current registration, if any.
    pub fn clear(&self) {
        critical_section::with(|cs| self.client.borrow(cs).set(None));
    }

    /// Invoke the registered client with the latched counter value.
    ///
    /// The client reference is copied out under the critical section and the
    /// call itself is made outside of it, so the client is free to take
    /// critical sections of its own.
    pub fn dispatch(&self, ticks: u16) {
        let client = critical_section::with(|cs| self.client.borrow(cs).get());
        if let Some(client) = client {
            client.edge_captured(ticks);
        }
    }
}

impl Default for ClientSlot<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingClient {
        calls: AtomicUsize,
        last_ticks: AtomicUsize,
    }

    impl CountingClient {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                last_ticks: AtomicUsize::new(0),
            }
        }
    }

    impl CaptureClient for CountingClient {
        fn edge_captured(&self, ticks: u16) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last_ticks.store(ticks as usize, Ordering::SeqCst);
        }
    }

    #[test]
    fn prescaler_divisors() {
        assert_eq!(Prescaler::Off.divisor(), None);
        assert_eq!(Prescaler::Div1.divisor(), Some(1));
        assert_eq!(Prescaler::Div8.divisor(), Some(8));
        assert_eq!(Prescaler::Div64.divisor(), Some(64));
        assert_eq!(Prescaler::Div256.divisor(), Some(256));
        assert_eq!(Prescaler::Div1024.divisor(), Some(1024));
    }

    #[test]
    fn empty_slot_dispatch_is_a_no_op() {
        let slot = ClientSlot::new();
        slot.dispatch(42);
    }

    #[test]
    fn dispatch_reaches_registered_client() {
        let slot = ClientSlot::new();
        let client = CountingClient::new();
        slot.replace(&client);

        slot.dispatch(1234);

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.last_ticks.load(Ordering::SeqCst), 1234);
    }

    #[test]
    fn replacement_silences_prior_client() {
        let slot = ClientSlot::new();
        let first = CountingClient::new();
        let second = CountingClient::new();

        slot.replace(&first);
        slot.replace(&second);
        slot.dispatch(7);

        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleared_slot_stops_dispatching() {
        let slot = ClientSlot::new();
        let client = CountingClient::new();

        slot.replace(&client);
        slot.clear();
        slot.dispatch(7);

        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }
}
