//! Software capture back-end
//!
//! Implements [`CaptureTimer`] over a hand-advanced register file so the
//! whole trigger/echo protocol can run on the host. Tests advance the counter
//! and inject edges; the mock latches and dispatches exactly like the
//! hardware contract demands: synchronously, once per qualifying edge, with
//! no queueing.

use core::cell::RefCell;

use critical_section::Mutex;

use super::{CaptureClient, CaptureConfig, CaptureTimer, ClientSlot, EdgePolarity, Prescaler};

/// Capture unit register file.
#[derive(Debug, Clone, Copy)]
struct Registers {
    config: Option<CaptureConfig>,
    counter: u16,
    capture: u16,
    irq_enabled: bool,
}

impl Registers {
    const fn reset() -> Self {
        Self {
            config: None,
            counter: 0,
            capture: 0,
            irq_enabled: false,
        }
    }
}

/// Software implementation of a capture timer.
///
/// The counter does not run on its own; tests move it with
/// [`advance`](MockCapture::advance) and raise transitions with
/// [`edge`](MockCapture::edge).
pub struct MockCapture<'a> {
    regs: Mutex<RefCell<Registers>>,
    slot: ClientSlot<'a>,
}

impl<'a> MockCapture<'a> {
    pub const fn new() -> Self {
        Self {
            regs: Mutex::new(RefCell::new(Registers::reset())),
            slot: ClientSlot::new(),
        }
    }

    /// Advance the free-running counter, wrapping at 16 bits.
    ///
    /// Has no effect while the counter is halted (unconfigured, or prescaler
    /// [`Prescaler::Off`]).
    pub fn advance(&self, ticks: u16) {
        critical_section::with(|cs| {
            let mut regs = self.regs.borrow_ref_mut(cs);
            let running = matches!(regs.config, Some(c) if c.prescaler != Prescaler::Off);
            if running {
                regs.counter = regs.counter.wrapping_add(ticks);
            }
        });
    }

    /// Inject a signal transition on the capture input.
    ///
    /// When capture is enabled and `polarity` matches the configured edge,
    /// the counter is latched into the capture register and the registered
    /// client is dispatched before this call returns. Non-qualifying edges
    /// are ignored.
    pub fn edge(&self, polarity: EdgePolarity) {
        let latched = critical_section::with(|cs| {
            let mut regs = self.regs.borrow_ref_mut(cs);
            match regs.config {
                Some(config) if regs.irq_enabled && config.polarity == polarity => {
                    regs.capture = regs.counter;
                    Some(regs.capture)
                }
                _ => None,
            }
        });
        // Dispatch outside the critical section, like a hardware interrupt
        // taken after the latch.
        if let Some(ticks) = latched {
            self.slot.dispatch(ticks);
        }
    }

    /// Current counter value (test inspection).
    pub fn counter(&self) -> u16 {
        critical_section::with(|cs| self.regs.borrow_ref(cs).counter)
    }

    /// Currently configured edge polarity, if initialized (test inspection).
    pub fn polarity(&self) -> Option<EdgePolarity> {
        critical_section::with(|cs| self.regs.borrow_ref(cs).config.map(|c| c.polarity))
    }

    /// Whether the capture interrupt is enabled (test inspection).
    pub fn is_enabled(&self) -> bool {
        critical_section::with(|cs| self.regs.borrow_ref(cs).irq_enabled)
    }
}

impl Default for MockCapture<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> CaptureTimer<'a> for MockCapture<'a> {
    fn init(&self, config: CaptureConfig) {
        critical_section::with(|cs| {
            *self.regs.borrow_ref_mut(cs) = Registers {
                config: Some(config),
                counter: 0,
                capture: 0,
                irq_enabled: true,
            };
        });
    }

    fn set_client(&self, client: &'a dyn CaptureClient) {
        self.slot.replace(client);
    }

    fn set_edge_polarity(&self, polarity: EdgePolarity) {
        critical_section::with(|cs| {
            let mut regs = self.regs.borrow_ref_mut(cs);
            if let Some(config) = regs.config.as_mut() {
                config.polarity = polarity;
            }
        });
    }

    fn capture_value(&self) -> u16 {
        critical_section::with(|cs| self.regs.borrow_ref(cs).capture)
    }

    fn clear_counter(&self) {
        critical_section::with(|cs| self.regs.borrow_ref_mut(cs).counter = 0);
    }

    fn deinit(&self) {
        critical_section::with(|cs| {
            *self.regs.borrow_ref_mut(cs) = Registers::reset();
        });
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct LastEdge {
        calls: AtomicUsize,
        ticks: AtomicUsize,
    }

    impl LastEdge {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                ticks: AtomicUsize::new(0),
            }
        }
    }

    impl CaptureClient for LastEdge {
        fn edge_captured(&self, ticks: u16) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.ticks.store(ticks as usize, Ordering::SeqCst);
        }
    }

    const ALL_PRESCALERS: [Prescaler; 6] = [
        Prescaler::Off,
        Prescaler::Div1,
        Prescaler::Div8,
        Prescaler::Div64,
        Prescaler::Div256,
        Prescaler::Div1024,
    ];
    const ALL_POLARITIES: [EdgePolarity; 2] = [EdgePolarity::Rising, EdgePolarity::Falling];

    #[test]
    fn init_zeroes_counter_and_capture_for_every_config() {
        for prescaler in ALL_PRESCALERS {
            for polarity in ALL_POLARITIES {
                let timer = MockCapture::new();
                timer.init(CaptureConfig {
                    prescaler,
                    polarity,
                });
                assert_eq!(timer.counter(), 0);
                assert_eq!(timer.capture_value(), 0);
            }
        }
    }

    #[test]
    fn reinit_overwrites_prior_state() {
        let timer = MockCapture::new();
        timer.init(CaptureConfig {
            prescaler: Prescaler::Div8,
            polarity: EdgePolarity::Rising,
        });
        timer.advance(500);
        timer.edge(EdgePolarity::Rising);
        assert_eq!(timer.capture_value(), 500);

        timer.init(CaptureConfig {
            prescaler: Prescaler::Div64,
            polarity: EdgePolarity::Falling,
        });
        assert_eq!(timer.counter(), 0);
        assert_eq!(timer.capture_value(), 0);
        assert_eq!(timer.polarity(), Some(EdgePolarity::Falling));
    }

    #[test]
    fn qualifying_edge_latches_and_dispatches_once() {
        let timer = MockCapture::new();
        let client = LastEdge::new();
        timer.init(CaptureConfig {
            prescaler: Prescaler::Div8,
            polarity: EdgePolarity::Rising,
        });
        timer.set_client(&client);

        timer.advance(1234);
        timer.edge(EdgePolarity::Rising);

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.ticks.load(Ordering::SeqCst), 1234);
        assert_eq!(timer.capture_value(), 1234);
    }

    #[test]
    fn non_matching_polarity_is_ignored() {
        let timer = MockCapture::new();
        let client = LastEdge::new();
        timer.init(CaptureConfig {
            prescaler: Prescaler::Div8,
            polarity: EdgePolarity::Rising,
        });
        timer.set_client(&client);

        timer.advance(77);
        timer.edge(EdgePolarity::Falling);

        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(timer.capture_value(), 0);
    }

    #[test]
    fn counter_halts_with_prescaler_off() {
        let timer = MockCapture::new();
        timer.init(CaptureConfig {
            prescaler: Prescaler::Off,
            polarity: EdgePolarity::Rising,
        });
        timer.advance(100);
        assert_eq!(timer.counter(), 0);
    }

    #[test]
    fn counter_wraps_at_16_bits() {
        let timer = MockCapture::new();
        timer.init(CaptureConfig {
            prescaler: Prescaler::Div1,
            polarity: EdgePolarity::Rising,
        });
        timer.advance(u16::MAX);
        timer.advance(3);
        assert_eq!(timer.counter(), 2);
    }

    #[test]
    fn clear_counter_keeps_capture_enabled() {
        let timer = MockCapture::new();
        let client = LastEdge::new();
        timer.init(CaptureConfig {
            prescaler: Prescaler::Div8,
            polarity: EdgePolarity::Rising,
        });
        timer.set_client(&client);

        timer.advance(40);
        timer.clear_counter();
        assert_eq!(timer.counter(), 0);

        timer.advance(5);
        timer.edge(EdgePolarity::Rising);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.ticks.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn deinit_disables_capture_until_reinit() {
        let timer = MockCapture::new();
        let client = LastEdge::new();
        timer.init(CaptureConfig {
            prescaler: Prescaler::Div8,
            polarity: EdgePolarity::Rising,
        });
        timer.set_client(&client);

        timer.deinit();
        assert!(!timer.is_enabled());
        timer.advance(10);
        timer.edge(EdgePolarity::Rising);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);

        // The registration survives deinit; re-init restores operation.
        timer.init(CaptureConfig {
            prescaler: Prescaler::Div8,
            polarity: EdgePolarity::Rising,
        });
        timer.advance(10);
        timer.edge(EdgePolarity::Rising);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
