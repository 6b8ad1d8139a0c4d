//! Pulse width to distance conversion
//!
//! Pure integer math: the echo pulse lasts as long as the burst's round trip,
//! so distance is half the pulse duration times the speed of sound, floored
//! to whole centimeters.

/// Speed of sound in air, in cm/s (340 m/s, dry air around 15°C).
pub const SPEED_OF_SOUND_CM_PER_S: u32 = 34_000;

/// Convert an echo pulse width to centimeters.
///
/// `tick_hz` is the capture counter's tick rate: the timer base frequency
/// divided by the configured prescaler. The result saturates at `u16::MAX`
/// for tick rates slow enough to overflow it.
///
/// # Panics
///
/// Panics if `tick_hz` is zero; [`Ranger::new`](crate::Ranger::new) validates
/// the configuration so this cannot be reached through the driver.
pub fn pulse_to_cm(width_ticks: u16, tick_hz: u32) -> u16 {
    let travel = u64::from(width_ticks) * u64::from(SPEED_OF_SOUND_CM_PER_S);
    let cm = travel / (2 * u64::from(tick_hz));
    u16::try_from(cm).unwrap_or(u16::MAX)
}
