//! Delays required by the controller.
//!
//! Two primitives: [sleep] yields the thread and only has millisecond resolution, [busy_wait]
//! spins and is precise to the microsecond. [wait] picks one based on the duration.
//!
//! [busy_wait] blocks the calling thread outright. It is bounded to tens of microseconds per
//! call, which is fine on a dedicated worker but should not be run on a thread that services
//! other work; see [super::notify::LcdWorker].

use std::hint::spin_loop;
use std::time::{Duration, Instant};

/// Power-on settle time before the first wake-up nibble.
pub const POWER_ON_DELAY: Duration = Duration::from_millis(15);
/// Wait after the first wake-up nibble.
pub const WAKE_UP_FIRST_DELAY: Duration = Duration::from_micros(4100);
/// Wait after the second and third wake-up nibbles.
pub const WAKE_UP_DELAY: Duration = Duration::from_micros(160);
/// Execution time of a regular command (RS low).
pub const COMMAND_DELAY: Duration = Duration::from_micros(39);
/// Execution time of a DDRAM write (RS high).
pub const DATA_DELAY: Duration = Duration::from_micros(43);
/// Minimum enable cycle time after lowering E.
pub const ENABLE_CYCLE_DELAY: Duration = Duration::from_micros(1);
/// Execution time of clear display and return home. The datasheet says 1.52 ms, 3 ms is what
/// works reliably.
pub const CLEAR_DELAY: Duration = Duration::from_millis(3);

const SLEEP_RESOLUTION: Duration = Duration::from_millis(1);

/// Sleeps for at least `duration`, rounded up to whole milliseconds.
pub fn sleep(duration: Duration) {
    let millis = duration.as_nanos().div_ceil(SLEEP_RESOLUTION.as_nanos());
    std::thread::sleep(SLEEP_RESOLUTION * millis as u32);
}

/// Spins until at least `duration` has elapsed.
pub fn busy_wait(duration: Duration) {
    let start = Instant::now();
    while start.elapsed() < duration {
        spin_loop();
    }
}

/// Waits for at least `duration`, spinning if it's shorter than the sleep resolution.
pub fn wait(duration: Duration) {
    if duration < SLEEP_RESOLUTION {
        busy_wait(duration);
    } else {
        sleep(duration);
    }
}
