use std::time::SystemTime;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

// A frozen pair of Instant and SystemTime for the same moment. All time inside the
// crate is driven by the caller's `Instant`, but the handshake Random needs unix time.
static BEGINNING_OF_TIME: Lazy<(Instant, SystemTime)> = Lazy::new(|| {
    let now = Instant::now();
    let now_sys = SystemTime::now();

    // Find an Instant in the past which is up to an hour back, so that
    // instants slightly older than the first call still map correctly.
    let mut secs = 3600;
    let beginning_of_time = loop {
        if let Some(v) = now.checked_sub(Duration::from_secs(secs)) {
            break v;
        }
        secs /= 2;
        if secs == 0 {
            break now;
        }
    };

    let since_beginning_of_time = now - beginning_of_time;
    let beginning_of_time_sys = now_sys - since_beginning_of_time;

    (beginning_of_time, beginning_of_time_sys)
});

pub trait InstantExt {
    /// Convert an Instant to a Duration since the unix epoch.
    fn to_unix_duration(&self) -> Duration;
}

impl InstantExt for Instant {
    fn to_unix_duration(&self) -> Duration {
        if *self < BEGINNING_OF_TIME.0 {
            warn!("Time went backwards from beginning_of_time Instant");
        }

        // saturating, an earlier instant maps to the beginning of time.
        let duration_since_time_0 = self.saturating_duration_since(BEGINNING_OF_TIME.0);
        let system_time = BEGINNING_OF_TIME.1 + duration_since_time_0;

        system_time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
    }
}
