//! Performance measurement tools.

use std::{
    fmt, mem,
    sync::Mutex,
    time::{Duration, Instant},
};

const EMA_ALPHA: f32 = 0.3;

/// A timer that can measure and average the time an operation takes.
///
/// Timings are smoothed with an exponential moving average. The average is reset when the timer
/// is displayed using `{}` ([`std::fmt::Display`]).
pub struct Timer {
    name: &'static str,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// The current average time in seconds, `None` until the first measurement.
    avg: Option<f32>,
    /// The number of time measurements that contributed to the current `avg`.
    count: usize,
}

impl Timer {
    /// Creates a new timer.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(State::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Invokes a closure, measuring and recording the time it takes.
    pub fn time<T>(&self, timee: impl FnOnce() -> T) -> T {
        let _guard = self.start();
        timee()
    }

    /// Starts timing an operation using a drop guard.
    ///
    /// When the returned [`TimerGuard`] is dropped, the time between the call to `start` and the
    /// drop is measured and recorded.
    pub fn start(&self) -> TimerGuard<'_> {
        TimerGuard {
            start: Instant::now(),
            timer: self,
        }
    }

    fn stop(&self, start: Instant) {
        let secs = start.elapsed().as_secs_f32();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.avg = Some(match state.avg {
            Some(avg) => EMA_ALPHA * secs + (1.0 - EMA_ALPHA) * avg,
            None => secs,
        });
        state.count += 1;
    }
}

/// Displays the average recorded time and resets it.
impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let State { avg, count } = mem::take(&mut *state);
        let avg_ms = avg.unwrap_or(0.0) * 1000.0;

        write!(f, "{}: {count}x{avg_ms:.01}ms", self.name)
    }
}

/// Cloning a timer resets its collected timings.
impl Clone for Timer {
    fn clone(&self) -> Self {
        Self::new(self.name)
    }
}

/// Guard returned by [`Timer::start`]. Stops timing the operation when dropped.
pub struct TimerGuard<'a> {
    start: Instant,
    timer: &'a Timer,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.stop(self.start);
    }
}

/// Logs how many events (requests, frames) were handled per interval, together with timers.
pub struct RateCounter {
    name: String,
    interval: Duration,
    state: Mutex<(u32, Instant)>,
}

impl RateCounter {
    pub fn new<N: Into<String>>(name: N, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            state: Mutex::new((0, Instant::now())),
        }
    }

    /// Advances the counter by 1 and logs the rate and `timers` if the interval has passed.
    pub fn tick_with<'a, I: IntoIterator<Item = &'a Timer>>(&self, timers: I) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (count, start) = &mut *state;
        *count += 1;

        let elapsed = start.elapsed();
        if elapsed >= self.interval {
            let timers = timers
                .into_iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let rate = *count as f32 / elapsed.as_secs_f32();
            if timers.is_empty() {
                log::debug!("{}: {rate:.1}/s", self.name);
            } else {
                log::debug!("{}: {rate:.1}/s ({timers})", self.name);
            }

            *count = 0;
            *start = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_resets() {
        let timer = Timer::new("decode");
        timer.time(|| ());
        timer.time(|| ());
        assert!(timer.to_string().starts_with("decode: 2x"));
        assert_eq!(timer.to_string(), "decode: 0x0.0ms");
    }

    #[test]
    fn guard_records_on_drop() {
        let timer = Timer::new("guarded");
        {
            let _guard = timer.start();
        }
        assert!(timer.to_string().starts_with("guarded: 1x"));
    }

    #[test]
    fn rate_counter_resets_after_interval() {
        let counter = RateCounter::new("requests", Duration::ZERO);
        let timer = Timer::new("t");
        counter.tick_with([&timer]);
        counter.tick_with([]);
        assert_eq!(counter.state.lock().unwrap().0, 0);
    }
}
