use std::borrow::Cow;
use std::time::{Duration, Instant};

use log::{Level, debug, warn};

/// Logs the wall-clock duration of a scope when dropped. With a budget, an
/// overrun is logged as a warning instead.
pub struct ScopedTimer {
    label: Option<Cow<'static, str>>,
    start: Instant,
    budget: Option<Duration>,
}

impl ScopedTimer {
    fn start<F>(level: Level, budget: Option<Duration>, label_gen: F) -> Self
    where
        F: FnOnce() -> String,
    {
        let label = log::log_enabled!(level).then(|| Cow::Owned(label_gen()));
        Self {
            label,
            start: Instant::now(),
            budget,
        }
    }

    /// Debug-level timer; the label is only built when debug logging is on.
    pub fn debug_lazy<F>(label_gen: F) -> Self
    where
        F: FnOnce() -> String,
    {
        Self::start(Level::Debug, None, label_gen)
    }

    /// Timer that warns once the scope outlives `budget`.
    pub fn with_budget<F>(budget: Option<Duration>, label_gen: F) -> Self
    where
        F: FnOnce() -> String,
    {
        match budget {
            Some(_) => Self::start(Level::Warn, budget, label_gen),
            None => Self::debug_lazy(label_gen),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn over_budget(&self) -> bool {
        self.budget.is_some_and(|budget| self.elapsed() > budget)
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        let Some(label) = &self.label else {
            return;
        };
        let elapsed = self.elapsed().as_micros();
        match self.budget {
            Some(budget) if self.over_budget() => warn!(
                "{} took {} us, over its {} us budget",
                label,
                elapsed,
                budget.as_micros()
            ),
            _ => debug!("{} took {} us", label, elapsed),
        }
    }
}

/// Time budget of one frame at `fps`, if the rate is usable.
pub fn frame_budget(fps: f64) -> Option<Duration> {
    (fps.is_finite() && fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_budget() {
        assert_eq!(frame_budget(50.0), Some(Duration::from_millis(20)));
        assert_eq!(frame_budget(0.0), None);
        assert_eq!(frame_budget(f64::NAN), None);
    }

    #[test]
    fn test_over_budget() {
        let timer = ScopedTimer::with_budget(Some(Duration::ZERO), || "frame".to_string());
        std::thread::sleep(Duration::from_millis(1));
        assert!(timer.over_budget());
        let unbounded = ScopedTimer::with_budget(None, || "frame".to_string());
        assert!(!unbounded.over_budget());
    }
}
