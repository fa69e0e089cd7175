//! Per-frame time record. The only channel through which evaluation sees time.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeMode {
    /// Non-monotonic editing time; `dt` is pinned to zero.
    Scrub,
    #[default]
    Performance,
}

/// Immutable time record, rebuilt every frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeContext {
    /// Absolute time in seconds.
    pub t: f64,
    /// Seconds since the previous frame.
    pub dt: f64,
    /// Frame counter since the last mode change.
    pub frame: u64,
    pub mode: TimeMode,
}

impl TimeContext {
    pub fn performance(t: f64, dt: f64, frame: u64) -> Self {
        Self {
            t,
            dt,
            frame,
            mode: TimeMode::Performance,
        }
    }

    pub fn scrub(t: f64, frame: u64) -> Self {
        Self {
            t,
            dt: 0.0,
            frame,
            mode: TimeMode::Scrub,
        }
    }

    pub fn is_performance(&self) -> bool {
        self.mode == TimeMode::Performance
    }
}

/// Produces one [`TimeContext`] per frame.
#[derive(Debug, Default)]
pub struct TimeContextManager {
    last: Option<TimeContext>,
}

impl TimeContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, t: f64, mode: TimeMode) -> TimeContext {
        let ctx = match self.last {
            Some(prev) if prev.mode == mode => {
                let dt = match mode {
                    TimeMode::Performance => t - prev.t,
                    TimeMode::Scrub => 0.0,
                };
                TimeContext {
                    t,
                    dt,
                    frame: prev.frame + 1,
                    mode,
                }
            }
            _ => TimeContext {
                t,
                dt: 0.0,
                frame: 0,
                mode,
            },
        };
        self.last = Some(ctx);
        ctx
    }

    pub fn last(&self) -> Option<&TimeContext> {
        self.last.as_ref()
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_performance_delta_and_counter() {
        let mut mgr = TimeContextManager::new();
        let a = mgr.next(1.0, TimeMode::Performance);
        assert_eq!((a.frame, a.dt), (0, 0.0));
        let b = mgr.next(1.5, TimeMode::Performance);
        assert_eq!(b.frame, 1);
        assert!((b.dt - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_mode_change_resets_counter() {
        let mut mgr = TimeContextManager::new();
        mgr.next(0.0, TimeMode::Performance);
        mgr.next(0.1, TimeMode::Performance);
        let s = mgr.next(5.0, TimeMode::Scrub);
        assert_eq!(s.frame, 0);
        assert_eq!(s.dt, 0.0);
        let s2 = mgr.next(2.0, TimeMode::Scrub);
        assert_eq!(s2.frame, 1);
        assert_eq!(s2.dt, 0.0);
        let p = mgr.next(2.1, TimeMode::Performance);
        assert_eq!(p.frame, 0);
        assert_eq!(p.dt, 0.0);
    }
}
