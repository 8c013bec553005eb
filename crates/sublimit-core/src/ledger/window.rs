use std::time::Duration;

pub const ONE_MINUTE: Duration = Duration::from_secs(60);
pub const ONE_DAY: Duration = Duration::from_secs(60 * 60 * 24);

/// A named trailing interval over which a cap applies.
///
/// Membership is half-open: an entry at `t` belongs to the window evaluated at `now`
/// iff `now - t < duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub name: &'static str,
    pub duration: Duration,
}

impl Window {
    pub const MINUTE: Self = Self { name: "minute", duration: ONE_MINUTE };
    pub const DAY: Self = Self { name: "day", duration: ONE_DAY };

    #[must_use]
    pub const fn new(name: &'static str, duration: Duration) -> Self {
        Self { name, duration }
    }

    /// Window length in milliseconds, the resolution the ledgers store.
    #[must_use]
    pub fn millis(&self) -> i64 {
        duration_millis(self.duration)
    }
}

/// A window paired with the number of requests it admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    pub window: Window,
    pub cap: u64,
}

/// The windows a ledger retains entries for.
///
/// Entries older than the longest window are stale for every window and may be evicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSet {
    windows: Vec<Window>,
}

impl WindowSet {
    #[must_use]
    pub fn new(windows: Vec<Window>) -> Self {
        Self { windows }
    }

    #[must_use]
    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    /// Retention horizon: the longest configured window.
    #[must_use]
    pub fn max_duration(&self) -> Duration {
        self.windows.iter().map(|w| w.duration).max().unwrap_or(ONE_DAY)
    }

    /// Widens the set so `window` is retained too.
    pub fn include(&mut self, window: Window) {
        if !self.windows.contains(&window) {
            self.windows.push(window);
        }
    }
}

impl Default for WindowSet {
    fn default() -> Self {
        Self::new(vec![Window::MINUTE, Window::DAY])
    }
}

/// Saturating conversion of a [`Duration`] to whole milliseconds.
#[must_use]
pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
