//! Debounced output lines: assert fast, release slow.

/// Asymmetric debounce for one inhibit line.
///
/// A raised demand asserts the line on the same update. A cleared demand
/// releases it only after `release_n` consecutive clear updates; any demanded
/// cycle in between restarts the count.
#[derive(Debug, Clone)]
pub struct DebouncedLine {
    active: bool,
    clear_run: u8,
    release_n: u8,
}

impl DebouncedLine {
    #[must_use]
    pub fn new(release_n: u8) -> Self {
        Self {
            active: false,
            clear_run: 0,
            release_n: release_n.max(1),
        }
    }

    /// Feed one cycle's demand; returns the debounced level.
    pub fn update(&mut self, demand: bool) -> bool {
        if demand {
            self.active = true;
            self.clear_run = 0;
        } else if self.active {
            self.clear_run = self.clear_run.saturating_add(1);
            if self.clear_run >= self.release_n {
                self.active = false;
                self.clear_run = 0;
            }
        }
        self.active
    }

    /// Force the line to a level, discarding debounce history.
    pub fn force(&mut self, active: bool) {
        self.active = active;
        self.clear_run = 0;
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.clear_run = 0;
    }
}
