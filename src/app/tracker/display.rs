/// What the progress sink shows. Always recomputed, never read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DisplayState {
    pub(crate) watched: usize,
    pub(crate) total: usize,
    pub(crate) percent: u32,
}

impl DisplayState {
    pub(crate) fn new(watched: usize, total: usize) -> Self {
        Self {
            watched,
            total,
            percent: watched_percent(watched, total),
        }
    }

    pub(crate) fn text(&self) -> String {
        format!(
            "Videos Watched: {}/{} ({}%)",
            self.watched, self.total, self.percent
        )
    }

    /// Fill ratio for bar-style sinks; overflow (more recorded than rendered)
    /// pins to a full bar.
    pub(crate) fn bar_ratio(&self) -> f64 {
        (f64::from(self.percent) / 100.0).clamp(0.0, 1.0)
    }
}

pub(crate) fn watched_percent(watched: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (watched as f64 * 100.0 / total as f64).round() as u32
}
