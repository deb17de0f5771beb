use std::time::Duration;

use tokio::sync::mpsc;

/// Upper bound reported while bytes are still in flight.
pub const UPLOAD_PROGRESS_CEILING: u8 = 90;
pub const PROGRESS_COMPLETE: u8 = 100;
pub const DEFAULT_PROGRESS_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteProgress {
    pub sent: u64,
    pub total: u64,
}

pub type ByteProgressSender = mpsc::UnboundedSender<ByteProgress>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressStage {
    pub target_percent: u8,
    pub duration: Duration,
}

impl ProgressStage {
    pub const fn new(target_percent: u8, duration_ms: u64) -> Self {
        Self {
            target_percent,
            duration: Duration::from_millis(duration_ms),
        }
    }
}

pub fn default_schedule() -> Vec<ProgressStage> {
    vec![
        ProgressStage::new(20, 300),
        ProgressStage::new(45, 700),
        ProgressStage::new(70, 1200),
        ProgressStage::new(90, 2000),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressStrategy {
    /// Scale byte counts reported by the transport.
    Observed,
    /// Walk a fixed schedule while the transport stays silent.
    Staged(Vec<ProgressStage>),
}

impl ProgressStrategy {
    pub fn detect(reports_byte_progress: bool, schedule: &[ProgressStage]) -> Self {
        if reports_byte_progress {
            Self::Observed
        } else {
            Self::Staged(schedule.to_vec())
        }
    }
}

pub fn observed_percent(progress: ByteProgress) -> u8 {
    if progress.total == 0 {
        return UPLOAD_PROGRESS_CEILING;
    }
    let ratio = progress.sent.min(progress.total) as f64 / progress.total as f64;
    (ratio * f64::from(UPLOAD_PROGRESS_CEILING)).floor() as u8
}

/// Expands a schedule into `(delay, percent)` ticks with linear interpolation
/// inside each stage. Stages that would move backwards are skipped.
pub fn staged_ticks(schedule: &[ProgressStage], tick: Duration) -> Vec<(Duration, u8)> {
    let tick_ms = tick.as_millis().max(1);
    let mut ticks = Vec::new();
    let mut from = 0u8;

    for stage in schedule {
        let target = stage.target_percent.min(UPLOAD_PROGRESS_CEILING);
        if target <= from {
            continue;
        }
        let steps = (stage.duration.as_millis() / tick_ms).clamp(1, u128::from(u32::MAX)) as u32;
        let step_delay = stage.duration / steps;
        let span = u32::from(target - from);
        for step in 1..=steps {
            let percent = u32::from(from) + span * step / steps;
            ticks.push((step_delay, percent as u8));
        }
        from = target;
    }

    ticks
}

/// Monotonic progress value for one session.
#[derive(Debug, Default)]
pub struct ProgressMeter {
    current: u8,
    completed: bool,
}

impl ProgressMeter {
    pub fn current(&self) -> u8 {
        self.current
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Returns the new value only when it moved forward.
    pub fn advance(&mut self, percent: u8) -> Option<u8> {
        if self.completed {
            return None;
        }
        let capped = percent.min(UPLOAD_PROGRESS_CEILING);
        if capped > self.current {
            self.current = capped;
            Some(capped)
        } else {
            None
        }
    }

    pub fn complete(&mut self) -> Option<u8> {
        if self.completed {
            return None;
        }
        self.completed = true;
        self.current = PROGRESS_COMPLETE;
        Some(PROGRESS_COMPLETE)
    }
}
