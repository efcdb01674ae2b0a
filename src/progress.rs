//! # Progress reporting
//!
//! The pipeline reports its progress to an optional [`ProgressObserver`]: one
//! [`ProgressObserver::milestone`] per stage (stage name and percent complete), and one
//! [`ProgressObserver::patch_done`] each time a worker finishes a patch. Observers are
//! informational only; they never influence the result of a run.
//!
//! Observers provided here
//! -----------------
//! * [`NoProgress`] – ignores everything.
//! * [`LogProgress`] – forwards milestones to the `log` facade.
//! * `TerminalProgress` (feature `progress`) – an `indicatif` bar over the patches of the
//!   current stage, with the smoothed per-patch time from [`IterTimer`].
//!
//! Per-patch timing
//! -----------------
//! [`IterTimer`] keeps an exponential moving average of the time between ticks:
//! `ema ← α·dt + (1–α)·ema`, the first tick initializing the average.
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Stages of a pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Ephemeris,
    Catalog,
    Processing,
    Flagging,
    Mosaic,
    Done,
}

impl PipelineStage {
    /// Percent complete once the stage starts.
    pub fn percent(&self) -> u8 {
        match self {
            PipelineStage::Ephemeris => 10,
            PipelineStage::Catalog => 25,
            PipelineStage::Processing => 35,
            PipelineStage::Flagging => 45,
            PipelineStage::Mosaic => 50,
            PipelineStage::Done => 100,
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PipelineStage::Ephemeris => "Requesting ephemeris",
            PipelineStage::Catalog => "Generating skys",
            PipelineStage::Processing => "Processing skys",
            PipelineStage::Flagging => "Flagging sources",
            PipelineStage::Mosaic => "Composing mosaic",
            PipelineStage::Done => "Done",
        };
        f.write_str(label)
    }
}

/// Receiver of progress notifications. Called from worker threads.
pub trait ProgressObserver: Send + Sync {
    fn milestone(&self, stage: PipelineStage, percent: u8);

    fn patch_done(&self, _stage: PipelineStage, _done: usize, _total: usize) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn milestone(&self, _stage: PipelineStage, _percent: u8) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn milestone(&self, stage: PipelineStage, percent: u8) {
        log::info!("[{percent:>3}%] {stage}");
    }

    fn patch_done(&self, stage: PipelineStage, done: usize, total: usize) {
        log::debug!("{stage}: {done}/{total} patches");
    }
}

pub struct IterTimer {
    last: Instant,
    ema_ns: f64,
    alpha: f64,
    count: u64,
}

impl IterTimer {
    /// `alpha` in `(0, 1]`; 1 disables smoothing.
    pub fn new(alpha: f64) -> Self {
        Self {
            last: Instant::now(),
            ema_ns: 0.0,
            alpha,
            count: 0,
        }
    }

    /// Close the current interval and return its duration.
    #[inline]
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let dt = now.duration_since(self.last);
        self.last = now;
        self.count += 1;

        let dt_ns = dt.as_nanos() as f64;
        self.ema_ns = if self.count == 1 {
            dt_ns
        } else {
            self.alpha * dt_ns + (1.0 - self.alpha) * self.ema_ns
        };
        dt
    }

    #[inline]
    pub fn avg(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.ema_ns as u64)
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// `"253µs"`, `"42ms"` or `"3.14s"` depending on the scale.
#[inline]
pub fn fmt_dur(d: Duration) -> String {
    let us = d.as_micros();
    if us < 1_000 {
        format!("{us}µs")
    } else if d.as_millis() < 1_000 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.2}s", d.as_secs_f32())
    }
}

/// Milestones and per-patch timing collected in memory, for inspection after a run.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<(PipelineStage, u8)>>,
    patches: Mutex<Vec<(PipelineStage, usize, usize)>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn milestones(&self) -> Vec<(PipelineStage, u8)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// `(stage, done, total)` for every finished patch, in completion order.
    pub fn patch_events(&self) -> Vec<(PipelineStage, usize, usize)> {
        self.patches.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl ProgressObserver for RecordingProgress {
    fn milestone(&self, stage: PipelineStage, percent: u8) {
        if let Ok(mut events) = self.events.lock() {
            events.push((stage, percent));
        }
    }

    fn patch_done(&self, stage: PipelineStage, done: usize, total: usize) {
        if let Ok(mut patches) = self.patches.lock() {
            patches.push((stage, done, total));
        }
    }
}

#[cfg(feature = "progress")]
pub use terminal::TerminalProgress;

#[cfg(feature = "progress")]
mod terminal {
    use super::{fmt_dur, IterTimer, PipelineStage, ProgressObserver};
    use indicatif::{ProgressBar, ProgressStyle};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Terminal progress bar over the patches of the running stage.
    pub struct TerminalProgress {
        bar: ProgressBar,
        timer: Mutex<IterTimer>,
    }

    impl Default for TerminalProgress {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TerminalProgress {
        pub fn new() -> Self {
            let bar = ProgressBar::new(1);
            if let Ok(style) = ProgressStyle::with_template(
                "{bar:40.cyan/blue} {pos}/{len} ({percent:>3}%) | ETA {eta_precise} | {msg}",
            ) {
                bar.set_style(style);
            }
            bar.enable_steady_tick(Duration::from_millis(200));
            TerminalProgress {
                bar,
                timer: Mutex::new(IterTimer::new(0.2)),
            }
        }
    }

    impl ProgressObserver for TerminalProgress {
        fn milestone(&self, stage: PipelineStage, _percent: u8) {
            if stage == PipelineStage::Done {
                self.bar.finish_and_clear();
            } else {
                self.bar.set_message(stage.to_string());
            }
        }

        fn patch_done(&self, stage: PipelineStage, done: usize, total: usize) {
            self.bar.set_length(total.max(1) as u64);
            self.bar.set_position(done as u64);
            if let Ok(mut timer) = self.timer.lock() {
                let last = timer.tick();
                self.bar.set_message(format!(
                    "{stage} | last: {}, avg: {}",
                    fmt_dur(last),
                    fmt_dur(timer.avg())
                ));
            }
        }
    }
}
