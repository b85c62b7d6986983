//! GPU load throttle for the bridge path.
//!
//! Every `period` frames the dispatch is bracketed by timestamp queries. The
//! result is read back `read_delay` frames later so the render thread never
//! stalls on the GPU. When the measured time exceeds the threshold on
//! consecutive readings while the GPU is busy, dispatches are bypassed until
//! system GPU utilisation falls back to a recovery floor.
//!
//! The state machine only talks to the GPU through [`GpuTimer`] and
//! [`UsageSampler`], so it runs unchanged against fakes in tests.

use tracing::{debug, info};

/// Tuning for [`Throttle`].
#[derive(Clone, Debug, PartialEq)]
pub struct ThrottleConfig {
    /// Frames between timing windows.
    pub period: u64,
    /// Frames to skip after start-up before the first timing window.
    pub warmup: u64,
    /// Frames to wait after a timing window before reading it back.
    pub read_delay: u64,
    /// Kernel time in milliseconds above which a reading counts as excess.
    pub excess_ms: f64,
    /// Consecutive excess readings that trigger the bypass.
    pub excess_count: u32,
    /// How far utilisation must fall below the peak before recovering.
    pub recovery_drop: f64,
    /// Lowest recovery floor.
    pub recovery_min: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            period: 120,
            warmup: 60,
            read_delay: 8,
            excess_ms: 4.0,
            excess_count: 2,
            recovery_drop: 0.20,
            recovery_min: 0.50,
        }
    }
}

/// Outcome of polling the timestamp queries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimerReading {
    /// The GPU has not produced the data yet.
    NotReady,
    /// The GPU clock changed during the window; the reading is meaningless.
    Disjoint,
    /// Time between the start and end timestamps, in milliseconds.
    Elapsed(f64),
}

/// Timestamp queries around a dispatch.
pub trait GpuTimer {
    /// Open the disjoint window and record the start timestamp.
    fn begin(&mut self);
    /// Record the end timestamp and close the disjoint window.
    fn end(&mut self);
    /// Poll the last window without blocking.
    fn read(&mut self) -> TimerReading;
}

/// Source of system-wide GPU utilisation.
pub trait UsageSampler {
    /// Sum of per-engine utilisation percentages, or `None` when no sample is
    /// available yet. Must never block.
    fn sample(&mut self) -> Option<f64>;
}

/// Milliseconds between two GPU timestamps ticking at `frequency` Hz.
pub fn elapsed_ms(start: u64, end: u64, frequency: u64) -> f64 {
    if frequency == 0 {
        return 0.0;
    }
    end.saturating_sub(start) as f64 / frequency as f64 * 1000.0
}

/// Frame counter and the pending timing window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimingCycle {
    pub frame: u64,
    pub read_pending: bool,
    pub end_frame: u64,
}

impl TimingCycle {
    /// Whether the current frame opens a timing window.
    pub fn is_timing_frame(&self, config: &ThrottleConfig) -> bool {
        !self.read_pending && self.frame > config.warmup && self.frame % config.period == 0
    }

    /// Whether the pending window is old enough to be read back.
    pub fn is_read_due(&self, config: &ThrottleConfig) -> bool {
        self.read_pending && self.frame - self.end_frame >= config.read_delay
    }

    pub fn is_sample_frame(&self, config: &ThrottleConfig) -> bool {
        self.frame % config.period == 0
    }
}

/// Excess tracking and the bypass flag.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ThrottleState {
    pub excess: u32,
    pub bypass: bool,
    pub elapsed_ms: f64,
    pub latest_usage: f64,
    pub peak_usage: f64,
    /// Utilisation at or below which the bypass clears. `None` when inactive.
    pub recovery_floor: Option<f64>,
}

impl ThrottleState {
    /// Store a utilisation sample and clear the bypass if it reached the floor.
    pub fn record_usage(&mut self, usage: f64) {
        self.latest_usage = usage;
        if let Some(floor) = self.recovery_floor {
            if usage <= floor {
                info!("GPU usage {usage:.2} at or below {floor:.2}, resuming compute");
                self.recovery_floor = None;
                self.bypass = false;
            }
        }
    }

    /// Store a kernel time and evaluate it against the latest utilisation.
    pub fn record_elapsed(&mut self, elapsed_ms: f64, config: &ThrottleConfig) {
        self.elapsed_ms = elapsed_ms;

        if elapsed_ms <= config.excess_ms || self.latest_usage <= 0.0 {
            self.excess = 0;
            return;
        }

        self.excess += 1;
        debug!(
            "Excess GPU time {elapsed_ms:.3} ms at usage {:.2} ({}/{})",
            self.latest_usage, self.excess, config.excess_count
        );
        if self.excess >= config.excess_count {
            self.peak_usage = self.latest_usage;
            let floor = (self.peak_usage - config.recovery_drop).max(config.recovery_min);
            info!(
                "GPU usage {:.2} too high, bypassing compute until {floor:.2}",
                self.peak_usage
            );
            self.recovery_floor = Some(floor);
            self.bypass = true;
            self.excess = 0;
        }
    }
}

/// Per-frame throttle wrapped around one dispatch.
///
/// A dispatch calls [`admit`](Self::admit) first. When admitted it calls
/// [`begin`](Self::begin) before and [`finish`](Self::finish) after the
/// kernel. A dispatch that fails in between does not advance the frame.
pub struct Throttle<T, S> {
    config: ThrottleConfig,
    timer: T,
    sampler: S,
    cycle: TimingCycle,
    state: ThrottleState,
}

impl<T: GpuTimer, S: UsageSampler> Throttle<T, S> {
    pub fn new(timer: T, sampler: S) -> Self {
        Self::with_config(ThrottleConfig::default(), timer, sampler)
    }

    pub fn with_config(config: ThrottleConfig, timer: T, sampler: S) -> Self {
        Self {
            config,
            timer,
            sampler,
            cycle: TimingCycle::default(),
            state: ThrottleState::default(),
        }
    }

    /// Returns `false` while bypassed. A bypassed frame still counts, and
    /// every `period` frames it samples utilisation to look for recovery.
    pub fn admit(&mut self) -> bool {
        if !self.state.bypass {
            return true;
        }
        if self.cycle.is_sample_frame(&self.config) {
            self.sample_usage();
        }
        self.cycle.frame += 1;
        false
    }

    /// Open a timing window if this frame is a timing frame.
    pub fn begin(&mut self) {
        if self.cycle.is_timing_frame(&self.config) {
            self.timer.begin();
        }
    }

    /// Close the timing window, read back an earlier one if due, and advance
    /// the frame.
    ///
    /// The window is gated on the same frame test as [`begin`](Self::begin),
    /// so it spans exactly one dispatch.
    pub fn finish(&mut self) {
        if self.cycle.is_timing_frame(&self.config) {
            self.timer.end();
            self.cycle.read_pending = true;
            self.cycle.end_frame = self.cycle.frame;
        }

        if self.cycle.is_read_due(&self.config) {
            match self.timer.read() {
                TimerReading::NotReady => {}
                TimerReading::Disjoint => {
                    debug!("Disjoint GPU timestamps, discarding");
                    self.cycle.read_pending = false;
                }
                TimerReading::Elapsed(ms) => {
                    self.sample_usage();
                    self.state.record_elapsed(ms, &self.config);
                    self.cycle.read_pending = false;
                }
            }
        }

        self.cycle.frame += 1;
    }

    fn sample_usage(&mut self) {
        if let Some(usage) = self.sampler.sample() {
            self.state.record_usage(usage);
        }
    }

    pub fn is_bypassed(&self) -> bool {
        self.state.bypass
    }

    /// Kernel time of the last completed timing window, in milliseconds.
    pub fn gpu_time_ms(&self) -> f64 {
        self.state.elapsed_ms
    }

    pub fn latest_usage(&self) -> f64 {
        self.state.latest_usage
    }

    pub fn peak_usage(&self) -> f64 {
        self.state.peak_usage
    }

    /// Active recovery floor, or 0 when not bypassed.
    pub fn recovery_usage(&self) -> f64 {
        self.state.recovery_floor.unwrap_or(0.0)
    }

    pub fn frame(&self) -> u64 {
        self.cycle.frame
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub fn state(&self) -> &ThrottleState {
        &self.state
    }

    pub fn cycle(&self) -> &TimingCycle {
        &self.cycle
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }
}
