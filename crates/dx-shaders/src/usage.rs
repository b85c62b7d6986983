//! System GPU utilisation from the `GPU Engine` performance counters.
//!
//! Opening and priming the counter takes two collections with a sleep in
//! between, so it happens once per process on a background thread. The
//! render thread only checks whether the counter has been published and never
//! waits for it.

use std::sync::{Mutex, MutexGuard, Once, OnceLock, TryLockError};
use std::time::Duration;

use windows::core::{w, PCWSTR};
use windows::Win32::System::Performance::*;

use tracing::{debug, warn};

use crate::throttle::UsageSampler;

const COUNTER_PATH: PCWSTR = w!("\\GPU Engine(*)\\Utilization Percentage");
const PRIME_INTERVAL: Duration = Duration::from_millis(100);
const ERROR_SUCCESS: u32 = 0;

static START: Once = Once::new();
static COUNTER: OnceLock<Mutex<EngineCounter>> = OnceLock::new();
static POISONED: Once = Once::new();

/// An open PDH query with the wildcard engine counter.
struct EngineCounter {
    query: PDH_HQUERY,
    counter: PDH_HCOUNTER,
}

// PDH handles may be used from any thread; access is serialised by the mutex.
unsafe impl Send for EngineCounter {}

impl EngineCounter {
    fn open() -> Option<Self> {
        let mut query = PDH_HQUERY::default();
        if unsafe { PdhOpenQueryW(PCWSTR::null(), 0, &mut query) } != ERROR_SUCCESS {
            return None;
        }
        let mut counter = PDH_HCOUNTER::default();
        if unsafe { PdhAddCounterW(query, COUNTER_PATH, 0, &mut counter) } != ERROR_SUCCESS {
            unsafe { PdhCloseQuery(query) };
            return None;
        }
        Some(Self { query, counter })
    }

    fn collect(&self) -> bool {
        unsafe { PdhCollectQueryData(self.query) == ERROR_SUCCESS }
    }

    /// Sum of the latest utilisation of every engine instance.
    fn total(&self) -> Option<f64> {
        let mut size = 0u32;
        let mut count = 0u32;
        let status = unsafe {
            PdhGetFormattedCounterArrayW(self.counter, PDH_FMT_DOUBLE, &mut size, &mut count, None)
        };
        if status != PDH_MORE_DATA || size == 0 {
            return None;
        }

        // The buffer holds the item array followed by the instance names.
        let item_size = std::mem::size_of::<PDH_FMT_COUNTERVALUE_ITEM_W>();
        let mut items: Vec<PDH_FMT_COUNTERVALUE_ITEM_W> =
            Vec::with_capacity((size as usize).div_ceil(item_size));
        let status = unsafe {
            PdhGetFormattedCounterArrayW(
                self.counter,
                PDH_FMT_DOUBLE,
                &mut size,
                &mut count,
                Some(items.as_mut_ptr()),
            )
        };
        if status != ERROR_SUCCESS {
            return None;
        }

        let values = unsafe { std::slice::from_raw_parts(items.as_ptr(), count as usize) };
        Some(values.iter().map(|item| unsafe { item.FmtValue.Anonymous.doubleValue }).sum())
    }
}

impl Drop for EngineCounter {
    fn drop(&mut self) {
        unsafe { PdhCloseQuery(self.query) };
    }
}

/// Start the one-time background initialisation of the shared counter.
fn start_counter() {
    START.call_once(|| {
        let spawned = std::thread::Builder::new()
            .name("gpu-usage-init".into())
            .spawn(|| {
                let Some(counter) = EngineCounter::open() else {
                    warn!("GPU engine utilisation counter is unavailable");
                    return;
                };
                counter.collect();
                std::thread::sleep(PRIME_INTERVAL);
                counter.collect();
                if COUNTER.set(Mutex::new(counter)).is_ok() {
                    debug!("GPU engine utilisation counter ready");
                }
            });
        if let Err(e) = spawned {
            warn!("Failed to start GPU usage thread: {e}");
        }
    });
}

/// Lock without waiting. A lock poisoned by a panicking sampler is taken over,
/// since the PDH query itself stays valid.
fn try_lock_counter<T>(lock: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match lock.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::WouldBlock) => None,
        Err(TryLockError::Poisoned(poisoned)) => {
            POISONED.call_once(|| warn!("GPU usage counter lock was poisoned, recovering it"));
            Some(poisoned.into_inner())
        }
    }
}

/// Whether the shared counter has finished initialising.
pub fn is_ready() -> bool {
    COUNTER.get().is_some()
}

/// Non-blocking [`UsageSampler`] over the shared counter.
///
/// Each sampler discards its first successful collection, since a rate
/// counter needs two collections before it reports a meaningful value.
#[derive(Debug, Default)]
pub struct GpuUsage {
    primed: bool,
}

impl GpuUsage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageSampler for GpuUsage {
    fn sample(&mut self) -> Option<f64> {
        start_counter();
        let counter = try_lock_counter(COUNTER.get()?)?;
        if !counter.collect() {
            return None;
        }
        if !self.primed {
            self.primed = true;
            return None;
        }
        counter.total()
    }
}
