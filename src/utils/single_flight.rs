use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-slot guard: at most one [`FlightPermit`] exists at a time.
///
/// Acquisition never waits. A caller that loses the race gets `None` and is
/// expected to skip or fail fast. The permit releases the slot on drop, which
/// also covers futures that are cancelled mid-await.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    held: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<FlightPermit> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightPermit {
                held: Arc::clone(&self.held),
            })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct FlightPermit {
    held: Arc<AtomicBool>,
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}
