//! The multi-threaded proof-of-work engine.
//!
//! At most one search runs at a time process-wide; additional calls
//! queue on the admission semaphore — the one piece of global
//! coordination this crate allows itself, because CPU cores are a
//! genuine shared resource. Within a search, one worker per core
//! (capped at 255) scans the nonce space in strides: worker `i`
//! starts at `i` and steps by the worker count. The first worker to
//! find a valid nonce flips an atomic flag; its siblings notice and
//! stop, and the nonce is delivered exactly once.
//!
//! Cancellation is cooperative: [`PowEngine::shutdown`] raises a flag
//! the workers check between iterations, and the pending search
//! resolves to [`BmError::PowAborted`], releasing the admission slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use bitmsg_protocol::pow::pow_value;
use bitmsg_types::{BmError, Result};

/// Worker-count cap from the protocol's reference engine.
const MAX_WORKERS: usize = 255;

/// How many nonces a worker tries between flag checks.
const CHECK_INTERVAL: u64 = 1024;

// ---------------------------------------------------------------------------
// PowEngine
// ---------------------------------------------------------------------------

/// Shared proof-of-work engine.
pub struct PowEngine {
    admission: Arc<Semaphore>,
    abort: Arc<AtomicBool>,
}

impl PowEngine {
    /// Creates an engine with a single admission slot.
    pub fn new() -> Self {
        Self {
            admission: Arc::new(Semaphore::new(1)),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Finds an 8-byte nonce such that
    /// `double_sha512(nonce ‖ initial_hash)[0..8] ≤ target`.
    ///
    /// Queues behind any running search. Blocking work happens on the
    /// runtime's blocking pool; the caller just awaits.
    ///
    /// # Errors
    ///
    /// [`BmError::PowAborted`] if the engine was shut down before or
    /// during the search.
    pub async fn compute(&self, initial_hash: [u8; 64], target: u64) -> Result<[u8; 8]> {
        let permit = self
            .admission
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BmError::PowAborted)?;
        if self.abort.load(Ordering::SeqCst) {
            return Err(BmError::PowAborted);
        }
        let abort = Arc::clone(&self.abort);
        let result = tokio::task::spawn_blocking(move || search(initial_hash, target, &abort))
            .await
            .map_err(|_| BmError::PowAborted)?;
        drop(permit);
        result
    }

    /// Cooperatively cancels the current and all queued searches.
    pub fn shutdown(&self) {
        self.abort.store(true, Ordering::SeqCst);
        self.admission.close();
    }
}

impl Default for PowEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

fn search(initial_hash: [u8; 64], target: u64, abort: &AtomicBool) -> Result<[u8; 8]> {
    let workers = num_cpus::get().clamp(1, MAX_WORKERS) as u64;
    let found = AtomicBool::new(false);
    let winner: Mutex<Option<u64>> = Mutex::new(None);
    let started = std::time::Instant::now();
    tracing::info!(workers, "starting proof of work");

    std::thread::scope(|scope| {
        for worker in 0..workers {
            let found = &found;
            let winner = &winner;
            let initial_hash = &initial_hash;
            scope.spawn(move || {
                let mut nonce = worker;
                loop {
                    for _ in 0..CHECK_INTERVAL {
                        if pow_value(&nonce.to_be_bytes(), initial_hash) <= target {
                            // First writer wins; everyone else backs off.
                            if !found.swap(true, Ordering::SeqCst) {
                                if let Ok(mut slot) = winner.lock() {
                                    *slot = Some(nonce);
                                }
                            }
                            return;
                        }
                        nonce = nonce.wrapping_add(workers);
                    }
                    if found.load(Ordering::Relaxed) || abort.load(Ordering::Relaxed) {
                        return;
                    }
                }
            });
        }
    });

    let nonce = winner.lock().ok().and_then(|slot| *slot);
    match nonce {
        Some(nonce) => {
            tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "proof of work complete"
            );
            Ok(nonce.to_be_bytes())
        }
        None => Err(BmError::PowAborted),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
