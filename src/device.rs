//! Compute backends.
//!
//! A [`Device`] takes the force terms and a read-only view of the state and
//! hands back one [`TermOutput`] per term, in term order. The host backend runs
//! serially on the calling thread. The accelerator backend owns a dedicated
//! worker pool and evaluates terms data-parallel on it, waiting a bounded time
//! for the result.

use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{MdError, Result};
use crate::forcefield::{ForceTerm, TermOutput};
use crate::system::SystemState;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Host,
    Accelerator,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Host => f.write_str("host"),
            DeviceKind::Accelerator => f.write_str("accelerator"),
        }
    }
}

pub trait Device: Send + Sync + fmt::Debug {
    fn kind(&self) -> DeviceKind;

    /// Evaluates every term against `state`. Returns only once all workers
    /// have finished; nothing borrowed from `state` outlives the call.
    fn evaluate(&self, terms: &[Arc<dyn ForceTerm>], state: &SystemState) -> Result<Vec<TermOutput>>;
}

/// Hands back a ready execution context for `kind`.
pub fn provision(kind: DeviceKind, timeout: Duration) -> Result<Box<dyn Device>> {
    match kind {
        DeviceKind::Host => Ok(Box::new(HostDevice)),
        DeviceKind::Accelerator => Ok(Box::new(AcceleratorDevice::new(timeout)?)),
    }
}

/// Serial, deterministic backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostDevice;

impl Device for HostDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Host
    }

    fn evaluate(&self, terms: &[Arc<dyn ForceTerm>], state: &SystemState) -> Result<Vec<TermOutput>> {
        terms.iter().map(|term| term.evaluate(state)).collect()
    }
}

pub struct AcceleratorDevice {
    pool: rayon::ThreadPool,
    timeout: Duration,
}

impl fmt::Debug for AcceleratorDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceleratorDevice")
            .field("threads", &self.pool.current_num_threads())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AcceleratorDevice {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_threads(0, timeout)
    }

    /// `threads == 0` lets the pool pick one worker per logical core.
    pub fn with_threads(threads: usize, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(MdError::DeviceUnavailable {
                device: DeviceKind::Accelerator,
                reason: "completion timeout must be non-zero".to_string(),
            });
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("nexus-md-accel-{i}"))
            .panic_handler(|_| log::error!("accelerator worker panicked"))
            .build()
            .map_err(|e| MdError::DeviceUnavailable {
                device: DeviceKind::Accelerator,
                reason: e.to_string(),
            })?;
        log::info!(
            "accelerator ready: {} worker(s), completion timeout {:?}",
            pool.current_num_threads(),
            timeout
        );
        Ok(Self { pool, timeout })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Device for AcceleratorDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Accelerator
    }

    fn evaluate(&self, terms: &[Arc<dyn ForceTerm>], state: &SystemState) -> Result<Vec<TermOutput>> {
        // The job must be 'static to be abandoned on timeout, so it gets its
        // own snapshot rather than a borrow of the live state.
        let snapshot = Arc::new(state.clone());
        let terms: Vec<Arc<dyn ForceTerm>> = terms.to_vec();
        let (tx, rx) = mpsc::channel();

        self.pool.spawn(move || {
            let result: Result<Vec<TermOutput>> = terms
                .par_iter()
                .map(|term| term.evaluate_parallel(&snapshot))
                .collect();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(MdError::DeviceError {
                device: DeviceKind::Accelerator,
                reason: format!("force evaluation did not complete within {:?}", self.timeout),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(MdError::DeviceError {
                device: DeviceKind::Accelerator,
                reason: "worker exited without producing forces".to_string(),
            }),
        }
    }
}
