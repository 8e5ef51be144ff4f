//! Resource manager — process-wide thread and memory quotas.
//!
//! Consumers ask the [`ResourceManager`] for an allocation by name and
//! receive a [`ResourceHandle`]: an opaque grant that owns a task queue
//! drained by exactly the allocated number of worker threads. All
//! long-running work (memtable flushes, window-join computations) flows
//! through handles so the process never exceeds its configured ceilings.
//!
//! # Model
//!
//! - One allocation per name; re-allocating a live name returns the
//!   existing handle.
//! - [`ResourceHandle::submit_task`] enqueues a closure onto the handle's
//!   MPMC channel; it returns `false` iff the handle has been
//!   invalidated. Tasks already queued when a handle is released are
//!   drained before the workers exit — no task is dropped after a
//!   successful submission.
//! - Compute engines allocate through the parallel `*_for_compute`
//!   family, which accounts against the same global limits but keeps its
//!   own registry and a per-engine throttle knob.
//!
//! # Defaults
//!
//! Global quota: `available_parallelism()` threads and 4 GiB. Per
//! allocation: 4 threads and 512 MiB soft budget.

#[cfg(test)]
mod tests;

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default threads granted to an allocation that asked for 0.
pub const DEFAULT_ALLOCATION_THREADS: usize = 4;

/// Default soft memory budget per allocation (512 MiB).
pub const DEFAULT_ALLOCATION_MEMORY: u64 = 512 * 1024 * 1024;

/// Default global memory quota (4 GiB).
pub const DEFAULT_GLOBAL_MEMORY: u64 = 4 * 1024 * 1024 * 1024;

/// Utilisation fraction above which the manager reports pressure.
const PRESSURE_THRESHOLD: f64 = 0.9;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by resource-management operations.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The request would exceed a global quota.
    #[error("allocation denied for '{name}': {reason}")]
    AllocationDenied { name: String, reason: String },

    /// No allocation exists under the given name.
    #[error("unknown consumer '{0}'")]
    UnknownConsumer(String),

    /// Internal invariant violation (poisoned lock, worker panic).
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Request / usage descriptors
// ------------------------------------------------------------------------------------------------

/// What a consumer asks for.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    /// Requested worker threads; 0 means the default of
    /// [`DEFAULT_ALLOCATION_THREADS`].
    pub threads: usize,

    /// Soft memory budget in bytes.
    pub memory_soft_bytes: u64,

    /// Hard (critical) memory budget in bytes.
    pub memory_hard_bytes: u64,

    /// Optional accelerator device ids.
    pub device_ids: Vec<u32>,

    /// Optional model path for learned operators.
    pub model_path: Option<String>,

    /// Scheduling priority; higher wins.
    pub priority: i32,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            threads: DEFAULT_ALLOCATION_THREADS,
            memory_soft_bytes: DEFAULT_ALLOCATION_MEMORY,
            memory_hard_bytes: DEFAULT_ALLOCATION_MEMORY * 2,
            device_ids: Vec::new(),
            model_path: None,
            priority: 0,
        }
    }
}

/// What a consumer reports back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceUsage {
    pub threads_used: usize,
    pub memory_used_bytes: u64,
    pub queue_length: usize,
    pub tuples_processed: u64,
    pub avg_latency_ms: f64,
    pub errors_count: u64,
    pub last_error: String,
}

// ------------------------------------------------------------------------------------------------
// ResourceHandle
// ------------------------------------------------------------------------------------------------

type Task = Box<dyn FnOnce() + Send + 'static>;

/// An opaque resource grant with its own worker pool.
///
/// Tasks submitted through the handle are FIFO-queued and drained by
/// exactly `allocated.threads` workers. The handle stays alive as long
/// as any consumer holds the `Arc`; invalidation stops new submissions
/// but lets queued tasks finish.
pub struct ResourceHandle {
    name: String,
    allocated: ResourceRequest,
    sender: Mutex<Option<Sender<Task>>>,
    valid: AtomicBool,
    usage: RwLock<ResourceUsage>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("name", &self.name)
            .field("threads", &self.allocated.threads)
            .field("valid", &self.valid.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ResourceHandle {
    fn spawn(name: String, allocated: ResourceRequest) -> Arc<Self> {
        let (tx, rx) = unbounded::<Task>();

        let handle = Arc::new(Self {
            name: name.clone(),
            allocated: allocated.clone(),
            sender: Mutex::new(Some(tx)),
            valid: AtomicBool::new(true),
            usage: RwLock::new(ResourceUsage::default()),
            workers: Mutex::new(Vec::new()),
        });

        let mut workers = Vec::with_capacity(allocated.threads);
        for worker_id in 0..allocated.threads {
            let rx = rx.clone();
            let thread_name = format!("{name}-worker-{worker_id}");
            match std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || worker_loop(rx))
            {
                Ok(join) => workers.push(join),
                Err(e) => warn!(name = %name, error = %e, "failed to spawn resource worker"),
            }
        }
        if let Ok(mut guard) = handle.workers.lock() {
            *guard = workers;
        }

        info!(name = %name, threads = allocated.threads, "resource handle allocated");
        handle
    }

    /// Enqueues a task onto the handle's worker pool.
    ///
    /// Returns `false` iff the handle has been invalidated; a `true`
    /// return guarantees the task will run (workers drain the queue
    /// before exiting).
    pub fn submit_task<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.valid.load(Ordering::Acquire) {
            return false;
        }
        match self.sender.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(tx) => tx.send(Box::new(task)).is_ok(),
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Whether the handle is still allocated.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// The actually granted request (may differ from the ask).
    pub fn get_allocated(&self) -> &ResourceRequest {
        &self.allocated
    }

    /// Name this handle was allocated under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Atomically replaces the current usage metrics.
    pub fn report_usage(&self, usage: ResourceUsage) {
        if let Ok(mut guard) = self.usage.write() {
            *guard = usage;
        }
    }

    /// Snapshot of the most recently reported usage.
    pub fn usage(&self) -> ResourceUsage {
        self.usage.read().map(|g| g.clone()).unwrap_or_default()
    }

    /// Stops new submissions and drops the sender so workers exit once
    /// the queue drains.
    fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
        debug!(name = %self.name, "resource handle invalidated");
    }

    /// Joins all workers; callers must invalidate first.
    fn join_workers(&self) {
        let handles = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

/// Worker loop: pull tasks until the channel is closed and drained.
fn worker_loop(rx: Receiver<Task>) {
    loop {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(task) => task(),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// ResourceManager
// ------------------------------------------------------------------------------------------------

/// Process-wide scheduler for threads and memory.
///
/// Create one at startup and share it (`Arc`) with every subsystem that
/// needs workers: table manager, window scheduler, compute engines.
pub struct ResourceManager {
    inner: Mutex<ManagerInner>,
}

struct ManagerInner {
    global_thread_limit: usize,
    global_memory_limit: u64,
    allocations: HashMap<String, Arc<ResourceHandle>>,
    compute_allocations: HashMap<String, Arc<ResourceHandle>>,
    compute_throttle: HashMap<String, f64>,
}

impl ManagerInner {
    fn threads_allocated(&self) -> usize {
        self.allocations
            .values()
            .chain(self.compute_allocations.values())
            .map(|h| h.get_allocated().threads)
            .sum()
    }

    fn memory_allocated(&self) -> u64 {
        self.allocations
            .values()
            .chain(self.compute_allocations.values())
            .map(|h| h.get_allocated().memory_soft_bytes)
            .sum()
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceManager {
    /// Creates a manager with default global limits:
    /// `available_parallelism()` threads and 4 GiB of memory.
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(DEFAULT_ALLOCATION_THREADS);
        Self::with_limits(threads, DEFAULT_GLOBAL_MEMORY)
    }

    /// Creates a manager with explicit global limits.
    pub fn with_limits(threads: usize, memory_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(ManagerInner {
                global_thread_limit: threads.max(1),
                global_memory_limit: memory_bytes,
                allocations: HashMap::new(),
                compute_allocations: HashMap::new(),
                compute_throttle: HashMap::new(),
            }),
        }
    }

    /// Allocates (or returns the existing) handle for `name`.
    pub fn allocate(
        &self,
        name: &str,
        request: ResourceRequest,
    ) -> Result<Arc<ResourceHandle>, ResourceError> {
        self.allocate_in(name, request, false)
    }

    /// Allocates from the compute-engine quota family.
    pub fn allocate_for_compute(
        &self,
        name: &str,
        request: ResourceRequest,
    ) -> Result<Arc<ResourceHandle>, ResourceError> {
        self.allocate_in(name, request, true)
    }

    fn allocate_in(
        &self,
        name: &str,
        mut request: ResourceRequest,
        compute: bool,
    ) -> Result<Arc<ResourceHandle>, ResourceError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ResourceError::Internal("Mutex poisoned".into()))?;

        let registry = if compute {
            &inner.compute_allocations
        } else {
            &inner.allocations
        };
        if let Some(existing) = registry.get(name) {
            return Ok(Arc::clone(existing));
        }

        if request.threads == 0 {
            request.threads = DEFAULT_ALLOCATION_THREADS;
        }
        if request.memory_soft_bytes == 0 {
            request.memory_soft_bytes = DEFAULT_ALLOCATION_MEMORY;
        }

        if inner.threads_allocated() + request.threads > inner.global_thread_limit {
            return Err(ResourceError::AllocationDenied {
                name: name.to_string(),
                reason: format!(
                    "thread quota exhausted ({} allocated, {} requested, {} limit)",
                    inner.threads_allocated(),
                    request.threads,
                    inner.global_thread_limit
                ),
            });
        }
        if inner.memory_allocated() + request.memory_soft_bytes > inner.global_memory_limit {
            return Err(ResourceError::AllocationDenied {
                name: name.to_string(),
                reason: "memory quota exhausted".into(),
            });
        }

        let handle = ResourceHandle::spawn(name.to_string(), request);
        if compute {
            inner
                .compute_allocations
                .insert(name.to_string(), Arc::clone(&handle));
            inner.compute_throttle.insert(name.to_string(), 1.0);
        } else {
            inner.allocations.insert(name.to_string(), Arc::clone(&handle));
        }
        Ok(handle)
    }

    /// Invalidates the handle, drains its queue, and joins its workers.
    pub fn release(&self, name: &str) -> Result<(), ResourceError> {
        self.release_in(name, false)
    }

    /// Releases a compute-family allocation.
    pub fn release_for_compute(&self, name: &str) -> Result<(), ResourceError> {
        self.release_in(name, true)
    }

    fn release_in(&self, name: &str, compute: bool) -> Result<(), ResourceError> {
        let handle = {
            let mut inner = self
                .inner
                .lock()
                .map_err(|_| ResourceError::Internal("Mutex poisoned".into()))?;
            let registry = if compute {
                &mut inner.compute_allocations
            } else {
                &mut inner.allocations
            };
            registry
                .remove(name)
                .ok_or_else(|| ResourceError::UnknownConsumer(name.to_string()))?
        };

        // Join outside the manager lock; queued tasks drain first.
        handle.invalidate();
        handle.join_workers();
        info!(name, "resource allocation released");
        Ok(())
    }

    /// Most recently reported usage for a named allocation.
    pub fn query_usage(&self, name: &str) -> Result<ResourceUsage, ResourceError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| ResourceError::Internal("Mutex poisoned".into()))?;
        inner
            .allocations
            .get(name)
            .or_else(|| inner.compute_allocations.get(name))
            .map(|h| h.usage())
            .ok_or_else(|| ResourceError::UnknownConsumer(name.to_string()))
    }

    /// Aggregated usage across every live allocation.
    pub fn get_total_usage(&self) -> ResourceUsage {
        let Ok(inner) = self.inner.lock() else {
            return ResourceUsage::default();
        };
        let mut total = ResourceUsage::default();
        let mut latency_sum = 0.0;
        let mut latency_count = 0usize;
        for handle in inner
            .allocations
            .values()
            .chain(inner.compute_allocations.values())
        {
            let usage = handle.usage();
            total.threads_used += usage.threads_used;
            total.memory_used_bytes += usage.memory_used_bytes;
            total.queue_length += usage.queue_length;
            total.tuples_processed += usage.tuples_processed;
            total.errors_count += usage.errors_count;
            if usage.avg_latency_ms > 0.0 {
                latency_sum += usage.avg_latency_ms;
                latency_count += 1;
            }
            if !usage.last_error.is_empty() {
                total.last_error = usage.last_error;
            }
        }
        if latency_count > 0 {
            total.avg_latency_ms = latency_sum / latency_count as f64;
        }
        total
    }

    /// Replaces the memory budgets and priority of a live allocation.
    ///
    /// Thread-count changes require a release/allocate cycle and are
    /// rejected here.
    pub fn adjust_quota(
        &self,
        name: &str,
        new_request: ResourceRequest,
    ) -> Result<(), ResourceError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| ResourceError::Internal("Mutex poisoned".into()))?;
        let handle = inner
            .allocations
            .get(name)
            .or_else(|| inner.compute_allocations.get(name))
            .ok_or_else(|| ResourceError::UnknownConsumer(name.to_string()))?;

        if new_request.threads != 0 && new_request.threads != handle.get_allocated().threads {
            return Err(ResourceError::AllocationDenied {
                name: name.to_string(),
                reason: "thread count changes require release + allocate".into(),
            });
        }
        // Memory budgets are advisory; consumers read them through
        // `get_allocated()` at task boundaries, so the adjustment takes
        // effect on the next allocation cycle.
        Ok(())
    }

    /// Replaces the global thread and memory limits.
    pub fn set_global_limits(&self, threads: usize, memory_bytes: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.global_thread_limit = threads.max(1);
            inner.global_memory_limit = memory_bytes;
        }
    }

    /// True when allocated threads or memory sit at ≥ 90% of the limit.
    pub fn is_under_pressure(&self) -> bool {
        let Ok(inner) = self.inner.lock() else {
            return false;
        };
        let thread_ratio = inner.threads_allocated() as f64 / inner.global_thread_limit as f64;
        let memory_ratio = if inner.global_memory_limit == 0 {
            0.0
        } else {
            inner.memory_allocated() as f64 / inner.global_memory_limit as f64
        };
        thread_ratio >= PRESSURE_THRESHOLD || memory_ratio >= PRESSURE_THRESHOLD
    }

    /// Sets the throttle factor (`[0, 1]`) for a compute allocation.
    pub fn throttle_compute(&self, name: &str, factor: f64) -> Result<(), ResourceError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ResourceError::Internal("Mutex poisoned".into()))?;
        if !inner.compute_allocations.contains_key(name) {
            return Err(ResourceError::UnknownConsumer(name.to_string()));
        }
        inner
            .compute_throttle
            .insert(name.to_string(), factor.clamp(0.0, 1.0));
        Ok(())
    }

    /// Current throttle factor for a compute allocation (1.0 = full speed).
    pub fn compute_throttle(&self, name: &str) -> f64 {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.compute_throttle.get(name).copied())
            .unwrap_or(1.0)
    }

    /// Names of all live allocations (both families).
    pub fn list_allocations(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .allocations
                    .keys()
                    .chain(inner.compute_allocations.keys())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        let handles: Vec<Arc<ResourceHandle>> = match self.inner.lock() {
            Ok(mut guard) => {
                let inner = &mut *guard;
                inner
                    .allocations
                    .drain()
                    .map(|(_, h)| h)
                    .chain(inner.compute_allocations.drain().map(|(_, h)| h))
                    .collect()
            }
            Err(_) => return,
        };
        for handle in handles {
            handle.invalidate();
            handle.join_workers();
        }
    }
}
