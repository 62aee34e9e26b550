//! Parallel execution of element-wise programs
//!
//! A [`WorkerPool`] owns a fixed set of worker threads and a reusable
//! [`Rendezvous`]. One evaluation splits the output into equal tasks,
//! hands them round-robin to the participating threads and runs the plain
//! driver on each task's flat range.
//!
//! Every worker passes the rendezvous twice: once after taking its
//! partition and once after finishing it. The second pass happens even
//! when a worker failed, so the pool is always reusable afterwards.

use crate::column::ColumnMut;
use crate::driver::{self, Evaluation, OutputSink, ThreadState};
use crate::error::{Result, RuntimeError};
use crate::iter::NdIter;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

// =============================================================================
// Rendezvous
// =============================================================================

#[derive(Debug, Default)]
struct Phase {
    count: usize,
    generation: u64,
}

/// Cyclic barrier for a fixed number of parties
#[derive(Debug)]
pub struct Rendezvous {
    parties: usize,
    phase: Mutex<Phase>,
    cvar: Condvar,
}

impl Rendezvous {
    pub fn new(parties: usize) -> Self {
        Self {
            parties: parties.max(1),
            phase: Mutex::new(Phase::default()),
            cvar: Condvar::new(),
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Block until all parties have arrived. Returns `true` for exactly one
    /// caller per cycle (the last to arrive).
    pub fn wait(&self) -> bool {
        let mut phase = self.phase.lock();
        let generation = phase.generation;
        phase.count += 1;
        if phase.count == self.parties {
            phase.count = 0;
            phase.generation = generation.wrapping_add(1);
            self.cvar.notify_all();
            return true;
        }
        while phase.generation == generation {
            self.cvar.wait(&mut phase);
        }
        false
    }
}

// =============================================================================
// Per-thread partitions
// =============================================================================

enum StateSlot<'s> {
    /// The caller's own state, used by thread 0
    Borrowed(&'s mut ThreadState),
    Owned(ThreadState),
}

impl StateSlot<'_> {
    fn get(&mut self) -> &mut ThreadState {
        match self {
            StateSlot::Borrowed(state) => state,
            StateSlot::Owned(state) => state,
        }
    }
}

struct Task<'o> {
    start: usize,
    out: ColumnMut<'o>,
}

struct Bundle<'s, 'o> {
    state: StateSlot<'s>,
    it: NdIter,
    tasks: Vec<Task<'o>>,
}

impl Bundle<'_, '_> {
    fn run(&mut self, ev: &Evaluation<'_, '_>, abort: &AtomicBool) -> Result<()> {
        let state = self.state.get();
        for task in self.tasks.drain(..) {
            if abort.load(Ordering::Acquire) {
                break;
            }
            let end = task.start + task.out.len();
            self.it.set_range(task.start, end)?;
            let mut sink = OutputSink {
                data: task.out,
                base: task.start,
            };
            driver::run_plain(ev, state, &mut self.it, &mut sink)?;
        }
        Ok(())
    }
}

/// Elements per task: a whole number of blocks, about `tasks_per_thread`
/// tasks for each thread
pub fn task_size(len: usize, block: usize, threads: usize, tasks_per_thread: usize) -> usize {
    let block = block.max(1);
    let per_task = tasks_per_thread.max(1) * block * threads.max(1);
    len.div_ceil(per_task).max(1) * block
}

// =============================================================================
// Worker pool
// =============================================================================

/// Fixed-size thread pool for element-wise evaluations
#[derive(Debug)]
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
    rendezvous: Rendezvous,
    /// Serializes evaluations on this pool
    lock: Mutex<()>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("fusevm-worker-{}", i))
            .build()
            .map_err(|e| RuntimeError::Other(format!("cannot start worker pool: {}", e)))?;
        debug!(threads, "worker pool started");
        Ok(Self {
            pool,
            threads,
            rendezvous: Rendezvous::new(threads),
            lock: Mutex::new(()),
        })
    }

    #[inline]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Evaluate a plain program over every element of `it` using up to
    /// `threads` workers. `out` must cover the whole iteration space with
    /// output operand 0 laid out contiguously.
    pub fn run_plain(
        &self,
        ev: &Evaluation<'_, '_>,
        state: &mut ThreadState,
        it: &NdIter,
        out: ColumnMut<'_>,
        threads: usize,
        tasks_per_thread: usize,
    ) -> Result<()> {
        if ev.accumulate.is_some() {
            return Err(RuntimeError::Unsupported(
                "reductions cannot run in parallel".to_string(),
            ));
        }
        let len = it.size();
        if out.len() != len {
            return Err(RuntimeError::Shape(format!(
                "output holds {} elements for an iteration of {}",
                out.len(),
                len
            )));
        }

        let _guard = self.lock.lock();
        let threads = threads.clamp(1, self.threads);
        let block = ev.params.block_size();
        let size = task_size(len, block, threads, tasks_per_thread);

        // Clones for threads 1.. are made up front; any failure drops them all
        let mut clones = Vec::with_capacity(threads - 1);
        for _ in 1..threads {
            clones.push(state.try_clone()?);
        }

        let mut bundles: Vec<Bundle<'_, '_>> = Vec::with_capacity(threads);
        bundles.push(Bundle {
            state: StateSlot::Borrowed(state),
            it: it.clone(),
            tasks: Vec::new(),
        });
        bundles.extend(clones.into_iter().map(|s| Bundle {
            state: StateSlot::Owned(s),
            it: it.clone(),
            tasks: Vec::new(),
        }));

        let chunks = out.split_chunks(size);
        let n_tasks = chunks.len();
        for (k, chunk) in chunks.into_iter().enumerate() {
            bundles[k % threads].tasks.push(Task {
                start: k * size,
                out: chunk,
            });
        }
        debug!(len, threads, task_size = size, tasks = n_tasks, "parallel partition");

        let slots: Vec<Mutex<Option<Bundle<'_, '_>>>> = bundles.into_iter().map(|b| Mutex::new(Some(b))).collect();
        let abort = AtomicBool::new(false);
        let first_error: Mutex<Option<RuntimeError>> = Mutex::new(None);

        self.pool.broadcast(|ctx| {
            let bundle = slots.get(ctx.index()).and_then(|slot| slot.lock().take());
            self.rendezvous.wait();

            if let Some(mut bundle) = bundle {
                if let Err(err) = bundle.run(ev, &abort) {
                    abort.store(true, Ordering::Release);
                    let mut slot = first_error.lock();
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                }
            }

            self.rendezvous.wait();
        });

        match first_error.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
