//! Incremental graph construction.
//!
//! The builder owns a [`SizeBoundedGraph`] and works through two queues of
//! add and remove tasks. A monotonic manipulation index decides how queued
//! adds and removes interleave: the build loop always processes the oldest
//! pending task first, batching consecutive adds. Between queue steps the
//! builder spends `swap_tries` attempts on randomized local edge swaps that
//! lower the total edge weight.
//!
//! Queues live behind an `Arc`, so a [`BuilderHandle`] can feed entries and
//! signal stop from another thread while an infinite build runs.

mod extend;
mod improve;
mod repair;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::warn;

use crate::error::{DegError, Result};
use crate::graph::{SearchGraph, SizeBoundedGraph};
use crate::space::{FeatureView, FloatSpace};

/// How the builder selects edges for a new vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationTarget {
    /// Single-threaded scheme for data whose local intrinsic dimensionality
    /// is unknown or changes over time. Steals the worst edge of each chosen
    /// neighbor and repairs the leftovers afterwards.
    #[default]
    StreamingData,
    /// Minimizes edge distortion when connecting the new vertex. Good for
    /// low-LID datasets.
    LowLid,
    /// Displaces the worst edge of each chosen neighbor. Good for high-LID
    /// datasets and tight search budgets.
    HighLid,
}

/// Counters published to the build callback after every step.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuilderStatus {
    /// Build loop iterations so far.
    pub step: u64,
    /// Vertices added to the graph.
    pub added: u64,
    /// Vertices removed from the graph.
    pub deleted: u64,
    /// Successful edge improvements.
    pub improved: u64,
    /// Attempted edge improvements.
    pub tries: u64,
}

/// Returned by the build callback to keep going or wind down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildControl {
    Continue,
    Stop,
}

/// Tuning knobs for [`GraphBuilder`].
///
/// `extend_k` and `improve_k` of zero fall back to the graph's
/// `edges_per_vertex`.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub optimization_target: OptimizationTarget,
    pub extend_k: u32,
    pub extend_eps: f32,
    pub improve_k: u32,
    pub improve_eps: f32,
    /// Maximum recursion depth of one improvement walk.
    pub max_path_length: u8,
    /// Improvement attempts per build step.
    pub swap_tries: u32,
    /// Extra attempts granted whenever an improvement succeeds.
    pub additional_swap_tries: u32,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            optimization_target: OptimizationTarget::StreamingData,
            extend_k: 0,
            extend_eps: 0.2,
            improve_k: 0,
            improve_eps: 0.001,
            max_path_length: 5,
            swap_tries: 1,
            additional_swap_tries: 1,
        }
    }
}

pub(crate) struct AddTask {
    pub label: u32,
    pub manipulation_index: u64,
    pub feature: Vec<u8>,
}

pub(crate) struct RemoveTask {
    pub label: u32,
    pub manipulation_index: u64,
}

struct SharedQueues {
    adds: Mutex<VecDeque<AddTask>>,
    removes: Mutex<VecDeque<RemoveTask>>,
    manipulation_counter: AtomicU64,
    stop: AtomicBool,
    work_available: Condvar,
}

impl SharedQueues {
    fn new() -> Self {
        Self {
            adds: Mutex::new(VecDeque::new()),
            removes: Mutex::new(VecDeque::new()),
            manipulation_counter: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            work_available: Condvar::new(),
        }
    }

    fn next_manipulation_index(&self) -> u64 {
        self.manipulation_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn push_add(&self, task: AddTask) {
        self.adds.lock().push_back(task);
        self.work_available.notify_one();
    }

    fn push_remove(&self, task: RemoveTask) {
        self.removes.lock().push_back(task);
        self.work_available.notify_one();
    }
}

/// Clonable handle for feeding a running build from other threads.
#[derive(Clone)]
pub struct BuilderHandle {
    shared: Arc<SharedQueues>,
    space: FloatSpace,
}

impl BuilderHandle {
    /// Queue a vertex for insertion. Validates shape and element type; a
    /// label that turns out to be a duplicate at insert time is skipped with
    /// a warning.
    pub fn add_entry(&self, label: u32, feature: FeatureView<'_>) -> Result<()> {
        let bytes = self.space.encode(feature)?;
        self.shared.push_add(AddTask {
            label,
            manipulation_index: self.shared.next_manipulation_index(),
            feature: bytes,
        });
        Ok(())
    }

    /// Queue a vertex for removal.
    pub fn remove_entry(&self, label: u32) {
        self.shared.push_remove(RemoveTask {
            label,
            manipulation_index: self.shared.next_manipulation_index(),
        });
    }

    /// Ask the build loop to stop after its current step.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        self.shared.work_available.notify_all();
    }
}

enum Work {
    Extend(Vec<AddTask>),
    Reduce(RemoveTask),
}

/// Builds and maintains an even-regular exploration graph.
pub struct GraphBuilder {
    pub(crate) graph: SizeBoundedGraph,
    pub(crate) rng: StdRng,
    pub(crate) optimization_target: OptimizationTarget,
    pub(crate) extend_k: usize,
    pub(crate) extend_eps: f32,
    pub(crate) improve_k: usize,
    pub(crate) improve_eps: f32,
    pub(crate) max_path_length: u8,
    swap_tries: u32,
    additional_swap_tries: u32,
    shared: Arc<SharedQueues>,
    status: BuilderStatus,
    pub(crate) thread_count: usize,
    batch_size: usize,
    pub(crate) improve_cursor: u32,
    pub(crate) pool: Option<rayon::ThreadPool>,
}

impl GraphBuilder {
    pub fn new(graph: SizeBoundedGraph, rng: StdRng, config: BuilderConfig) -> Self {
        let k = graph.edges_per_vertex();
        if k % 2 != 0 {
            warn!(edges_per_vertex = k, "odd degree, insertion wires edges in pairs and may leave holes");
        }
        let extend_k = if config.extend_k == 0 {
            k
        } else {
            config.extend_k as usize
        };
        let improve_k = if config.improve_k == 0 {
            k
        } else {
            config.improve_k as usize
        };
        Self {
            graph,
            rng,
            optimization_target: config.optimization_target,
            extend_k,
            extend_eps: config.extend_eps,
            improve_k,
            improve_eps: config.improve_eps,
            max_path_length: config.max_path_length,
            swap_tries: config.swap_tries,
            additional_swap_tries: config.additional_swap_tries,
            shared: Arc::new(SharedQueues::new()),
            status: BuilderStatus::default(),
            thread_count: 1,
            batch_size: 32,
            improve_cursor: 0,
            pool: None,
        }
    }

    /// Builder with default tuning and a seeded generator.
    pub fn with_seed(graph: SizeBoundedGraph, seed: u64) -> Self {
        Self::new(graph, StdRng::seed_from_u64(seed), BuilderConfig::default())
    }

    #[must_use]
    pub fn graph(&self) -> &SizeBoundedGraph {
        &self.graph
    }

    #[must_use]
    pub fn into_graph(self) -> SizeBoundedGraph {
        self.graph
    }

    #[must_use]
    pub fn status(&self) -> &BuilderStatus {
        &self.status
    }

    /// Handle for feeding this builder from another thread.
    #[must_use]
    pub fn handle(&self) -> BuilderHandle {
        BuilderHandle {
            shared: Arc::clone(&self.shared),
            space: self.graph.feature_space().clone(),
        }
    }

    /// Queue a vertex for insertion, rejecting labels already in the graph.
    pub fn add_entry(&self, label: u32, feature: FeatureView<'_>) -> Result<()> {
        if self.graph.has_vertex(label) {
            return Err(DegError::DuplicateLabel(label));
        }
        let bytes = self.graph.feature_space().encode(feature)?;
        self.shared.push_add(AddTask {
            label,
            manipulation_index: self.shared.next_manipulation_index(),
            feature: bytes,
        });
        Ok(())
    }

    /// Queue a vertex for removal.
    pub fn remove_entry(&self, label: u32) {
        self.shared.push_remove(RemoveTask {
            label,
            manipulation_index: self.shared.next_manipulation_index(),
        });
    }

    #[must_use]
    pub fn num_new_entries(&self) -> usize {
        self.shared.adds.lock().len()
    }

    #[must_use]
    pub fn num_remove_entries(&self) -> usize {
        self.shared.removes.lock().len()
    }

    /// Worker threads for batched insertion. The streaming target mutates
    /// the graph while searching it and stays single-threaded.
    pub fn set_thread_count(&mut self, threads: usize) {
        if self.optimization_target == OptimizationTarget::StreamingData && threads > 1 {
            warn!("the streaming target is single-threaded, ignoring thread count");
            self.thread_count = 1;
            return;
        }
        self.thread_count = threads.max(1);
        self.batch_size = self.batch_size.max(self.thread_count * 64);
        self.pool = None;
    }

    /// Maximum number of queued adds processed per build step, expressed as
    /// task groups of `task_size` entries each.
    pub fn set_batch_size(&mut self, tasks_per_batch: usize, task_size: usize) {
        self.batch_size = (tasks_per_batch * task_size).max(1);
    }

    /// Ask the build loop to stop after its current step.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        self.shared.work_available.notify_all();
    }

    fn improvement_active(&self) -> bool {
        self.improve_k > 0
            && self.swap_tries > 0
            && self.graph.size() as usize > self.graph.edges_per_vertex()
    }

    fn next_work(&mut self, infinite: bool) -> Option<Work> {
        let mut adds = self.shared.adds.lock();
        let mut removes = self.shared.removes.lock();
        let add_head = adds
            .front()
            .map_or(u64::MAX, |task| task.manipulation_index);
        let remove_head = removes
            .front()
            .map_or(u64::MAX, |task| task.manipulation_index);

        if add_head < remove_head {
            // ordered mode handles one insert per step so the callback sees
            // every manipulation; batching is for the parallel targets
            let limit = if self.optimization_target == OptimizationTarget::StreamingData {
                1
            } else {
                self.batch_size
            };
            let mut batch = Vec::with_capacity(limit.min(adds.len()));
            while batch.len() < limit
                && adds
                    .front()
                    .is_some_and(|task| task.manipulation_index < remove_head)
            {
                if let Some(task) = adds.pop_front() {
                    batch.push(task);
                }
            }
            return Some(Work::Extend(batch));
        }
        if remove_head != u64::MAX {
            return Some(Work::Reduce(removes.pop_front()?));
        }

        // both queues are empty; in infinite mode with nothing to improve,
        // park briefly instead of spinning, then let the loop tick so the
        // callback and stop flag stay responsive
        if infinite && !self.improvement_active() && !self.shared.stop.load(Ordering::Relaxed) {
            drop(removes);
            self.shared
                .work_available
                .wait_for(&mut adds, Duration::from_millis(20));
        }
        None
    }

    fn queues_empty(&self) -> bool {
        self.shared.adds.lock().is_empty() && self.shared.removes.lock().is_empty()
    }

    /// Drain the queues and improve the graph.
    ///
    /// With `infinite` set the loop keeps running after the queues drain,
    /// either improving edges or parking until a [`BuilderHandle`] delivers
    /// more work or stop. The callback runs after every step and can end the
    /// build by returning [`BuildControl::Stop`].
    pub fn build<F>(&mut self, infinite: bool, mut callback: F) -> Result<&SizeBoundedGraph>
    where
        F: FnMut(&BuilderStatus) -> BuildControl,
    {
        loop {
            match self.next_work(infinite) {
                Some(Work::Extend(batch)) => {
                    let count = batch.len() as u64;
                    self.extend(batch)?;
                    self.status.added += count;
                }
                Some(Work::Reduce(task)) => {
                    self.reduce(task);
                    self.status.deleted += 1;
                }
                None => {}
            }

            if self.improvement_active() {
                let mut swap_try: i64 = 0;
                while swap_try < i64::from(self.swap_tries) {
                    self.status.tries += 1;
                    if self.improve_step() {
                        self.status.improved += 1;
                        swap_try -= i64::from(self.additional_swap_tries);
                    }
                    swap_try += 1;
                }
            }

            self.status.step += 1;
            let control = callback(&self.status);

            if self.shared.stop.load(Ordering::Relaxed) || control == BuildControl::Stop {
                break;
            }
            if !infinite && self.queues_empty() {
                break;
            }
        }
        Ok(&self.graph)
    }
}

/// Run swap-only improvement passes over a finished graph.
///
/// Runs `iterations` build steps with insertion disabled, one improvement
/// attempt per step, and returns the optimized graph.
pub fn optimize_edges(
    graph: SizeBoundedGraph,
    seed: u64,
    iterations: u64,
    improve_k: u32,
    improve_eps: f32,
    max_path_length: u8,
) -> Result<SizeBoundedGraph> {
    let config = BuilderConfig {
        improve_k,
        improve_eps,
        max_path_length,
        swap_tries: 1,
        additional_swap_tries: 0,
        ..BuilderConfig::default()
    };
    let mut builder = GraphBuilder::new(graph, StdRng::seed_from_u64(seed), config);
    builder.build(true, |status| {
        if status.step >= iterations {
            BuildControl::Stop
        } else {
            BuildControl::Continue
        }
    })?;
    Ok(builder.into_graph())
}
