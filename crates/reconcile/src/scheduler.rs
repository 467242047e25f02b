//! Dependency-gated parallel runner
//!
//! Nodes are dispatched to a bounded rayon pool as soon as every one of
//! their dependencies has completed successfully. Workers only run the
//! boxed task they were handed and send its output back over a channel;
//! the calling thread is the only one that ever touches run state.

use crate::context::CancelToken;
use crate::error::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::mpsc;

/// Work handed to a worker thread
pub(crate) type Task<T> = Box<dyn FnOnce() -> T + Send + 'static>;

/// What the coordinator decided for a ready node
pub(crate) enum Dispatch<T> {
    /// Nothing to do; the node counts as complete
    Done,
    /// The node failed before any work was started
    Failed,
    /// Run this on the pool
    Spawn(Task<T>),
}

/// Owner of run state, consulted on the calling thread only
pub(crate) trait Coordinator {
    type Output: Send + 'static;

    /// Decide what to do with a node whose dependencies are complete
    fn dispatch(&mut self, node: &str) -> Dispatch<Self::Output>;

    /// Record a finished task; return `false` if the node failed
    fn complete(&mut self, node: &str, output: Self::Output) -> bool;
}

/// How a run ended
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Outcome {
    /// Nodes that completed successfully, in completion order
    pub completed: Vec<String>,
    /// A node failed; nothing further was dispatched
    pub failed: bool,
    /// Cancellation stopped dispatching
    pub cancelled: bool,
}

/// Run `order` respecting `dependencies` with at most `jobs` tasks in flight
///
/// `order` gives dispatch priority among ready nodes. Dependencies that are
/// not in `order` are ignored.
pub(crate) fn run<C: Coordinator>(
    order: &[String],
    dependencies: &HashMap<String, Vec<String>>,
    jobs: usize,
    cancel: &CancelToken,
    coordinator: &mut C,
) -> Result<Outcome> {
    let index: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, n)| (n.as_str(), i))
        .collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); order.len()];
    let mut remaining: Vec<usize> = vec![0; order.len()];
    for (i, name) in order.iter().enumerate() {
        for dep in dependencies.get(name).into_iter().flatten() {
            if let Some(&d) = index.get(dep.as_str())
                && d != i
            {
                dependents[d].push(i);
                remaining[i] += 1;
            }
        }
    }
    let mut ready: BTreeSet<usize> = (0..order.len()).filter(|i| remaining[*i] == 0).collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .thread_name(|i| format!("cairn-worker-{i}"))
        .build()
        .map_err(|e| Error::State(format!("failed to create worker pool: {e}")))?;
    let (tx, rx) = mpsc::channel::<(usize, C::Output)>();

    let mut outcome = Outcome::default();
    let mut in_flight = 0usize;

    loop {
        while in_flight < jobs.max(1) && !outcome.failed {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            let Some(i) = ready.pop_first() else { break };
            let name = &order[i];
            match coordinator.dispatch(name) {
                Dispatch::Done => {
                    outcome.completed.push(name.clone());
                    release(i, &dependents, &mut remaining, &mut ready);
                }
                Dispatch::Failed => outcome.failed = true,
                Dispatch::Spawn(task) => {
                    log::debug!("Dispatching {name}");
                    let tx = tx.clone();
                    pool.spawn(move || {
                        let output = task();
                        // The receiver outlives every task
                        let _ = tx.send((i, output));
                    });
                    in_flight += 1;
                }
            }
        }

        if in_flight == 0 {
            break;
        }

        let (i, output) = rx
            .recv()
            .map_err(|_| Error::State("worker channel closed".to_string()))?;
        in_flight -= 1;
        let name = &order[i];
        if coordinator.complete(name, output) {
            log::debug!("Completed {name}");
            outcome.completed.push(name.clone());
            release(i, &dependents, &mut remaining, &mut ready);
        } else {
            log::debug!("Failed {name}");
            outcome.failed = true;
        }
    }

    Ok(outcome)
}

fn release(
    i: usize,
    dependents: &[Vec<usize>],
    remaining: &mut [usize],
    ready: &mut BTreeSet<usize>,
) {
    for &j in &dependents[i] {
        remaining[j] -= 1;
        if remaining[j] == 0 {
            ready.insert(j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    /// Records start and finish of every node
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        fail: Option<&'static str>,
        live: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Recorder {
        fn new(fail: Option<&'static str>) -> Self {
            Self {
                log: Arc::default(),
                fail,
                live: Arc::default(),
                peak: Arc::default(),
            }
        }
    }

    impl Coordinator for Recorder {
        type Output = bool;

        fn dispatch(&mut self, node: &str) -> Dispatch<bool> {
            self.log.lock().unwrap().push(format!("start {node}"));
            let ok = self.fail != Some(node);
            let live = self.live.clone();
            let peak = self.peak.clone();
            Dispatch::Spawn(Box::new(move || {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(40));
                live.fetch_sub(1, Ordering::SeqCst);
                ok
            }))
        }

        fn complete(&mut self, node: &str, ok: bool) -> bool {
            self.log.lock().unwrap().push(format!("end {node}"));
            ok
        }
    }

    fn deps(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.iter().map(|s| (*s).to_string()).collect()))
            .collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_dependent_waits_for_dependency() {
        let mut rec = Recorder::new(None);
        let outcome = run(
            &names(&["A", "B"]),
            &deps(&[("B", &["A"])]),
            4,
            &CancelToken::new(),
            &mut rec,
        )
        .unwrap();
        assert_eq!(outcome.completed, vec!["A", "B"]);
        assert_eq!(
            *rec.log.lock().unwrap(),
            vec!["start A", "end A", "start B", "end B"]
        );
    }

    #[test]
    fn test_independent_nodes_overlap() {
        let mut rec = Recorder::new(None);
        run(
            &names(&["X", "Y"]),
            &HashMap::new(),
            4,
            &CancelToken::new(),
            &mut rec,
        )
        .unwrap();
        assert_eq!(rec.peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_jobs_bound_concurrency() {
        let mut rec = Recorder::new(None);
        run(
            &names(&["A", "B", "C"]),
            &HashMap::new(),
            1,
            &CancelToken::new(),
            &mut rec,
        )
        .unwrap();
        assert_eq!(rec.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_stops_dispatch() {
        let mut rec = Recorder::new(Some("A"));
        let outcome = run(
            &names(&["A", "B"]),
            &deps(&[("B", &["A"])]),
            4,
            &CancelToken::new(),
            &mut rec,
        )
        .unwrap();
        assert!(outcome.failed);
        assert!(outcome.completed.is_empty());
        assert!(!rec.log.lock().unwrap().contains(&"start B".to_string()));
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut rec = Recorder::new(None);
        let outcome = run(&names(&["A"]), &HashMap::new(), 4, &cancel, &mut rec).unwrap();
        assert!(outcome.cancelled);
        assert!(outcome.completed.is_empty());
    }
}
