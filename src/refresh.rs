//! Background gene-expression reload.
//!
//! Decode and rescale work runs on a single `reload-worker` thread, in
//! request order. Only the install of the finished [`ExpressionSet`] takes
//! the result lock, so the render context never waits on decoding and never
//! sees a half-replaced set.

use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use web_time::Instant;

use crate::encoding::{ExpressionSet, ExpressionSource};
use crate::error::CloudError;

/// Reload lifecycle as seen by the render context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RefreshState {
    /// No reload running; the installed set is current.
    #[default]
    Idle,
    /// A reload is queued or running.
    Loading,
    /// The last queued reload failed. The previous set is still installed.
    /// Stays until acknowledged or the next reload is queued.
    Failed(String),
}

enum ReloadRequest {
    Reload(Vec<usize>),
    Shutdown,
}

struct Slot {
    state: RefreshState,
    expression: Arc<ExpressionSet>,
    selection: Vec<usize>,
    generation: u64,
    pending: usize,
    last_error: Option<String>,
}

struct Shared {
    slot: Mutex<Slot>,
    settled: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        // Slot updates are single assignments; a panic cannot leave it torn.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the reload worker and the installed [`ExpressionSet`].
pub struct RefreshController {
    request_tx: mpsc::Sender<ReloadRequest>,
    shared: Arc<Shared>,
    source: Arc<dyn ExpressionSource>,
    thread: Option<JoinHandle<()>>,
}

impl RefreshController {
    /// Spawn the worker with `initial` installed as generation 0.
    ///
    /// # Errors
    ///
    /// [`CloudError::ThreadSpawn`] if the worker thread cannot start.
    pub fn new(
        source: Arc<dyn ExpressionSource>,
        initial: Arc<ExpressionSet>,
    ) -> Result<Self, CloudError> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                state: RefreshState::Idle,
                selection: initial.genes().to_vec(),
                expression: initial,
                generation: 0,
                pending: 0,
                last_error: None,
            }),
            settled: Condvar::new(),
        });
        let (request_tx, request_rx) = mpsc::channel::<ReloadRequest>();

        let thread = {
            let shared = Arc::clone(&shared);
            let source = Arc::clone(&source);
            std::thread::Builder::new()
                .name("reload-worker".into())
                .spawn(move || Self::thread_loop(&request_rx, &shared, &*source))
                .map_err(CloudError::ThreadSpawn)?
        };

        Ok(Self {
            request_tx,
            shared,
            source,
            thread: Some(thread),
        })
    }

    /// Queue a reload of `selection` (empty = random sample). Returns once
    /// queued; the state is [`RefreshState::Loading`] until it settles.
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] if a gene is out of range (nothing is queued),
    /// [`CloudError::Io`] if the worker has stopped.
    pub fn trigger_reload(&self, selection: Vec<usize>) -> Result<(), CloudError> {
        self.source.validate(&selection)?;

        let mut slot = self.shared.lock();
        if self
            .request_tx
            .send(ReloadRequest::Reload(selection))
            .is_err()
        {
            return Err(CloudError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "reload worker has stopped",
            )));
        }
        slot.pending += 1;
        slot.state = RefreshState::Loading;
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RefreshState {
        self.shared.lock().state.clone()
    }

    /// Whether a reload is queued or running.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.shared.lock().state == RefreshState::Loading
    }

    /// Clear a [`RefreshState::Failed`] state back to idle and take the
    /// most recent failure message, including one from a reload that was
    /// followed by further queued requests.
    pub fn acknowledge_failure(&self) -> Option<String> {
        let mut slot = self.shared.lock();
        if matches!(slot.state, RefreshState::Failed(_)) {
            slot.state = RefreshState::Idle;
        }
        slot.last_error.take()
    }

    /// Most recent failure message not yet acknowledged.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    /// Most recently installed set.
    #[must_use]
    pub fn expression(&self) -> Arc<ExpressionSet> {
        Arc::clone(&self.shared.lock().expression)
    }

    /// Resolved gene indices of the installed set.
    #[must_use]
    pub fn selection(&self) -> Vec<usize> {
        self.shared.lock().selection.clone()
    }

    /// Number of sets installed since construction.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    /// The installed set, if its generation is newer than `seen`.
    #[must_use]
    pub fn poll(&self, seen: u64) -> Option<(u64, Arc<ExpressionSet>)> {
        let slot = self.shared.lock();
        (slot.generation > seen)
            .then(|| (slot.generation, Arc::clone(&slot.expression)))
    }

    /// Block until every queued reload has settled. Returns `false` on
    /// timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let slot = self.shared.lock();
        let (slot, result) = self
            .shared
            .settled
            .wait_timeout_while(slot, timeout, |s| s.pending > 0)
            .unwrap_or_else(PoisonError::into_inner);
        drop(slot);
        !result.timed_out()
    }

    /// Stop the worker after it drains queued requests, and join it.
    pub fn shutdown(&mut self) {
        let _ = self.request_tx.send(ReloadRequest::Shutdown);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::warn!("reload worker panicked");
            }
        }
    }

    fn thread_loop(
        request_rx: &mpsc::Receiver<ReloadRequest>,
        shared: &Shared,
        source: &dyn ExpressionSource,
    ) {
        while let Ok(request) = request_rx.recv() {
            let selection = match request {
                ReloadRequest::Shutdown => break,
                ReloadRequest::Reload(selection) => selection,
            };
            shared.lock().state = RefreshState::Loading;

            let start = Instant::now();
            let result = source.fetch(selection);
            let elapsed = start.elapsed();

            let mut slot = shared.lock();
            slot.pending = slot.pending.saturating_sub(1);
            match result {
                Ok(set) => {
                    log::info!(
                        "reload: {} genes in {:.1}ms ({:?})",
                        set.len(),
                        elapsed.as_secs_f64() * 1000.0,
                        set.names()
                    );
                    slot.selection = set.genes().to_vec();
                    slot.expression = Arc::new(set);
                    slot.generation += 1;
                    slot.state = if slot.pending > 0 {
                        RefreshState::Loading
                    } else {
                        RefreshState::Idle
                    };
                }
                Err(e) => {
                    log::warn!("reload failed, keeping previous genes: {e}");
                    let message = e.to_string();
                    // Later requests are still queued: keep reporting Loading.
                    slot.state = if slot.pending > 0 {
                        RefreshState::Loading
                    } else {
                        RefreshState::Failed(message.clone())
                    };
                    slot.last_error = Some(message);
                }
            }
            drop(slot);
            shared.settled.notify_all();
        }
    }
}

impl Drop for RefreshController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RefreshController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshController")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(10);

    /// One constant vector per gene. Gene 7 fails to decode; `gate` blocks
    /// fetches while a test holds it.
    struct FakeSource {
        gate: Mutex<()>,
    }

    impl FakeSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Mutex::new(()),
            })
        }
    }

    impl ExpressionSource for FakeSource {
        fn validate(&self, selection: &[usize]) -> Result<(), CloudError> {
            match selection.iter().find(|&&g| g >= 10) {
                Some(&g) => Err(CloudError::gene_index(g, 10)),
                None => Ok(()),
            }
        }

        fn fetch(&self, selection: Vec<usize>) -> Result<ExpressionSet, CloudError> {
            let _open = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            if selection.contains(&7) {
                return Err(CloudError::Format("gene 7 is corrupt".into()));
            }
            let names = selection.iter().map(|g| format!("g{g}")).collect();
            let vectors = selection.iter().map(|&g| vec![g as f32; 4]).collect();
            let max_list = vec![10.0; selection.len()];
            ExpressionSet::new(selection, names, vectors, max_list)
        }
    }

    fn controller(source: &Arc<FakeSource>) -> RefreshController {
        let initial = source.fetch(vec![0]).unwrap();
        RefreshController::new(source.clone(), Arc::new(initial)).unwrap()
    }

    #[test]
    fn reload_installs_new_generation() {
        let source = FakeSource::new();
        let ctl = controller(&source);
        assert_eq!(ctl.state(), RefreshState::Idle);
        assert!(ctl.poll(0).is_none());

        ctl.trigger_reload(vec![3, 4]).unwrap();
        assert!(ctl.wait_idle(WAIT));
        assert_eq!(ctl.state(), RefreshState::Idle);
        let (generation, set) = ctl.poll(0).unwrap();
        assert_eq!(generation, 1);
        assert_eq!(set.names(), &["g3", "g4"]);
        assert_eq!(ctl.selection(), vec![3, 4]);
        assert!(ctl.poll(generation).is_none());
    }

    #[test]
    fn loading_until_fetch_completes() {
        let source = FakeSource::new();
        let ctl = controller(&source);
        let gate = source.gate.lock().unwrap();
        ctl.trigger_reload(vec![2]).unwrap();
        assert!(ctl.is_loading());
        assert!(!ctl.wait_idle(Duration::from_millis(20)));
        drop(gate);
        assert!(ctl.wait_idle(WAIT));
        assert!(!ctl.is_loading());
    }

    #[test]
    fn invalid_selection_is_rejected_before_queueing() {
        let source = FakeSource::new();
        let ctl = controller(&source);
        assert!(matches!(
            ctl.trigger_reload(vec![1, 12]),
            Err(CloudError::Index { index: 12, .. })
        ));
        assert_eq!(ctl.state(), RefreshState::Idle);
        assert!(ctl.wait_idle(Duration::ZERO));
    }

    #[test]
    fn failure_keeps_previous_set() {
        let source = FakeSource::new();
        let ctl = controller(&source);
        ctl.trigger_reload(vec![5]).unwrap();
        ctl.trigger_reload(vec![6, 7]).unwrap();
        assert!(ctl.wait_idle(WAIT));

        assert!(matches!(ctl.state(), RefreshState::Failed(_)));
        assert_eq!(ctl.expression().names(), &["g5"]);
        assert_eq!(ctl.generation(), 1);

        assert!(ctl.acknowledge_failure().unwrap().contains("gene 7"));
        assert_eq!(ctl.state(), RefreshState::Idle);
        assert!(ctl.acknowledge_failure().is_none());
    }

    #[test]
    fn next_reload_clears_failure() {
        let source = FakeSource::new();
        let ctl = controller(&source);
        ctl.trigger_reload(vec![7]).unwrap();
        assert!(ctl.wait_idle(WAIT));
        assert!(matches!(ctl.state(), RefreshState::Failed(_)));
        ctl.trigger_reload(vec![1]).unwrap();
        assert!(ctl.wait_idle(WAIT));
        assert_eq!(ctl.state(), RefreshState::Idle);
        assert!(ctl.last_error().unwrap().contains("gene 7"));
    }

    /// Fetches wait for one permit each, so a test can settle requests one
    /// at a time.
    struct SteppedSource {
        inner: Arc<FakeSource>,
        permits: Mutex<mpsc::Receiver<()>>,
    }

    impl ExpressionSource for SteppedSource {
        fn validate(&self, selection: &[usize]) -> Result<(), CloudError> {
            self.inner.validate(selection)
        }

        fn fetch(&self, selection: Vec<usize>) -> Result<ExpressionSet, CloudError> {
            let permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = permits.recv();
            drop(permits);
            self.inner.fetch(selection)
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn failure_with_queued_requests_stays_loading() {
        let (permit_tx, permit_rx) = mpsc::channel();
        let inner = FakeSource::new();
        let initial = inner.fetch(vec![0]).unwrap();
        let source = Arc::new(SteppedSource {
            inner,
            permits: Mutex::new(permit_rx),
        });
        let ctl = RefreshController::new(source, Arc::new(initial)).unwrap();

        ctl.trigger_reload(vec![7]).unwrap();
        ctl.trigger_reload(vec![2]).unwrap();
        permit_tx.send(()).unwrap();
        assert!(wait_for(|| ctl.last_error().is_some()));
        assert_eq!(ctl.state(), RefreshState::Loading);
        assert!(ctl.is_loading());
        assert_eq!(ctl.generation(), 0);

        permit_tx.send(()).unwrap();
        assert!(ctl.wait_idle(WAIT));
        assert_eq!(ctl.state(), RefreshState::Idle);
        assert_eq!(ctl.expression().names(), &["g2"]);
        assert!(ctl.acknowledge_failure().unwrap().contains("gene 7"));
        assert!(ctl.last_error().is_none());
    }

    #[test]
    fn concurrent_triggers_leave_consistent_set() {
        let source = FakeSource::new();
        let ctl = controller(&source);
        std::thread::scope(|s| {
            for t in 0..4usize {
                let ctl = &ctl;
                let _ = s.spawn(move || {
                    for i in 0..5 {
                        let genes: Vec<usize> = (0..=(t + i) % 4).collect();
                        ctl.trigger_reload(genes).unwrap();
                        let set = ctl.expression();
                        assert_eq!(set.names().len(), set.vectors().len());
                        assert_eq!(set.vectors().len(), set.max_list().len());
                    }
                });
            }
        });
        assert!(ctl.wait_idle(WAIT));
        assert_eq!(ctl.generation(), 20);
        let set = ctl.expression();
        assert_eq!(set.names().len(), set.vectors().len());
        assert_eq!(set.len(), set.max_list().len());
    }

    #[test]
    fn drop_joins_worker() {
        let source = FakeSource::new();
        let ctl = controller(&source);
        ctl.trigger_reload(vec![1]).unwrap();
        drop(ctl);
        assert_eq!(Arc::strong_count(&source), 1);
    }
}
