//! Executor: staged orchestration of a load run
//!
//! A [`LoadTest`] runs its [`Stage`]s strictly one after the other. Stages never
//! overlap: the next one starts generating only after the previous one has
//! been cancelled and its workers have drained.
//!
//! # Per-stage flow
//! 1. The stage's generation task is spawned. It sleeps `sequence_interval`,
//!    calls the generator and pushes the sequence onto a bounded queue of
//!    `capacity` sequences (blocking when full, so generation never runs away
//!    from consumption).
//! 2. A duration timer of `load_time` starts.
//! 3. The driver waits on either a new sequence, which it submits to the
//!    stage's [`WorkerPool`] as an independent task, or the timer. The timer
//!    takes precedence, also while a submission waits for room in the pool.
//! 4. When the timer fires the generation is cancelled, the queue is closed and
//!    the stage's [`Stage::ready`] signal fires.
//! 5. The pool is stopped: sequences still queued for a worker are discarded,
//!    running ones are waited for (drain, not abort). Results of those keep
//!    arriving after the stage's ready signal.
//! 6. If a `stage_interval` is configured the driver pauses before the next
//!    stage.
//!
//! After the last stage every result stream is closed and the global
//! completion signal fires.
//!
//! # Result delivery
//! Results are published best-effort: each one is offered without blocking to
//! the stage stream and to the global stream, and dropped from any stream that
//! has no receiver ready at that moment. Executors never wait on consumers,
//! at the price of consumers possibly missing results. Buffered channels
//! (a caller-supplied [`StageConfig::results`] channel, or the load test's
//! `result_buffer`) reduce the loss.
mod sequence;
pub mod stage;

pub use stage::{Stage, StageConfig};

use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use typed_builder::TypedBuilder;

use crate::{
    LoadResult,
    pool::WorkerPool,
    signal::Completion,
    transport::{HttpTransport, Transport},
};
use sequence::{Publisher, SequenceContext, run_sequence};

/// An ordered list of stages sharing one transport.
///
/// ```rust,no_run
/// use std::{sync::Arc, time::Duration};
/// use stageload::{HttpTransport, LoadTest, RequestDescriptor, Stage, StageConfig};
///
/// # async fn run() -> stageload::Result<()> {
/// let stage = Stage::new(
///     StageConfig::builder()
///         .name("steady")
///         .generator(Arc::new(|| {
///             vec![RequestDescriptor::get("http://localhost:3000/").unwrap()]
///         }))
///         .workers(8)
///         .load_time(Duration::from_secs(10))
///         .build(),
/// )?;
///
/// let run = LoadTest::builder()
///     .stages(vec![stage])
///     .transport(Arc::new(HttpTransport::default()))
///     .build()
///     .load();
///
/// while let Ok(result) = run.results.recv_async().await {
///     println!("{result:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(TypedBuilder)]
pub struct LoadTest<T: Transport> {
    pub stages: Vec<Stage>,
    /// Pause between one stage's drain and the next stage's start.
    #[builder(default)]
    pub stage_interval: Duration,
    /// Shared by every sequence of every stage.
    transport: Arc<T>,
    /// Buffer of the global result stream. Zero means results are only
    /// delivered to a receiver that is waiting at that moment.
    #[builder(default = 0)]
    pub result_buffer: usize,
    #[builder(default, setter(skip))]
    done: Completion,
}

impl LoadTest<HttpTransport> {
    /// A load test over a fresh [`HttpTransport`].
    pub fn new(stage_interval: Duration, stages: Vec<Stage>) -> Self {
        Self::builder()
            .stages(stages)
            .stage_interval(stage_interval)
            .transport(Arc::new(HttpTransport::default()))
            .build()
    }
}

/// Handles to a run started with [`LoadTest::load`].
pub struct LoadRun {
    /// Results from every stage.
    pub results: flume::Receiver<LoadResult>,
    /// Fires after every stage has drained and all streams are closed.
    pub done: Completion,
    pub handle: JoinHandle<()>,
}

impl<T: Transport> LoadTest<T> {
    /// The global completion signal.
    pub fn done(&self) -> Completion {
        self.done.clone()
    }

    /// Starts the run in the background.
    pub fn load(self) -> LoadRun {
        let (tx, rx) = flume::bounded(self.result_buffer);
        let done = self.done.clone();
        let handle = tokio::spawn(self.run(tx));
        LoadRun {
            results: rx,
            done,
            handle,
        }
    }

    async fn run(mut self, global: flume::Sender<LoadResult>) {
        let total = self.stages.len();
        tracing::info!("Starting load test with {total} stages...");

        for (i, stage) in self.stages.iter().enumerate() {
            tracing::info!("Starting stage {}/{total}: {}", i + 1, stage.name);
            self.run_stage(stage, &global).await;
            tracing::info!("Finished stage {}/{total}: {}", i + 1, stage.name);

            if i + 1 < total && !self.stage_interval.is_zero() {
                tracing::debug!("Pausing {:?} before the next stage.", self.stage_interval);
                tokio::time::sleep(self.stage_interval).await;
            }
        }

        for stage in &mut self.stages {
            stage.results_tx.take();
        }
        drop(global);
        self.done.fire();
        tracing::info!("Load test done!");
    }

    async fn run_stage(&self, stage: &Stage, global: &flume::Sender<LoadResult>) {
        let pool = match WorkerPool::new(stage.workers, stage.capacity) {
            Ok(pool) => pool,
            Err(e) => {
                tracing::error!("Skipping stage {}: {e}", stage.name);
                stage.cancel.cancel();
                stage.done.fire();
                return;
            }
        };

        let ctx = Arc::new(SequenceContext {
            stage: stage.name.clone(),
            request_interval: stage.request_interval,
            transport: self.transport.clone(),
            publisher: Publisher {
                stage: stage.results_tx.clone(),
                global: global.clone(),
            },
        });

        let (queue_tx, mut queue) = mpsc::channel(stage.capacity);
        // Not awaited: the task exits by itself on cancellation or on the
        // closed queue.
        let _generation = stage.start_generation(queue_tx);

        let timer = tokio::time::sleep(stage.load_time);
        tokio::pin!(timer);
        let mut queue_open = true;
        let mut dispatched = 0usize;

        // The timer is always polled first, also while a submission waits
        // for room in the pool, so the stage ends on time.
        loop {
            tokio::select! {
                biased;
                _ = &mut timer => break,
                sequence = queue.recv(), if queue_open => match sequence {
                    Some(sequence) => tokio::select! {
                        biased;
                        _ = &mut timer => break,
                        submitted = pool.submit(run_sequence(sequence, ctx.clone())) => match submitted {
                            Ok(()) => dispatched += 1,
                            Err(e) => tracing::warn!("Stage {}: dropping sequence: {e}", stage.name),
                        },
                    },
                    None => queue_open = false,
                },
            }
        }
        stage.cancel.cancel();
        queue.close();
        stage.done.fire();
        drop(queue);

        tracing::debug!(
            "Stage {}: time is up after {dispatched} sequences, draining {} in flight...",
            stage.name,
            pool.pending()
        );
        pool.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::StatusCode;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;
    use crate::{
        RequestDescriptor, RequestSequence, error::TransportError, transport::TracedResponse,
    };

    /// Takes `delay` per request and records `(sequence, step)` from the
    /// `seq` and `step` query parameters. Paths containing "down" fail.
    struct Scripted {
        delay: Duration,
        calls: Mutex<Vec<(usize, usize)>>,
    }

    impl Scripted {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for Scripted {
        async fn execute(&self, request: &RequestDescriptor) -> Result<TracedResponse, TransportError> {
            tokio::time::sleep(self.delay).await;
            let param = |name: &str| {
                request
                    .query
                    .iter()
                    .find(|(k, _)| k == name)
                    .and_then(|(_, v)| v.parse().ok())
                    .unwrap_or(0)
            };
            self.calls.lock().push((param("seq"), param("step")));
            if request.url.path().contains("down") {
                return Err(TransportError::Timeout(self.delay));
            }
            Ok(TracedResponse {
                status: StatusCode::OK,
                trace: Default::default(),
            })
        }
    }

    /// Generator of `paths.len()`-request sequences tagged with a running id.
    fn numbered(paths: &'static [&'static str]) -> impl Fn() -> RequestSequence + Send + Sync {
        let next = AtomicUsize::new(0);
        move || {
            let seq = next.fetch_add(1, Ordering::SeqCst);
            paths
                .iter()
                .enumerate()
                .map(|(step, path)| {
                    RequestDescriptor::get(&format!("http://localhost{path}"))
                        .unwrap()
                        .query("seq", seq.to_string())
                        .query("step", step.to_string())
                })
                .collect()
        }
    }

    fn stage(name: &str, workers: usize, load_time: Duration) -> (Stage, flume::Receiver<LoadResult>) {
        let (tx, rx) = flume::unbounded();
        let stage = Stage::new(
            StageConfig::builder()
                .name(name)
                .generator(Arc::new(numbered(&["/a", "/b", "/c"])))
                .workers(workers)
                .capacity(4)
                .request_interval(Duration::from_millis(1))
                .sequence_interval(Duration::from_millis(10))
                .load_time(load_time)
                .results((tx, rx.clone()))
                .build(),
        )
        .unwrap();
        (stage, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn stages_complete_in_order_before_global_done() {
        let mut readies = Vec::new();
        let mut stages = Vec::new();
        for (i, name) in ["one", "two", "three"].into_iter().enumerate() {
            let (s, _) = stage(name, 2, Duration::from_millis(100 * (i as u64 + 1)));
            readies.push(s.ready());
            stages.push(s);
        }
        let lt = LoadTest::builder()
            .stages(stages)
            .transport(Scripted::new(Duration::from_millis(3)))
            .build();
        let done = lt.done();

        let observer = tokio::spawn(async move {
            let mut fired_at = Vec::new();
            for ready in &readies {
                ready.wait().await;
                assert!(!done.is_fired(), "global done fired before a stage");
                fired_at.push(Instant::now());
            }
            done.wait().await;
            (fired_at, Instant::now())
        });

        let run = lt.load();
        run.handle.await.unwrap();
        let (fired_at, done_at) = observer.await.unwrap();

        assert_eq!(fired_at.len(), 3);
        assert!(fired_at.windows(2).all(|w| w[0] <= w[1]));
        assert!(fired_at[2] <= done_at);
        // Each stage waits its own duration after the previous one.
        assert!(fired_at[1] - fired_at[0] >= Duration::from_millis(200));
        assert!(fired_at[2] - fired_at[1] >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn requests_within_a_sequence_keep_their_order() {
        let transport = Scripted::new(Duration::from_millis(2));
        let (s, _) = stage("ordered", 4, Duration::from_millis(300));
        let run = LoadTest::builder()
            .stages(vec![s])
            .transport(transport.clone())
            .build()
            .load();
        run.handle.await.unwrap();

        let calls = transport.calls.lock().clone();
        assert!(!calls.is_empty());
        let max_seq = calls.iter().map(|(seq, _)| *seq).max().unwrap_or(0);
        for seq in 0..=max_seq {
            let steps: Vec<usize> = calls
                .iter()
                .filter(|(s, _)| *s == seq)
                .map(|(_, step)| *step)
                .collect();
            if !steps.is_empty() {
                assert_eq!(steps, vec![0, 1, 2], "sequence {seq} ran out of order");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_request_does_not_stop_its_sequence() {
        let transport = Scripted::new(Duration::from_millis(2));
        let (tx, rx) = flume::unbounded();
        let s = Stage::new(
            StageConfig::builder()
                .name("flaky")
                .generator(Arc::new(numbered(&["/ok", "/down", "/ok"])))
                .workers(1)
                .sequence_interval(Duration::from_millis(20))
                .load_time(Duration::from_millis(200))
                .results((tx, rx.clone()))
                .build(),
        )
        .unwrap();

        let run = LoadTest::builder()
            .stages(vec![s])
            .transport(transport.clone())
            .build()
            .load();
        run.handle.await.unwrap();

        let results: Vec<LoadResult> = rx.drain().collect();
        assert!(results.len() >= 3);
        assert_eq!(results.len() % 3, 0, "every sequence ran to completion");
        for chunk in results.chunks(3) {
            let flags: Vec<bool> = chunk.iter().map(|r| r.is_err).collect();
            assert_eq!(flags, vec![false, true, false]);
        }
        assert!(results.iter().filter(|r| r.is_err).all(|r| r.has_no_timings()));
    }

    #[tokio::test(start_paused = true)]
    async fn streams_close_when_the_run_is_over() {
        let (s, stage_rx) = stage("closing", 1, Duration::from_millis(50));
        let run = LoadTest::builder()
            .stages(vec![s])
            .transport(Scripted::new(Duration::from_millis(1)))
            .result_buffer(1024)
            .build()
            .load();

        run.done.wait().await;
        let global: Vec<LoadResult> = run.results.drain().collect();
        assert!(run.results.recv_async().await.is_err());

        let local: Vec<LoadResult> = stage_rx.drain().collect();
        assert!(stage_rx.recv_async().await.is_err());

        assert_eq!(global.len(), local.len());
        assert!(global.iter().all(|r| r.stage_name == "closing"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_sequence_is_dispatched_after_ready() {
        let transport = Scripted::new(Duration::from_millis(5));
        let generated = Arc::new(AtomicUsize::new(0));
        let counter = generated.clone();
        let s = Stage::new(
            StageConfig::builder()
                .name("bounded")
                .generator(Arc::new(move || {
                    let seq = counter.fetch_add(1, Ordering::SeqCst);
                    vec![
                        RequestDescriptor::get("http://localhost/a")
                            .unwrap()
                            .query("seq", seq.to_string()),
                    ]
                }))
                .workers(1)
                .capacity(4)
                .sequence_interval(Duration::from_millis(10))
                .load_time(Duration::from_millis(100))
                .build(),
        )
        .unwrap();
        let ready = s.ready();

        let run = LoadTest::builder()
            .stages(vec![s])
            .transport(transport.clone())
            .build()
            .load();
        ready.wait().await;
        let generated_at_ready = generated.load(Ordering::SeqCst);
        run.handle.await.unwrap();

        let executed: Vec<usize> = transport.calls.lock().iter().map(|(seq, _)| *seq).collect();
        assert!(executed.len() >= 5, "only {} sequences ran", executed.len());
        assert!(
            executed.iter().all(|seq| *seq < generated_at_ready),
            "a sequence generated after ready was executed: {executed:?}"
        );
        // A generator asleep at cancellation produces at most one more
        // sequence, which the closed queue refuses.
        assert!(generated.load(Ordering::SeqCst) <= generated_at_ready + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_fires_at_load_time_while_the_pool_is_saturated() {
        for _ in 0..10 {
            let s = Stage::new(
                StageConfig::builder()
                    .name("saturated")
                    .generator(Arc::new(numbered(&["/slow"])))
                    .workers(1)
                    .capacity(1000)
                    .load_time(Duration::from_secs(1))
                    .build(),
            )
            .unwrap();
            let ready = s.ready();

            let start = Instant::now();
            let run = LoadTest::builder()
                .stages(vec![s])
                .transport(Scripted::new(Duration::from_millis(500)))
                .build()
                .load();

            ready.wait().await;
            assert_eq!(start.elapsed(), Duration::from_secs(1));

            run.handle.await.unwrap();
            // At most the request running at the deadline is waited for,
            // never the queue behind it.
            assert!(start.elapsed() <= Duration::from_millis(1500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stage_interval_pauses_between_stages() {
        let (first, _) = stage("first", 1, Duration::from_millis(100));
        let (second, _) = stage("second", 1, Duration::from_millis(100));
        let (r1, r2) = (first.ready(), second.ready());

        let run = LoadTest::builder()
            .stages(vec![first, second])
            .stage_interval(Duration::from_secs(1))
            .transport(Scripted::new(Duration::from_millis(1)))
            .build()
            .load();

        r1.wait().await;
        let t1 = Instant::now();
        r2.wait().await;
        let t2 = Instant::now();
        run.handle.await.unwrap();

        assert!(t2 - t1 >= Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn results_with_nobody_listening_are_dropped() {
        let s = Stage::new(
            StageConfig::builder()
                .name("unheard")
                .generator(Arc::new(numbered(&["/a"])))
                .workers(2)
                .sequence_interval(Duration::from_millis(5))
                .load_time(Duration::from_millis(100))
                .build(),
        )
        .unwrap();
        let stage_rx = s.get_results();
        let transport = Scripted::new(Duration::from_millis(1));

        let run = LoadTest::builder()
            .stages(vec![s])
            .transport(transport.clone())
            .build()
            .load();
        run.handle.await.unwrap();

        assert!(!transport.calls.lock().is_empty());
        assert!(run.results.drain().next().is_none());
        assert!(stage_rx.drain().next().is_none());
    }
}
