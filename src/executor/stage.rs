use std::time::Duration;

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::{
    LoadResult, RequestSequence, SequenceGenerator,
    error::{Error, Result},
    signal::Completion,
};

/// How much longer than its pacing a stage runs when no explicit
/// `load_time` is given.
const DEFAULT_LOAD_FACTOR: u32 = 100;

/// Everything needed to build a [`Stage`].
///
/// ```rust
/// use std::{sync::Arc, time::Duration};
/// use stageload::{RequestDescriptor, Stage, StageConfig};
///
/// let stage = Stage::new(
///     StageConfig::builder()
///         .name("warmup")
///         .generator(Arc::new(|| {
///             vec![RequestDescriptor::get("http://localhost:3000/").unwrap()]
///         }))
///         .workers(4)
///         .sequence_interval(Duration::from_millis(10))
///         .build(),
/// )
/// .unwrap();
/// assert_eq!(stage.load_time(), Duration::from_secs(1));
/// ```
#[derive(TypedBuilder)]
pub struct StageConfig {
    /// Attached to every result this stage produces.
    #[builder(setter(into))]
    pub name: String,
    pub generator: SequenceGenerator,
    /// Sequences executed in parallel.
    pub workers: usize,
    /// Sequences generated ahead of consumption. Zero is treated as one.
    #[builder(default = 1)]
    pub capacity: usize,
    /// Pause after every request of a sequence.
    #[builder(default)]
    pub request_interval: Duration,
    /// Pause before generating each sequence.
    #[builder(default)]
    pub sequence_interval: Duration,
    /// Stage duration. Defaults to 100 × (request + sequence interval).
    #[builder(default, setter(strip_option))]
    pub load_time: Option<Duration>,
    /// Caller-owned result stream, usually the output of `flume::bounded`.
    /// A rendezvous channel is created when absent.
    #[builder(default, setter(strip_option))]
    pub results: Option<(flume::Sender<LoadResult>, flume::Receiver<LoadResult>)>,
    /// Caller-owned completion signal.
    #[builder(default, setter(strip_option))]
    pub done: Option<Completion>,
}

/// One phase of a load run: its own pacing, concurrency and duration.
///
/// A stage is inert until a [`crate::LoadTest`] reaches it. Grab
/// [`Stage::get_results`] and [`Stage::ready`] before handing the stage over,
/// both handles stay valid for the whole run.
pub struct Stage {
    pub(crate) name: String,
    generator: SequenceGenerator,
    pub(crate) workers: usize,
    pub(crate) capacity: usize,
    pub(crate) request_interval: Duration,
    sequence_interval: Duration,
    pub(crate) load_time: Duration,
    pub(crate) results_tx: Option<flume::Sender<LoadResult>>,
    results_rx: flume::Receiver<LoadResult>,
    pub(crate) done: Completion,
    pub(crate) cancel: CancellationToken,
}

impl Stage {
    /// Validates the configuration. Fails when either pacing interval is
    /// longer than the stage itself or when there are no workers.
    pub fn new(config: StageConfig) -> Result<Self> {
        if config.workers == 0 {
            return Err(Error::Config(format!(
                "stage {:?} needs at least one worker",
                config.name
            )));
        }

        let load_time = match config.load_time {
            Some(load_time) => load_time,
            None => config
                .request_interval
                .checked_add(config.sequence_interval)
                .and_then(|pacing| pacing.checked_mul(DEFAULT_LOAD_FACTOR))
                .ok_or_else(|| {
                    Error::Config(format!(
                        "stage {:?}: intervals too large to derive a load time",
                        config.name
                    ))
                })?,
        };

        if load_time < config.sequence_interval || load_time < config.request_interval {
            return Err(Error::Config(format!(
                "stage {:?}: intervals cannot be larger than total load time ({load_time:?})",
                config.name
            )));
        }

        let (results_tx, results_rx) = config.results.unwrap_or_else(|| flume::bounded(0));

        Ok(Self {
            name: config.name,
            generator: config.generator,
            workers: config.workers,
            capacity: config.capacity.max(1),
            request_interval: config.request_interval,
            sequence_interval: config.sequence_interval,
            load_time,
            results_tx: Some(results_tx),
            results_rx,
            done: config.done.unwrap_or_default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn load_time(&self) -> Duration {
        self.load_time
    }

    /// This stage's result stream. Ends once the whole run is over.
    pub fn get_results(&self) -> flume::Receiver<LoadResult> {
        self.results_rx.clone()
    }

    /// Fires once, when the stage's duration has elapsed.
    pub fn ready(&self) -> Completion {
        self.done.clone()
    }

    /// Spawns the generation task feeding `queue`.
    pub(crate) fn start_generation(&self, queue: mpsc::Sender<RequestSequence>) -> JoinHandle<()> {
        tokio::spawn(generate(
            self.name.clone(),
            self.generator.clone(),
            self.sequence_interval,
            self.cancel.clone(),
            queue,
        ))
    }
}

/// Sleeps, generates, pushes; until cancelled.
///
/// Cancellation is only checked before the sleep, so it can take up to one
/// `interval` to be noticed. A full queue blocks the push. A closed queue ends
/// the loop as well. Returning drops `queue`, which closes it.
async fn generate(
    name: String,
    generator: SequenceGenerator,
    interval: Duration,
    cancel: CancellationToken,
    queue: mpsc::Sender<RequestSequence>,
) {
    tracing::debug!("Stage {name}: generation started.");
    let mut generated = 0usize;
    while !cancel.is_cancelled() {
        tokio::time::sleep(interval).await;
        if queue.send(generator()).await.is_err() {
            break;
        }
        generated += 1;
    }
    tracing::debug!("Stage {name}: generation stopped after {generated} sequences.");
}
