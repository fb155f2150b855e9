//! Sequence execution and result fan-out.

use std::{sync::Arc, time::Duration};

use crate::{
    LoadResult, RequestSequence,
    transport::{Transport, execute_request},
};

/// Best-effort fan-out of results to the stage stream and the global stream.
///
/// Each stream gets its own copy through a non-blocking `try_send`. A stream
/// without a ready receiver (or room in its buffer) silently loses its copy:
/// executors never wait on consumers.
#[derive(Clone)]
pub(crate) struct Publisher {
    pub stage: Option<flume::Sender<LoadResult>>,
    pub global: flume::Sender<LoadResult>,
}

/// Which streams accepted a published result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Delivery {
    pub stage: bool,
    pub global: bool,
}

impl Publisher {
    pub fn publish(&self, result: LoadResult) -> Delivery {
        let stage = self
            .stage
            .as_ref()
            .is_some_and(|tx| tx.try_send(result.clone()).is_ok());
        let global = self.global.try_send(result).is_ok();
        Delivery { stage, global }
    }
}

/// What every sequence of one stage shares.
pub(crate) struct SequenceContext<T> {
    pub stage: String,
    pub request_interval: Duration,
    pub transport: Arc<T>,
    pub publisher: Publisher,
}

/// Runs the requests of `sequence` one after the other.
///
/// A failed request is published like any other result and does not stop the
/// sequence.
pub(crate) async fn run_sequence<T: Transport>(sequence: RequestSequence, ctx: Arc<SequenceContext<T>>) {
    for request in &sequence {
        let result = execute_request(ctx.transport.as_ref(), request)
            .await
            .with_stage(&ctx.stage);
        ctx.publisher.publish(result);
        tokio::time::sleep(ctx.request_interval).await;
    }
}
