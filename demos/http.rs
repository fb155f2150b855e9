use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use stageload::{
    LoadTest, RequestDescriptor, Reporter, SequenceGenerator, Stage, StageConfig, Summary,
    SummaryReport, TracingReporter,
};
use tracing_subscriber::EnvFilter;

fn stage(
    name: &str,
    generator: SequenceGenerator,
    workers: usize,
    sequence_interval: Duration,
    load_time: Duration,
) -> stageload::Result<Stage> {
    // Buffered so that a slow summary does not lose results.
    let (tx, rx) = flume::bounded(65_536);
    Stage::new(
        StageConfig::builder()
            .name(name)
            .generator(generator)
            .workers(workers)
            .capacity(workers * 2)
            .request_interval(Duration::from_millis(10))
            .sequence_interval(sequence_interval)
            .load_time(load_time)
            .results((tx, rx))
            .build(),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let base = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:3000".to_string());

    // A visitor looks at the landing page, searches and logs in.
    let journey: SequenceGenerator = {
        let base = base.trim_end_matches('/').to_string();
        Arc::new(move || {
            vec![
                RequestDescriptor::get(&format!("{base}/")).unwrap(),
                RequestDescriptor::get(&format!("{base}/search"))
                    .unwrap()
                    .query("q", "rust"),
                RequestDescriptor::post(&format!("{base}/login"))
                    .unwrap()
                    .form("user", "demo")
                    .form("password", "demo"),
            ]
        })
    };

    // Ramp up, hold the peak, cool down.
    let stages = vec![
        stage("warmup", journey.clone(), 2, Duration::from_millis(200), Duration::from_secs(5))?,
        stage("peak", journey.clone(), 32, Duration::from_millis(5), Duration::from_secs(10))?,
        stage("cooldown", journey, 2, Duration::from_millis(200), Duration::from_secs(5))?,
    ];
    let streams: Vec<_> = stages.iter().map(Stage::get_results).collect();

    let run = LoadTest::new(Duration::from_secs(1), stages).load();
    let per_stage = tokio::spawn(join_all(streams.into_iter().map(Summary::collect)));

    run.handle.await?;
    let summaries = per_stage.await?;

    let reporter = TracingReporter;
    let mut total = Summary::new();
    for summary in summaries {
        reporter.report(&SummaryReport::from(summary.clone())).await?;
        total.merge(summary);
    }
    reporter.report(&SummaryReport::from(total)).await?;
    Ok(())
}
