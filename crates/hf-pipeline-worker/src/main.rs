use std::collections::HashSet;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use hf_common::config::PipelineConfig;
use hf_common::db::{PgPipelineStore, create_pool_from_url_checked};
use hf_common::llm::{GatewayClient, LlmConfig};
use hf_common::logging::{init_tracing_subscriber, install_tracing_panic_hook};
use hf_common::notify::MailerConfig;
use hf_common::pipeline::{FallbackOnlyGenerator, LlmStageEvaluator};
use hf_common::{PipelineService, StoreError};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "hf-pipeline-worker",
    about = "Run AI stage evaluations for candidates waiting on automated stages"
)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    db_url: String,

    /// Keep walking AI stages until a manual gate instead of one stage per record
    #[arg(long, env = "HF_AUTO_PROGRESS_ALL", default_value_t = false)]
    auto_progress_all: bool,

    /// Optional cap on how many records to process in one run (default: unbounded)
    #[arg(long)]
    max_records: Option<usize>,

    /// Exit once no record is waiting instead of polling
    #[arg(long, default_value_t = false)]
    exit_on_empty: bool,

    /// Idle poll interval in milliseconds when running as a long-lived service
    #[arg(long, default_value_t = 5000)]
    idle_poll_interval_ms: u64,

    /// Records fetched per poll
    #[arg(long, default_value_t = 25)]
    batch_size: i64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PassSummary {
    processed: usize,
    failed: usize,
}

/// Runs the engine for one batch of waiting records.
///
/// Records that fail are remembered in `skipped` and excluded from later
/// listings, so a persistent AI or data error neither spins the worker on the
/// same record nor hides the records queued behind it.
async fn process_batch(
    service: &PipelineService,
    batch_size: i64,
    budget: usize,
    auto_progress_all: bool,
    skipped: &mut HashSet<i64>,
) -> Result<PassSummary, StoreError> {
    let exclude: Vec<i64> = skipped.iter().copied().collect();
    let waiting = service
        .store()
        .list_awaiting_auto_progress(batch_size.max(1), &exclude)
        .await?;

    let mut summary = PassSummary::default();
    for record_id in waiting {
        if summary.processed + summary.failed >= budget {
            break;
        }
        match service.auto_progress(record_id, auto_progress_all).await {
            Ok(report) => {
                metrics::counter!("hf_worker_records_total", "result" => "processed").increment(1);
                info!(
                    record_id,
                    status = report.status.as_str(),
                    halted = ?report.halted,
                    evaluated = report.evaluated.len(),
                    "record progressed"
                );
                summary.processed += 1;
            }
            Err(err) => {
                metrics::counter!("hf_worker_records_total", "result" => "failed").increment(1);
                warn!(record_id, error = %err, "auto-progress failed; skipping record for this run");
                skipped.insert(record_id);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_tracing_subscriber(env!("CARGO_PKG_NAME"));
    install_tracing_panic_hook(env!("CARGO_PKG_NAME"));
    let _ = hf_metrics::init_metrics("HF_WORKER_METRICS_PORT", 9101);

    let args = Cli::parse();
    let pool = create_pool_from_url_checked(&args.db_url).await?;
    let status = pool.status();

    let llm_config = LlmConfig::from_env();
    if !llm_config.is_usable() {
        warn!("AI gateway not configured; every evaluation will fail until LLM_* is set");
    }
    info!(
        size = status.size,
        available = status.available,
        llm_provider = %llm_config.provider,
        llm_model = %llm_config.model,
        auto_progress_all = args.auto_progress_all,
        "created postgres connection pool for pipeline worker",
    );
    let gateway = Arc::new(GatewayClient::new(llm_config)?);
    let mailer = MailerConfig::from_env().build()?;

    let service = PipelineService::new(
        Arc::new(PgPipelineStore::new(pool)),
        Arc::new(LlmStageEvaluator::new(gateway)),
        Arc::new(FallbackOnlyGenerator),
        Arc::from(mailer),
        PipelineConfig::from_env(),
    );

    let max_records = args.max_records.unwrap_or(usize::MAX);
    let mut handled = 0usize;
    let mut skipped = HashSet::new();

    while handled < max_records {
        let pass = process_batch(
            &service,
            args.batch_size,
            max_records - handled,
            args.auto_progress_all,
            &mut skipped,
        )
        .await?;
        handled += pass.processed + pass.failed;

        if pass == PassSummary::default() {
            if args.exit_on_empty {
                info!(handled, failed = skipped.len(), "no waiting records; exiting");
                break;
            }
            sleep(Duration::from_millis(args.idle_poll_interval_ms)).await;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        tracing::error!(error = %err, "hf-pipeline-worker failed");
        eprintln!("hf-pipeline-worker failed: {err}");
        std::process::exit(1);
    }
}
