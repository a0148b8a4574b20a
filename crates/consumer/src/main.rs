//! `vitalsim-consumer` -- prints simulated vital-sign readings.
//!
//! Runs a fixed pool of consumer workers in one consumer group. Every
//! record received is printed to stdout as
//! `<worker_id>: {partition=.., offset=.., key=.., value=..}`. With
//! `CONSUMER_KPI_SUMMARY=true` a per-device KPI summary is logged on
//! shutdown (SIGINT / SIGTERM).
//!
//! # Environment variables
//!
//! | Variable                   | Required | Default              | Description                  |
//! |----------------------------|----------|----------------------|------------------------------|
//! | `KAFKA_BOOTSTRAP_SERVERS`  | no       | `localhost:29092,...` | Broker list                 |
//! | `KAFKA_TOPIC`              | no       | `health-data-records` | Topic to read               |
//! | `CONSUMER_GROUP_ID`        | no       | `HealthDataConsumer` | Shared consumer-group id     |
//! | `CONSUMER_WORKERS`         | no       | `3`                  | Number of workers            |
//! | `CONSUMER_POLL_TIMEOUT_MS` | no       | `100`                | Upper bound on one poll      |
//! | `KAFKA_AUTO_OFFSET_RESET`  | no       | `latest`             | Start position for new groups |
//! | `CONSUMER_KPI_SUMMARY`     | no       | `false`              | Log per-device KPIs on exit  |

use std::sync::Arc;

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vitalsim_broker::kafka::KafkaSource;
use vitalsim_consumer::pool::DEFAULT_JOIN_GRACE;
use vitalsim_consumer::{ConsumerPool, Fanout, KpiSink};
use vitalsim_core::shutdown::shutdown_signal;
use vitalsim_core::ConsumerConfig;

fn main() {
    dotenvy::dotenv().ok();

    // Warnings and errors to stderr, the rest next to the records on stdout.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vitalsim_consumer=info,vitalsim_broker=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer().with_writer(
                std::io::stderr
                    .with_max_level(tracing::Level::WARN)
                    .or_else(std::io::stdout),
            ),
        )
        .init();

    let config = ConsumerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid consumer configuration");
        std::process::exit(1);
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_count)
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to start Tokio runtime");
            std::process::exit(1);
        });

    runtime.block_on(run(config));
}

async fn run(config: ConsumerConfig) {
    let kpi = config.kpi_summary.then(|| Arc::new(KpiSink::new()));
    let sink = Fanout::console(kpi.clone());

    let pool = ConsumerPool::start(&config, |_| KafkaSource::new(&config), Arc::new(sink))
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to create consumer pool");
            std::process::exit(1);
        });

    shutdown_signal().await;

    pool.shutdown();
    let report = pool.join(DEFAULT_JOIN_GRACE).await;
    if let Some(kpi) = &kpi {
        kpi.log_summary();
    }

    tracing::info!(
        stopped = report.stopped,
        failed = report.failed,
        forced = report.forced,
        "Graceful shutdown complete",
    );
}
