//! `vitalsim-producer` -- simulated health-monitoring devices.
//!
//! Spawns one emission task per device; every task publishes a synthetic
//! vital-sign reading to Kafka, keyed by device id, every
//! `EMIT_INTERVAL_SECS`. Runs until SIGINT / SIGTERM.
//!
//! ```text
//! vitalsim-producer <num_devices>
//! ```
//!
//! # Environment variables
//!
//! | Variable                       | Required | Default | Description                        |
//! |--------------------------------|----------|---------|------------------------------------|
//! | `KAFKA_BOOTSTRAP_SERVERS`      | no       | `localhost:29092,...` | Broker list          |
//! | `KAFKA_TOPIC`                  | no       | `health-data-records` | Target topic         |
//! | `EMIT_INTERVAL_SECS`           | no       | `10`    | Seconds between readings per device |
//! | `PRODUCER_SHUTDOWN_GRACE_SECS` | no       | `2`     | Wait for in-flight sends on shutdown |

use std::sync::Arc;

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vitalsim_broker::kafka::KafkaPublisher;
use vitalsim_core::reading::current_timestamp;
use vitalsim_core::shutdown::shutdown_signal;
use vitalsim_core::ProducerConfig;
use vitalsim_producer::{cli, DeviceSimulator};

fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vitalsim_producer=info,vitalsim_broker=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer().with_writer(
                std::io::stderr
                    .with_max_level(tracing::Level::WARN)
                    .or_else(std::io::stdout),
            ),
        )
        .init();

    // Validate the command line before touching the broker.
    let num_devices = cli::parse_device_count(std::env::args().skip(1)).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid command line");
        std::process::exit(1);
    });

    let config = ProducerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid producer configuration");
        std::process::exit(1);
    });

    // One worker thread per simulated device.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_devices)
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to start Tokio runtime");
            std::process::exit(1);
        });

    runtime.block_on(run(config, num_devices));
}

async fn run(config: ProducerConfig, num_devices: usize) {
    let publisher = KafkaPublisher::new(&config.broker).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to create Kafka producer");
        std::process::exit(1);
    });
    tracing::info!(created_at = %current_timestamp(), "Producer created");

    let simulator = DeviceSimulator::start(&config, num_devices, Arc::new(publisher));

    shutdown_signal().await;

    let report = simulator.shutdown().await;
    tracing::info!(
        publisher_closed = report.publisher_closed,
        forced = report.forced,
        "Graceful shutdown complete",
    );
}
