use anyhow::Context;
use mux_tap::{write_output, Config, TapService};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{filter::EnvFilter, fmt::format::JsonFields, layer::SubscriberExt, util::SubscriberInitExt, Layer};

const DEFAULT_LOG_FILTER: &str = "info,realtime_mux=debug";

fn init_tracing(config: &Config) -> anyhow::Result<()> {
	let filter = EnvFilter::try_new(config.rust_log.as_deref().unwrap_or(DEFAULT_LOG_FILTER))?;

	// stdout carries the tap output, so logs go to stderr
	tracing_subscriber::registry()
		.with(if config.log_json {
			Box::new(
				tracing_subscriber::fmt::layer()
					.with_writer(std::io::stderr)
					.fmt_fields(JsonFields::default())
					.event_format(tracing_subscriber::fmt::format().json().flatten_event(true).with_span_list(false))
					.with_filter(filter),
			) as Box<dyn Layer<_> + Send + Sync>
		} else {
			Box::new(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(true).with_filter(filter))
		})
		.try_init()?;

	Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let config = Config::new();
	config.validate().map_err(anyhow::Error::msg)?;
	init_tracing(&config)?;

	tracing::info!(watchers = config.watch.len(), input = ?config.input, "Starting mux tap");

	let shutdown = CancellationToken::new();
	let signal_token = shutdown.clone();
	tokio::spawn(async move {
		match tokio::signal::ctrl_c().await {
			Ok(()) => {
				tracing::info!("Received shutdown signal (Ctrl+C)");
				signal_token.cancel();
			}
			Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
		}
	});

	let (output_tx, output_rx) = mpsc::unbounded_channel();
	let writer = tokio::spawn(write_output(output_rx, tokio::io::stdout()));

	let service = TapService::new(&config, &output_tx)?;
	drop(output_tx);

	// The replay applies status lines itself; no status worker shares the queue.
	let prune_interval = Some(config.prune_interval());
	let stats = match &config.input {
		Some(path) => {
			let file = tokio::fs::File::open(path).await.with_context(|| format!("opening {}", path.display()))?;
			service.run(BufReader::new(file), shutdown.clone(), config.stats_interval(), prune_interval).await?
		}
		None => service.run(BufReader::new(tokio::io::stdin()), shutdown.clone(), config.stats_interval(), prune_interval).await?,
	};

	let written = writer.await??;

	tracing::info!(
		lines = stats.lines,
		changes = stats.changes,
		status_reports = stats.status_reports,
		rejected = stats.rejected,
		channels_pruned = stats.channels_pruned,
		written,
		"Mux tap stopped"
	);
	Ok(())
}
