#[cfg(test)]
mod tests {
	use clap::Parser;
	use mux_tap::*;
	use realtime_mux::{ChangeEvent, ChannelStatus};
	use serde_json::json;
	use std::time::Duration;
	use tokio::sync::mpsc;
	use tokio_util::sync::CancellationToken;

	fn config(args: &[&str]) -> Config {
		Config::try_parse_from(std::iter::once("mux-tap").chain(args.iter().copied())).unwrap()
	}

	fn drain(rx: &mut mpsc::UnboundedReceiver<TapOutput>) -> Vec<TapOutput> {
		std::iter::from_fn(|| rx.try_recv().ok()).collect()
	}

	const INSERT_ORDER: &str = r#"{"type":"change","table":"orders","eventType":"INSERT","new":{"id":1,"owner_id":7}}"#;

	// ============================================================================
	// FAN-OUT THROUGH THE TAP
	// ============================================================================

	#[tokio::test]
	async fn test_watchers_share_channel_and_all_receive() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let mut service = TapService::new(&config(&["--watch", "a@orders:INSERT;b@orders:INSERT;c@orders:UPDATE"]), &tx).unwrap();

		let stats = service.mux().get_stats();
		assert_eq!(stats.total_channels, 1);
		assert_eq!(stats.total_listeners, 3);

		service.handle_line(INSERT_ORDER).unwrap();

		let outputs = drain(&mut rx);
		let watchers: Vec<&str> = outputs.iter().map(|o| o.watcher.as_str()).collect();
		assert_eq!(watchers, vec!["a", "b"]);
		assert_eq!(outputs[0].event, ChangeEvent::Insert);
		assert_eq!(outputs[0].record, json!({"id": 1, "owner_id": 7}));
		assert_eq!(service.stats().dispatched, 1);
	}

	#[tokio::test]
	async fn test_filtered_watcher_only_sees_matching_rows() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let mut service = TapService::new(&config(&["--watch", "mine@orders:*:owner_id=eq.8"]), &tx).unwrap();

		service.handle_line(INSERT_ORDER).unwrap();
		service.handle_line(r#"{"type":"change","table":"orders","eventType":"UPDATE","new":{"id":1,"owner_id":8}}"#).unwrap();

		let outputs = drain(&mut rx);
		assert_eq!(outputs.len(), 1);
		assert_eq!(outputs[0].event, ChangeEvent::Update);
	}

	#[tokio::test]
	async fn test_comments_blank_and_bad_lines() {
		let (tx, _rx) = mpsc::unbounded_channel();
		let mut service = TapService::new(&config(&["--watch", "orders"]), &tx).unwrap();

		service.handle_line("").unwrap();
		service.handle_line("# fixture header").unwrap();
		assert!(service.handle_line("{not json").is_err());
		assert!(service.handle_line(r#"{"type":"status","table":"orders","status":"sleeping"}"#).is_err());

		assert_eq!(service.stats().lines, 2);
	}

	// ============================================================================
	// STATUS LINES
	// ============================================================================

	#[tokio::test]
	async fn test_manual_confirm_from_feed() {
		let (tx, _rx) = mpsc::unbounded_channel();
		let mut service = TapService::new(&config(&["--watch", "orders", "--manual-confirm"]), &tx).unwrap();
		assert_eq!(service.mux().channel_status("orders"), Some(ChannelStatus::Connecting));

		service.handle_line(r#"{"type":"status","table":"orders","status":"subscribed"}"#).unwrap();
		assert_eq!(service.mux().channel_status("orders"), Some(ChannelStatus::Subscribed));
	}

	#[tokio::test]
	async fn test_error_line_stops_delivery_until_reopened() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let mut service = TapService::new(&config(&["--watch", "orders:INSERT"]), &tx).unwrap();

		service.handle_line(r#"{"type":"status","table":"orders","status":"error","reason":"socket reset"}"#).unwrap();
		service.handle_line(INSERT_ORDER).unwrap();

		assert!(drain(&mut rx).is_empty());
		assert_eq!(service.mux().get_stats().total_channels, 0);
		assert_eq!(service.mux().listener_count(), 1);
	}

	#[tokio::test]
	async fn test_reopen_policy_keeps_feed_flowing() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let mut service = TapService::new(&config(&["--watch", "orders:INSERT", "--error-policy", "reopen"]), &tx).unwrap();

		service.handle_line(r#"{"type":"status","table":"orders","status":"timeout"}"#).unwrap();
		service.handle_line(INSERT_ORDER).unwrap();

		assert_eq!(drain(&mut rx).len(), 1);
		assert_eq!(service.mux().get_stats().total_channels, 1);
	}

	#[tokio::test]
	async fn test_drop_policy_removes_watchers() {
		let (tx, _rx) = mpsc::unbounded_channel();
		let mut service = TapService::new(&config(&["--watch", "orders:INSERT;payments", "--error-policy", "drop"]), &tx).unwrap();

		service.handle_line(r#"{"type":"status","table":"orders","status":"closed"}"#).unwrap();

		let stats = service.mux().get_stats();
		assert_eq!(stats.total_listeners, 1);
		assert_eq!(stats.listeners_by_table.get("payments"), Some(&1));
	}

	// ============================================================================
	// RUN LOOP
	// ============================================================================

	#[tokio::test]
	async fn test_run_replays_feed_and_releases_everything() {
		let (tx, rx) = mpsc::unbounded_channel();
		let service = TapService::new(&config(&["--watch", "a@orders:INSERT;b@orders:*"]), &tx).unwrap();
		drop(tx);
		let mux = service.mux().clone();

		let feed = format!("{INSERT_ORDER}\n{{\"type\":\"change\",\"table\":\"orders\",\"eventType\":\"DELETE\",\"old\":{{\"id\":1}}}}\nnot json\n");
		let stats = service.run(feed.as_bytes(), CancellationToken::new(), None, None).await.unwrap();

		assert_eq!(stats.lines, 3);
		assert_eq!(stats.changes, 2);
		assert_eq!(stats.rejected, 1);
		assert_eq!(mux.get_stats().total_channels, 0);
		assert_eq!(mux.listener_count(), 0);

		let mut buffer = Vec::new();
		let written = write_output(rx, &mut buffer).await.unwrap();
		assert_eq!(written, 3);
	}

	#[tokio::test]
	async fn test_run_stops_on_cancellation() {
		let (tx, _rx) = mpsc::unbounded_channel();
		let service = TapService::new(&config(&["--watch", "orders"]), &tx).unwrap();
		let token = CancellationToken::new();
		token.cancel();

		let (_writer, reader) = tokio::io::duplex(64);
		let stats = service.run(tokio::io::BufReader::new(reader), token, None, None).await.unwrap();

		assert_eq!(stats.lines, 0);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn test_run_applies_status_before_next_line() {
		let feed = format!("{{\"type\":\"status\",\"table\":\"orders\",\"status\":\"timeout\"}}\n{INSERT_ORDER}\n");

		for _ in 0..50 {
			let (tx, rx) = mpsc::unbounded_channel();
			let service = TapService::new(&config(&["--watch", "orders:INSERT", "--error-policy", "reopen"]), &tx).unwrap();
			drop(tx);
			let writer = tokio::spawn(write_output(rx, Vec::new()));

			let stats = service.run(feed.as_bytes(), CancellationToken::new(), None, Some(Duration::from_secs(60))).await.unwrap();

			assert_eq!(stats.status_reports, 1);
			assert_eq!(stats.dispatched, 1);
			assert_eq!(writer.await.unwrap().unwrap(), 1);
		}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn test_run_prunes_idle_channels() {
		let (tx, _rx) = mpsc::unbounded_channel();
		let service = TapService::new(&config(&["--watch", "orders"]), &tx).unwrap();
		let idle = service.mux().subscribe("payments", ChangeEvent::Any, |_| {}).unwrap();
		assert!(service.mux().unsubscribe(idle));
		assert_eq!(service.mux().get_stats().total_channels, 2);

		let token = CancellationToken::new();
		let canceller = token.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(100)).await;
			canceller.cancel();
		});

		let (_writer, reader) = tokio::io::duplex(64);
		let stats = service.run(tokio::io::BufReader::new(reader), token, None, Some(Duration::from_millis(10))).await.unwrap();

		assert_eq!(stats.channels_pruned, 1);
	}
}
