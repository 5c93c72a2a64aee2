//! Subscriber setup. Lives in its own test binary because it installs the
//! process-global subscriber.

use snipbox_core::telemetry::{init_dual_sink, init_tracing, log_file_path};
use tempfile::tempdir;
use tracing::Level;

#[test]
fn test_dual_sink_writes_file_at_its_own_level() {
    let dir = tempdir().unwrap();
    let logs = dir.path().join("logs");

    let path = init_dual_sink(&logs, "executor", Level::DEBUG, Level::ERROR, false).unwrap();
    assert_eq!(path, log_file_path(&logs, "executor"));
    assert!(logs.is_dir());

    tracing::debug!(snippet_id = "abc123", "debug line reaches the file");
    tracing::trace!("trace line stays out");

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("debug line reaches the file"));
    assert!(contents.contains("abc123"));
    assert!(!contents.contains("trace line stays out"));

    // Later calls must not panic even though a subscriber is installed.
    init_tracing(true, Level::INFO);
    init_dual_sink(&logs, "executor", Level::INFO, Level::INFO, true).unwrap();
}
