use clap::Parser;
use phl_ingest::{load_registry, parse_duration, LoadArgs, PostgresOpts};
use std::time::Duration;
use table_sink::{LoadPolicy, Strategy};

fn load_args(extra: &[&str]) -> LoadArgs {
    let mut argv = vec!["load", "--data-dir", "/srv/phl"];
    argv.extend_from_slice(extra);
    LoadArgs::try_parse_from(argv).unwrap()
}

#[test]
fn test_insert_defaults() {
    let args = load_args(&[]);
    let config = args.to_config();

    assert_eq!(config.strategy, Strategy::Insert);
    assert_eq!(config.policy, LoadPolicy::IdempotentReload);
    assert_eq!(config.batch_size, 500);
    assert_eq!(config.concurrency, 4);
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.retry.base_delay, Duration::from_secs(1));
    assert_eq!(config.max_record_bytes, 100_000);
    assert_eq!(config.data_dir, std::path::PathBuf::from("/srv/phl"));
    assert!(config.tables.is_empty());
    assert!(!config.dry_run);
    assert_eq!(args.pool_size(), 4);
}

#[test]
fn test_bulk_defaults() {
    let config = load_args(&["--strategy", "bulk"]).to_config();

    assert_eq!(config.strategy, Strategy::Bulk);
    assert_eq!(config.policy, LoadPolicy::Truncate);
    assert_eq!(config.batch_size, 50_000);
    assert_eq!(config.concurrency, 1);
}

#[test]
fn test_explicit_overrides() {
    let args = load_args(&[
        "--policy",
        "truncate",
        "--batch-size",
        "250",
        "--concurrency",
        "8",
        "--pool-size",
        "2",
        "--max-retries",
        "3",
        "--retry-delay",
        "250ms",
        "--tables",
        "demolitions,appeals",
        "--dry-run",
    ]);
    let config = args.to_config();

    assert_eq!(config.policy, LoadPolicy::Truncate);
    assert_eq!(config.batch_size, 250);
    assert_eq!(config.concurrency, 8);
    assert_eq!(args.pool_size(), 2);
    assert_eq!(config.retry.max_retries, 3);
    assert_eq!(config.retry.base_delay, Duration::from_millis(250));
    assert_eq!(config.tables, vec!["demolitions", "appeals"]);
    assert!(config.dry_run);
}

#[test]
fn test_invalid_strategy_rejected() {
    let result = LoadArgs::try_parse_from(["load", "--strategy", "upsert"]);
    assert!(result.is_err());
}

#[test]
fn test_postgres_opts() {
    let opts = PostgresOpts::try_parse_from([
        "load",
        "--connection-string",
        "host=localhost user=postgres",
        "--connect-delay",
        "5s",
    ])
    .unwrap();

    assert_eq!(
        opts.connection_string.as_deref(),
        Some("host=localhost user=postgres")
    );
    assert_eq!(opts.connect_attempts, 5);
    assert_eq!(opts.connect_delay, Duration::from_secs(5));
}

#[test]
fn test_parse_duration() {
    assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
    assert!(parse_duration("soon").is_err());
}

#[test]
fn test_builtin_registry() {
    let registry = load_registry(None).unwrap();
    assert!(registry.get_table("demolitions").is_some());
}

#[test]
fn test_registry_file_missing() {
    let err = load_registry(Some(std::path::Path::new("/nonexistent/tables.yaml"))).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to load table registry"));
}

#[test]
fn test_bulk_with_idempotent_policy_is_invalid() {
    let config = load_args(&["--strategy", "bulk", "--policy", "idempotent"]).to_config();
    assert!(config.validate().is_err());
    assert!(load_args(&["--strategy", "bulk"]).to_config().validate().is_ok());
}
