use tracing_subscriber::EnvFilter;

/// Initializes a `tracing` subscriber controlled by `RUST_LOG`, so a
/// developer chasing a failing recovery-path test can rerun it with
/// `RUST_LOG=debug` and see the `warn!`/`debug!` calls this crate emits
/// at catalog recovery and archive load/append. Safe to call from every
/// test — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
