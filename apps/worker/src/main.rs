//! Execution worker - entry point.
//!
//! Claims execution jobs from the pool's stream, runs them in the
//! sandbox, judges the output and persists verdicts.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    crucible_worker::run().await
}
