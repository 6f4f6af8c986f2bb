//! Batch background cleaner
//!
//! Runs on a current-thread runtime; batch work happens on its own worker thread.

#[cfg(feature = "cli")]
use imgly_bgclean::cli;

#[cfg(feature = "cli")]
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(2);
}
