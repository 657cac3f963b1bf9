/// Conduit CLI
///
/// Runs built-in channel scenarios and throughput benchmarks, and prints the
/// effective configuration.

use conduit_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
