/// Protoflow CLI
///
/// Checks, compiles and runs protocol scripts from the command line.

use protoflow_core::cli;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
