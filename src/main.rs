//! Generic entry point: provider chosen with `--provider`, or a custom
//! translation server via `--server-address`.

use subtrans::cli;

#[tokio::main]
async fn main() {
    std::process::exit(cli::run(None).await);
}
