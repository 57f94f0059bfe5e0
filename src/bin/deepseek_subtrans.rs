//! Translate subtitles with DeepSeek models.

use subtrans::cli;
use subtrans::providers::ProviderKind;

#[tokio::main]
async fn main() {
    std::process::exit(cli::run(Some(ProviderKind::DeepSeek)).await);
}
