//! Translate subtitles with Anthropic Claude models.

use subtrans::cli;
use subtrans::providers::ProviderKind;

#[tokio::main]
async fn main() {
    std::process::exit(cli::run(Some(ProviderKind::Claude)).await);
}
