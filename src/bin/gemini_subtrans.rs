//! Translate subtitles with Google Gemini models.

use subtrans::cli;
use subtrans::providers::ProviderKind;

#[tokio::main]
async fn main() {
    std::process::exit(cli::run(Some(ProviderKind::Gemini)).await);
}
