//! Translate subtitles through an Amazon Bedrock compatible gateway.

use subtrans::cli;
use subtrans::providers::ProviderKind;

#[tokio::main]
async fn main() {
    std::process::exit(cli::run(Some(ProviderKind::Bedrock)).await);
}
