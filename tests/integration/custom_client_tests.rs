/*!
 * HTTP contract tests for the custom translation client.
 *
 * A wiremock server stands in for the user's translation server so the
 * retry and error-classification behaviour can be asserted against real
 * HTTP traffic.
 */

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use subtrans::errors::TranslationError;
use subtrans::providers::{CustomClient, TranslationClient};
use subtrans::settings::{SettingValue, Settings};
use subtrans::translation::{
    PromptContext, StreamingCallback, Translation, TranslationPrompt, TranslationRequest,
};

fn client_settings(server_address: &str, streaming: bool) -> Settings {
    Settings::from_pairs([
        ("server_address", SettingValue::from(server_address)),
        ("endpoint", SettingValue::from("/v1/chat/completions")),
        ("max_retries", SettingValue::from(2_usize)),
        (
            "backoff_time",
            SettingValue::from(Duration::from_millis(10)),
        ),
        ("supports_streaming", SettingValue::Bool(streaming)),
        ("instructions", SettingValue::from("Translate the subtitles.")),
    ])
}

fn simple_request() -> TranslationRequest {
    let settings = Settings::from_pairs([("instructions", "Translate.")]);
    let mut prompt =
        TranslationPrompt::from_settings(&settings, &std::collections::BTreeMap::new());
    let line = subtrans::model::SubtitleLine::new(
        1,
        Duration::from_secs(1),
        Duration::from_secs(2),
        "Hello",
    );
    prompt.generate_messages(std::slice::from_ref(&line), &PromptContext::default());
    TranslationRequest::new(prompt)
}

#[tokio::test]
async fn test_client_4xx_shouldFailWithoutRetry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("{\"error\":\"Bad\"}"))
        .expect(1)
        .mount(&server)
        .await;

    let client = CustomClient::from_settings(&client_settings(&server.uri(), false)).unwrap();
    let mut request = simple_request();
    let error = client.send(&mut request).await.unwrap_err();

    assert!(matches!(
        error,
        TranslationError::ClientResponse { status: 400, .. }
    ));
    // The mock's expect(1) verifies exactly one POST attempt on drop
}

#[tokio::test]
async fn test_client_5xx_shouldRetryThenGiveUp() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("{\"error\":\"down\"}"))
        .expect(3)
        .mount(&server)
        .await;

    // max_retries = 2 means three attempts in total
    let client = CustomClient::from_settings(&client_settings(&server.uri(), false)).unwrap();
    let mut request = simple_request();
    let error = client.send(&mut request).await.unwrap_err();

    assert!(matches!(error, TranslationError::Impossible(_)));
}

#[tokio::test]
async fn test_client_success_shouldParseChatShape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {"content": "<line n=\"1\">Bonjour</line>"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = CustomClient::from_settings(&client_settings(&server.uri(), false)).unwrap();
    let mut request = simple_request();
    let response = client.send(&mut request).await.unwrap();

    assert_eq!(response.text, "<line n=\"1\">Bonjour</line>");
    assert_eq!(response.usage.prompt_tokens, Some(12));
    assert_eq!(response.usage.output_tokens, Some(7));
}

#[tokio::test]
async fn test_client_streaming_shouldDeliverDeltas() {
    let server = MockServer::start().await;

    // Two deltas then a finish chunk, SSE framed
    let body = "data: {\"choices\":[{\"delta\":{\"content\":\"<line n=\\\"1\\\">Bon\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"jour</line>\"},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let partials: Arc<Mutex<Vec<Translation>>> = Arc::new(Mutex::new(Vec::new()));
    let callback: StreamingCallback = {
        let partials = partials.clone();
        Arc::new(move |translation: &Translation| {
            partials.lock().push(translation.clone());
        })
    };

    let client = CustomClient::from_settings(&client_settings(&server.uri(), true)).unwrap();
    let settings = Settings::from_pairs([("instructions", "Translate.")]);
    let mut prompt =
        TranslationPrompt::from_settings(&settings, &std::collections::BTreeMap::new());
    prompt.generate_messages(&[], &PromptContext::default());
    let mut request = TranslationRequest::with_streaming(prompt, Some(callback), true);

    let response = client.send(&mut request).await.unwrap();

    // The final text is the concatenation of all deltas
    assert_eq!(response.text, "<line n=\"1\">Bonjour</line>");

    let seen = partials.lock();
    assert_eq!(seen.len(), 1, "one callback for the one closed line");
    assert_eq!(seen[0].lines.get(&1).map(String::as_str), Some("Bonjour"));
}
