//! Producer contract tests.
//!
//! Each HTTP backend is run against a mock server to pin down the request
//! it sends and how it reads the response.

use lipsync::LipSyncError;
use lipsync::config::{GeneratorBackend, ProducersConfig};
use lipsync::producers::{
    ChatTtsSynthesizer, ContentGenerator, DifyGenerator, Input, OllamaGenerator, OpenAiGenerator,
    SpeechToText, TextToSpeech, WhisperTranscriber, build_pipeline, http_client,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> reqwest::Client {
    http_client(5).unwrap()
}

// ────────────────────────────────────────────────────────────────────────────
// Speech-to-text
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn whisper_posts_audio_file_and_reads_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/asr"))
        .and(query_param("output", "json"))
        .and(body_string_contains("name=\"audio_file\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "你好", "language": "zh"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let audio = dir.path().join("question.wav");
    std::fs::write(&audio, b"fake audio bytes").unwrap();

    let stt = WhisperTranscriber::new(client(), format!("{}/asr", server.uri()));
    assert_eq!(stt.transcribe(&audio).await.unwrap(), "你好");
}

#[tokio::test]
async fn whisper_missing_file_is_transient() {
    let stt = WhisperTranscriber::new(client(), "http://127.0.0.1:9/asr".to_owned());
    let err = stt
        .transcribe(std::path::Path::new("/nonexistent/question.wav"))
        .await
        .unwrap_err();
    assert!(matches!(err, LipSyncError::TransientIo(_)));
}

// ────────────────────────────────────────────────────────────────────────────
// Content generation
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ollama_concatenates_ndjson_until_done() {
    let server = MockServer::start().await;
    let body = concat!(
        "{\"response\":\"Hel\",\"done\":false}\n",
        "{\"response\":\"lo\",\"done\":false}\n",
        "{\"response\":\"\",\"done\":true}\n",
        "{\"response\":\" ignored\",\"done\":false}\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({"model": "qwen2", "prompt": "hi"})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let generator = OllamaGenerator::new(
        client(),
        format!("{}/api/generate", server.uri()),
        "qwen2".to_owned(),
    );
    assert_eq!(generator.generate("hi").await.unwrap(), "Hello");
}

#[tokio::test]
async fn ollama_error_status_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "model 'x' not found"})))
        .mount(&server)
        .await;

    let generator = OllamaGenerator::new(client(), server.uri(), "x".to_owned());
    let err = generator.generate("hi").await.unwrap_err();
    assert!(matches!(&err, LipSyncError::TransientIo(m) if m.contains("model 'x' not found")));
}

#[tokio::test]
async fn openai_sends_bearer_and_trims_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": "Hello"}],
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "  Hi there \n"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let generator = OpenAiGenerator::new(
        client(),
        format!("{}/", server.uri()),
        "sk-test".to_owned(),
        "gpt-4o-mini".to_owned(),
    );
    assert_eq!(generator.generate("Hello").await.unwrap(), "Hi there");
}

#[tokio::test]
async fn openai_unauthorized_maps_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"message": "Incorrect API key", "type": "invalid_request_error"}})),
        )
        .mount(&server)
        .await;

    let generator = OpenAiGenerator::new(client(), server.uri(), "bad".to_owned(), "m".to_owned());
    let err = generator.generate("Hello").await.unwrap_err();
    assert!(err.to_string().contains("authentication failed: Incorrect API key"));
}

#[tokio::test]
async fn openai_empty_choices_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let generator = OpenAiGenerator::new(client(), server.uri(), "k".to_owned(), "m".to_owned());
    assert!(generator.generate("Hello").await.is_err());
}

#[tokio::test]
async fn dify_keeps_only_agent_message_answers() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"event\":\"agent_thought\",\"thought\":\"thinking\"}\n\n",
        "data: {\"event\":\"agent_message\",\"answer\":\"Hi \"}\n\n",
        "event: ping\n\n",
        "data: {\"event\":\"message\",\"answer\":\"ignored\"}\n\n",
        "data: {\"event\":\"agent_message\",\"answer\":\"there\"}\n\n",
        "data: {\"event\":\"message_end\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .and(header("authorization", "Bearer app-key"))
        .and(body_partial_json(json!({
            "query": "hello",
            "inputs": {},
            "response_mode": "streaming"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let generator = DifyGenerator::new(
        client(),
        format!("{}/v1/chat-messages", server.uri()),
        "app-key".to_owned(),
    );
    assert_eq!(generator.generate("hello").await.unwrap(), "Hi there");
}

// ────────────────────────────────────────────────────────────────────────────
// Text-to-speech
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn chattts_downloads_every_file_into_voice_dir() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .and(body_string_contains("voice=1031.pt"))
        .and(body_string_contains("skip_refine=1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "ok",
            "audio_files": [
                {"filename": "/srv/a.wav", "url": format!("{}/static/wavs/a.wav", server.uri())},
                {"filename": "/srv/b.wav", "url": format!("{}/static/wavs/b.wav", server.uri())}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/static/wavs/a.wav"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"RIFF-a".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/static/wavs/b.wav"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"RIFF-b".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let voice_dir = dir.path().join("voice");
    let tts = ChatTtsSynthesizer::new(client(), format!("{}/tts", server.uri()), voice_dir.clone());
    let files = tts.synthesize("hello").await.unwrap();

    assert_eq!(files, vec![voice_dir.join("a.wav"), voice_dir.join("b.wav")]);
    assert_eq!(std::fs::read(voice_dir.join("a.wav")).unwrap(), b"RIFF-a");
}

#[tokio::test]
async fn chattts_failed_download_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "ok",
            "audio_files": [
                {"url": format!("{}/static/wavs/gone.wav", server.uri())},
                {"url": format!("{}/static/wavs/ok.wav", server.uri())}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/static/wavs/gone.wav"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/static/wavs/ok.wav"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"RIFF".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let tts = ChatTtsSynthesizer::new(client(), format!("{}/tts", server.uri()), dir.path().to_path_buf());
    let files = tts.synthesize("hello").await.unwrap();
    assert_eq!(files, vec![dir.path().join("ok.wav")]);
}

#[tokio::test]
async fn chattts_nonzero_code_reports_msg() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 1, "msg": "text is empty"})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let tts = ChatTtsSynthesizer::new(client(), server.uri(), dir.path().to_path_buf());
    let err = tts.synthesize("").await.unwrap_err();
    assert!(matches!(&err, LipSyncError::TransientIo(m) if m.contains("text is empty")));
}

// ────────────────────────────────────────────────────────────────────────────
// Full chain
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn text_input_flows_through_generator_and_tts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({"prompt": "tell me a joke"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"response\":\"A joke.\",\"done\":true}\n"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .and(body_string_contains("text=A+joke."))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "ok",
            "audio_files": [{"url": format!("{}/static/wavs/joke.wav", server.uri())}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/static/wavs/joke.wav"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"RIFF".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = ProducersConfig {
        generator: GeneratorBackend::Ollama,
        ollama_url: format!("{}/api/generate", server.uri()),
        chattts_url: format!("{}/tts", server.uri()),
        timeout_secs: 5,
        ..ProducersConfig::default()
    };
    let pipeline = build_pipeline(&config, dir.path().to_path_buf()).unwrap();
    let files = pipeline
        .process(Input::Text("tell me a joke".to_owned()))
        .await
        .unwrap();
    assert_eq!(files, vec![dir.path().join("joke.wav")]);
}
