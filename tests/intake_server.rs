//! Upload listener integration tests.

use lipsync::config::IntakeConfig;
use lipsync::intake::IntakeServer;
use lipsync::producers::Input;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Harness {
    server: IntakeServer,
    inputs: mpsc::Receiver<Input>,
    cancel: CancellationToken,
    upload_dir: tempfile::TempDir,
    client: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        let upload_dir = tempfile::tempdir().unwrap();
        let config = IntakeConfig {
            port: 0,
            upload_dir: upload_dir.path().join("uploads"),
            ..IntakeConfig::default()
        };
        let (tx, inputs) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let server = IntakeServer::start(&config, tx, cancel.clone()).await.unwrap();
        Self {
            server,
            inputs,
            cancel,
            upload_dir,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("http://{}{route}", self.server.addr())
    }

    async fn next_input(&mut self) -> Input {
        tokio::time::timeout(Duration::from_secs(2), self.inputs.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), self.server.join())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn text_form_is_forwarded_on_both_routes() {
    let mut harness = Harness::start().await;

    for route in ["/", "/text"] {
        let response = harness
            .client
            .post(harness.url(route))
            .form(&[("text", "你好，世界")])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "*"
        );
        assert_eq!(harness.next_input().await, Input::Text("你好，世界".to_owned()));
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn missing_text_is_rejected() {
    let mut harness = Harness::start().await;

    let response = harness
        .client
        .post(harness.url("/text"))
        .form(&[("other", "value")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(harness.inputs.try_recv().is_err());

    harness.shutdown().await;
}

#[tokio::test]
async fn audio_upload_keeps_only_the_base_name() {
    let mut harness = Harness::start().await;

    let response = harness
        .client
        .post(harness.url("/audio"))
        .query(&[("filename", "../../secret/question.wav")])
        .body(b"RIFF fake wav".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let expected = harness.upload_dir.path().join("uploads").join("question.wav");
    assert_eq!(harness.next_input().await, Input::Audio(expected.clone()));
    assert_eq!(std::fs::read(&expected).unwrap(), b"RIFF fake wav");

    harness.shutdown().await;
}

#[tokio::test]
async fn audio_without_filename_is_rejected() {
    let harness = Harness::start().await;

    let response = harness
        .client
        .post(harness.url("/audio"))
        .body(b"RIFF".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    harness.shutdown().await;
}

#[tokio::test]
async fn multipart_audio_on_root_is_stored() {
    let mut harness = Harness::start().await;

    let part = reqwest::multipart::Part::bytes(b"RIFF multipart".to_vec())
        .file_name("question.wav");
    let form = reqwest::multipart::Form::new()
        .part("audio", part)
        .text("text", "ignored when audio is present");
    let response = harness
        .client
        .post(harness.url("/"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let expected = harness.upload_dir.path().join("uploads").join("question.wav");
    assert_eq!(harness.next_input().await, Input::Audio(expected.clone()));
    assert_eq!(std::fs::read(&expected).unwrap(), b"RIFF multipart");
    assert!(harness.inputs.try_recv().is_err());

    harness.shutdown().await;
}

#[tokio::test]
async fn multipart_text_on_root_is_forwarded() {
    let mut harness = Harness::start().await;

    let form = reqwest::multipart::Form::new().text("text", "讲个笑话");
    let response = harness
        .client
        .post(harness.url("/"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(harness.next_input().await, Input::Text("讲个笑话".to_owned()));

    harness.shutdown().await;
}

#[tokio::test]
async fn multipart_audio_without_file_name_is_rejected() {
    let mut harness = Harness::start().await;

    let form = reqwest::multipart::Form::new()
        .part("audio", reqwest::multipart::Part::bytes(b"RIFF".to_vec()));
    let response = harness
        .client
        .post(harness.url("/"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(harness.inputs.try_recv().is_err());

    harness.shutdown().await;
}

#[tokio::test]
async fn preflight_allows_cross_origin_posts() {
    let harness = Harness::start().await;

    let response = harness
        .client
        .request(reqwest::Method::OPTIONS, harness.url("/text"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let methods = response.headers()["access-control-allow-methods"]
        .to_str()
        .unwrap();
    assert!(methods.contains("POST"));

    harness.shutdown().await;
}

#[tokio::test]
async fn closed_pipeline_reports_unavailable() {
    let mut harness = Harness::start().await;
    harness.inputs.close();

    let response = harness
        .client
        .post(harness.url("/text"))
        .form(&[("text", "hello")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);

    harness.shutdown().await;
}
