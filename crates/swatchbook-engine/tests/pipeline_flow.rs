use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ImageFormat, Rgb, RgbImage};
use scraper::{Html, Selector};
use serde_json::json;
use swatchbook_contracts::palette::{ColorSource, PaletteError};
use swatchbook_engine::acquire::DOWNLOAD_CHUNK_SIZE;
use swatchbook_engine::model::{ModelReply, ModelRequest};
use swatchbook_engine::{
    error_chain_text, select_model, Acquirer, DryrunModel, FetchConfig, FetchError, ModelError,
    PaletteModel, Pipeline, PipelineError, ReportTemplate, RunOutcome, RunRequest,
    SynthesisConfig, SynthesisError,
};
use wiremock::matchers::{header, method, path, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PALETTE_REPLY: &str = r##"Absolutely! Here's a palette that connects both images.

```json
{
  "strategy": "Terracotta warmth from the desert balanced by the lagoon's teal.",
  "colors": [
    {"hex": "#C8553D", "source": "image1", "description": "Terracotta", "usage": "Primary buttons"},
    {"hex": "#F2D0A4", "source": "image1", "description": "Sand", "usage": "Page background"},
    {"hex": "#1B998B", "source": "image2", "description": "Lagoon teal", "usage": "Links"},
    {"hex": "#2D3047", "source": "image2", "description": "Night water", "usage": "Body text"},
    {"hex": "#8A7968", "source": "blended", "description": "Driftwood", "usage": "Borders"}
  ]
}
```

Let me know if you want variations."##;

fn encoded(color: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbImage::from_pixel(32, 24, Rgb(color))
        .write_to(&mut Cursor::new(&mut bytes), format)
        .unwrap();
    bytes
}

async fn serve_images(server: &MockServer) {
    for (route, color) in [("/images/desert.jpg", [200, 90, 60]), ("/images/lagoon.jpg", [30, 150, 140])] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(encoded(color, ImageFormat::Jpeg))
                    .insert_header("content-type", "image/jpeg"),
            )
            .mount(server)
            .await;
    }
}

async fn serve_gemini(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .and(query_param_is_missing("key"))
        .respond_with(response)
        .expect(1)
        .mount(server)
        .await;
}

fn gemini_text(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
    }))
}

fn request_for(base: &str, dir: &Path) -> RunRequest {
    RunRequest {
        image1_url: format!("{base}/images/desert.jpg"),
        image1_path: dir.join("desert.jpg"),
        image2_url: format!("{base}/images/lagoon.jpg"),
        image2_path: dir.join("lagoon.jpg"),
        output: dir.join("out").join("palette_report.html"),
    }
}

async fn run_pipeline(base: String, request: RunRequest) -> Result<RunOutcome, PipelineError> {
    tokio::task::spawn_blocking(move || {
        let config = SynthesisConfig {
            model: "gemini-test".to_string(),
            api_key: Some("test-key".to_string()),
            api_base: format!("{base}/v1beta"),
            ..SynthesisConfig::default()
        };
        let model = select_model(&config).map_err(PipelineError::ClientSetup)?;
        let outcome = Pipeline::new(model.as_ref(), config, &FetchConfig::default(), ReportTemplate::default())?
            .run(&request);
        outcome
    })
    .await
    .expect("pipeline thread panicked")
}

fn assert_temp_images_removed(request: &RunRequest) {
    assert!(!request.image1_path.exists(), "{} left behind", request.image1_path.display());
    assert!(!request.image2_path.exists(), "{} left behind", request.image2_path.display());
}

#[tokio::test]
async fn end_to_end_report_is_self_contained() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    serve_images(&server).await;
    serve_gemini(&server, gemini_text(PALETTE_REPLY)).await;

    let temp = tempfile::tempdir()?;
    let request = request_for(&server.uri(), temp.path());
    let outcome = run_pipeline(server.uri(), request.clone()).await?;

    assert_eq!(outcome.model, "gemini-test");
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_eq!(outcome.palette.colors().len(), 5);
    assert_eq!(outcome.palette.colors()[4].source(), ColorSource::Blended);
    assert_temp_images_removed(&request);

    let html = fs::read_to_string(&outcome.report_path)?;
    assert_eq!(html.len(), outcome.report_bytes);
    let document = Html::parse_document(&html);
    let images = Selector::parse("img").unwrap();
    let sources: Vec<&str> = document
        .select(&images)
        .filter_map(|img| img.value().attr("src"))
        .collect();
    assert_eq!(sources.len(), 3);
    assert!(sources[0].starts_with("data:image/jpeg;base64,"));
    assert!(sources[1].starts_with("data:image/jpeg;base64,"));
    assert!(sources[2].starts_with("data:image/png;base64,"));

    let cards = Selector::parse(".color-card h3").unwrap();
    let hexes: Vec<String> = document
        .select(&cards)
        .map(|node| node.text().collect::<String>())
        .collect();
    assert_eq!(hexes, vec!["#C8553D", "#F2D0A4", "#1B998B", "#2D3047", "#8A7968"]);

    let strategy = Selector::parse(".strategy").unwrap();
    let strategy_text: String = document
        .select(&strategy)
        .flat_map(|node| node.text())
        .collect();
    assert_eq!(
        strategy_text,
        "Terracotta warmth from the desert balanced by the lagoon's teal."
    );
    assert!(!html.contains("{{"));
    Ok(())
}

#[tokio::test]
async fn reply_without_json_fails_synthesis_and_writes_nothing() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    serve_images(&server).await;
    serve_gemini(&server, gemini_text("Sorry, I can only describe these images in prose.")).await;

    let temp = tempfile::tempdir()?;
    let request = request_for(&server.uri(), temp.path());
    let err = run_pipeline(server.uri(), request.clone()).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::SynthesisFailed(SynthesisError::Reply(PaletteError::NoJson))
    ));
    assert!(!request.output.exists());
    assert_temp_images_removed(&request);
    Ok(())
}

#[tokio::test]
async fn model_http_error_is_a_model_failure() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    serve_images(&server).await;
    serve_gemini(
        &server,
        ResponseTemplate::new(503).set_body_string("{\"error\": {\"message\": \"overloaded\"}}"),
    )
    .await;

    let temp = tempfile::tempdir()?;
    let request = request_for(&server.uri(), temp.path());
    let err = run_pipeline(server.uri(), request.clone()).await.unwrap_err();

    match err {
        PipelineError::SynthesisFailed(SynthesisError::Model(ModelError::Rejected { status, body, .. })) => {
            assert_eq!(status, 503);
            assert!(body.contains("overloaded"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!request.output.exists());
    assert_temp_images_removed(&request);
    Ok(())
}

#[tokio::test]
async fn missing_image_is_a_download_failure_for_that_image() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    serve_images(&server).await;

    let temp = tempfile::tempdir()?;
    let mut request = request_for(&server.uri(), temp.path());
    request.image2_url = format!("{}/images/gone.png", server.uri());
    let err = run_pipeline(server.uri(), request.clone()).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::DownloadFailed {
            which: "image2",
            source: FetchError::Status { status: 404, .. }
        }
    ));
    assert_temp_images_removed(&request);
    Ok(())
}

#[tokio::test]
async fn html_served_as_image_is_rejected() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/images/login.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<!doctype html><html><body>Please sign in</body></html>")
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    let temp = tempfile::tempdir()?;
    let mut request = request_for(&server.uri(), temp.path());
    request.image1_url = format!("{}/images/login.jpg", server.uri());
    let err = run_pipeline(server.uri(), request.clone()).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::DownloadFailed {
            which: "image1",
            source: FetchError::NotAnImage { .. }
        }
    ));
    assert_temp_images_removed(&request);
    Ok(())
}

/// Swaps each downloaded image for a non-empty directory once the bytes are in
/// memory, so removing it at the end of the run fails.
struct PinDownloads {
    paths: Vec<PathBuf>,
}

impl PaletteModel for PinDownloads {
    fn name(&self) -> &str {
        "pin-downloads"
    }

    fn generate(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        for path in &self.paths {
            fs::remove_file(path).unwrap();
            fs::create_dir(path).unwrap();
            fs::write(path.join("keep.txt"), b"x").unwrap();
        }
        DryrunModel.generate(request)
    }
}

#[tokio::test]
async fn cleanup_failure_is_a_warning_not_an_error() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    serve_images(&server).await;

    let temp = tempfile::tempdir()?;
    let request = request_for(&server.uri(), temp.path());
    let pinned = request.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let model = PinDownloads {
            paths: vec![pinned.image1_path.clone(), pinned.image2_path.clone()],
        };
        let outcome = Pipeline::new(&model, SynthesisConfig::default(), &FetchConfig::default(), ReportTemplate::default())?
            .run(&pinned);
        outcome
    })
    .await??;

    assert!(outcome.report_path.exists());
    assert_eq!(outcome.model, "dryrun");
    let stuck: Vec<&String> = outcome
        .warnings
        .iter()
        .filter(|warning| warning.starts_with("could not remove"))
        .collect();
    assert_eq!(stuck.len(), 2, "{:?}", outcome.warnings);
    assert!(stuck[0].contains("desert.jpg"));
    Ok(())
}

#[tokio::test]
async fn existing_destination_is_never_overwritten_or_removed() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    serve_images(&server).await;

    let temp = tempfile::tempdir()?;
    let request = request_for(&server.uri(), temp.path());
    fs::write(&request.image1_path, b"holiday photo, only copy")?;
    let err = run_pipeline(server.uri(), request.clone()).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::DownloadFailed {
            which: "image1",
            source: FetchError::DestinationExists { .. }
        }
    ));
    assert!(error_chain_text(&err).contains("refusing to overwrite"));
    assert_eq!(fs::read(&request.image1_path)?, b"holiday photo, only copy");
    assert!(!request.image2_path.exists());
    Ok(())
}

#[tokio::test]
async fn fetch_streams_large_bodies_intact() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let payload: Vec<u8> = (0..DOWNLOAD_CHUNK_SIZE * 5 + 123)
        .map(|idx| (idx % 251) as u8)
        .collect();
    Mock::given(method("GET"))
        .and(path("/blob.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir()?;
    let destination: PathBuf = temp.path().join("nested").join("blob.png");
    let url = format!("{}/blob.png", server.uri());
    let target = destination.clone();
    let written = tokio::task::spawn_blocking(move || {
        Acquirer::new(&FetchConfig::default())
            .map_err(anyhow::Error::from)?
            .fetch(&url, &target)
            .map_err(anyhow::Error::from)
    })
    .await??;

    assert_eq!(written, destination);
    assert_eq!(fs::read(&destination)?, payload);
    Ok(())
}
