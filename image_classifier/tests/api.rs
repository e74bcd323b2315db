use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use image_classifier::{
    config::DecoderConfig,
    decoder::ImageDecoder,
    inference_service::InferenceService,
    model_handle::ModelHandle,
    model_service::{Classifier, InferenceError, LoadError, ModelLoader, ProbabilityVector},
    preprocess::{ImageTensor, Preprocessor},
    server::{build_router, SharedState},
    state::ClassLabels,
    telemetry::Metrics,
};
use serde_json::{json, Value};
use std::{
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use tower::ServiceExt;

const BOUNDARY: &str = "----classifier-test-boundary";

struct StubLoader {
    loads: Arc<AtomicUsize>,
    scores: Option<Vec<f32>>,
    delay: Duration,
}

struct StubClassifier(Vec<f32>);

impl Classifier for StubClassifier {
    fn predict(&self, input: &ImageTensor) -> Result<ProbabilityVector, InferenceError> {
        assert_eq!(input.shape(), &[1, 32, 32, 3]);
        Ok(ProbabilityVector::new(self.0.clone()))
    }
}

impl ModelLoader for StubLoader {
    type Model = StubClassifier;

    fn load(&self) -> Result<StubClassifier, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        match &self.scores {
            Some(scores) => Ok(StubClassifier(scores.clone())),
            None => Err(LoadError::NotFound("model/classifier.onnx".into())),
        }
    }
}

fn app(scores: Option<Vec<f32>>, delay: Duration) -> (Router, Arc<AtomicUsize>) {
    let loads = Arc::new(AtomicUsize::new(0));
    let loader = StubLoader {
        loads: loads.clone(),
        scores,
        delay,
    };
    let labels = ClassLabels::new(vec![
        "bacterial_spot".into(),
        "early_blight".into(),
        "late_blight".into(),
        "healthy".into(),
    ])
    .unwrap();
    let decoder_config = DecoderConfig::default();
    let max_payload_bytes = decoder_config.max_payload_bytes;

    let inference_service = InferenceService::new(
        ImageDecoder::new(decoder_config),
        Preprocessor::new((32, 32), 2048),
        ModelHandle::new(loader),
        labels,
        Duration::from_secs(10),
    );
    let state = SharedState {
        inference_service,
        metrics: Arc::new(Metrics::new().unwrap()),
    };

    (build_router(state, max_payload_bytes), loads)
}

fn working_app() -> Router {
    app(Some(vec![0.1, 0.7, 0.1, 0.1]), Duration::ZERO).0
}

fn png_bytes() -> Vec<u8> {
    let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_fn(48, 36, |x, y| {
        Rgb([(x * 5) as u8, (y * 7) as u8, 90])
    });
    let mut image_data: Vec<u8> = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut image_data), ImageFormat::Png)
        .unwrap();
    image_data
}

fn multipart_request(field: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn assert_error(status: StatusCode, body: &Value, expected: StatusCode) {
    assert_eq!(status, expected, "unexpected body: {body}");
    let message = body["error"].as_str().unwrap();
    assert!(!message.is_empty());
}

#[tokio::test]
async fn test_liveness() {
    let response = working_app()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(!body.is_empty());
}

#[tokio::test]
async fn test_health() {
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(working_app(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "Available"}));
}

#[tokio::test]
async fn test_multipart_prediction() {
    let request = multipart_request("image", "leaf.png", "image/png", &png_bytes());
    let (status, body) = send(working_app(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["class_name"], "early_blight");
    assert!((body["confidence"].as_f64().unwrap() - 0.7).abs() < 1e-6);
}

#[tokio::test]
async fn test_base64_matches_multipart() {
    let bytes = png_bytes();
    let encoded = general_purpose::STANDARD.encode(&bytes);

    let (_, from_file) = send(
        working_app(),
        multipart_request("image", "leaf.png", "image/png", &bytes),
    )
    .await;
    let (status, plain) = send(working_app(), json_request(json!({ "image": encoded }))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, data_uri) = send(
        working_app(),
        json_request(json!({ "image": format!("data:image/png;base64,{}", encoded) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(plain, from_file);
    assert_eq!(data_uri, from_file);
}

#[tokio::test]
async fn test_octet_stream_upload_is_sniffed() {
    let request = multipart_request("image", "leaf.png", "application/octet-stream", &png_bytes());
    let (status, body) = send(working_app(), request).await;

    assert_eq!(status, StatusCode::OK, "unexpected body: {body}");
    assert_eq!(body["class_name"], "early_blight");
}

#[tokio::test]
async fn test_predict_allows_any_origin() {
    let mut request = multipart_request("image", "leaf.png", "image/png", &png_bytes());
    request
        .headers_mut()
        .insert(header::ORIGIN, "https://orchard.example".parse().unwrap());

    let response = working_app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

#[tokio::test]
async fn test_tie_break_reports_lowest_index() {
    let (app, _) = app(Some(vec![0.5, 0.5, 0.0, 0.0]), Duration::ZERO);
    let request = multipart_request("image", "leaf.png", "image/png", &png_bytes());
    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["class_name"], "bacterial_spot");
    assert_eq!(body["confidence"], 0.5);
}

#[tokio::test]
async fn test_empty_body_is_rejected() {
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(working_app(), request).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_json_without_image_is_rejected() {
    let (status, body) = send(working_app(), json_request(json!({ "picture": "abc" }))).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST);

    let (status, body) = send(working_app(), json_request(json!({ "image": "" }))).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"image\": "))
        .unwrap();
    let (status, body) = send(working_app(), request).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_base64_is_rejected() {
    let (status, body) = send(working_app(), json_request(json!({ "image": "not-base64!!" }))).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_text_file_renamed_to_jpg_is_rejected() {
    let request = multipart_request(
        "image",
        "notes.jpg",
        "image/jpeg",
        b"these are my shopping notes, not a photo",
    );
    let (status, body) = send(working_app(), request).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_multipart_without_image_field_is_rejected() {
    let request = multipart_request("file", "leaf.png", "image/png", &png_bytes());
    let (status, body) = send(working_app(), request).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_disallowed_mime_type_is_rejected() {
    let request = multipart_request("image", "leaf.gif", "image/gif", &png_bytes());
    let (status, body) = send(working_app(), request).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_model_fails_predictions_but_not_liveness() {
    let (app, loads) = app(None, Duration::ZERO);

    for _ in 0..3 {
        let request = multipart_request("image", "leaf.png", "image/png", &png_bytes());
        let (status, body) = send(app.clone(), request).await;
        assert_error(status, &body, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("model unavailable"));
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_requests_load_model_once() {
    let (app, loads) = app(Some(vec![0.1, 0.7, 0.1, 0.1]), Duration::from_millis(100));
    let bytes = png_bytes();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let app = app.clone();
            let request = multipart_request("image", "leaf.png", "image/png", &bytes);
            tokio::spawn(async move { send(app, request).await })
        })
        .collect();

    for task in tasks {
        let (status, body) = task.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["class_name"], "early_blight");
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = working_app();
    let request = multipart_request("image", "leaf.png", "image/png", &png_bytes());
    let (status, _) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&body).contains("requests_total"));
}
