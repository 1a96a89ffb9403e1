use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use image_overlay_rust::{FontLibrary, Settings, server};
use std::io::Cursor;
use tower::ServiceExt;

const BOUNDARY: &str = "overlay-test-boundary";

enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        name: &'a str,
        file_name: &'a str,
        content_type: &'a str,
        bytes: &'a [u8],
    },
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File {
                name,
                file_name,
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([30, 60, 90, 255])))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

fn png_part(bytes: &[u8]) -> Part<'_> {
    Part::File {
        name: "image",
        file_name: "photo.png",
        content_type: "image/png",
        bytes,
    }
}

fn app(settings: Settings) -> Router {
    server::router(settings, FontLibrary::empty())
}

async fn post_form(app: Router, parts: &[Part<'_>]) -> (StatusCode, Option<String>, Vec<u8>) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/image/add-text")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body")
        .to_vec();
    (status, content_type, body)
}

fn error_message(body: &[u8]) -> String {
    let value: serde_json::Value = serde_json::from_slice(body).expect("json error body");
    value["error"].as_str().expect("error field").to_string()
}

#[tokio::test]
async fn health_reports_up() {
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request");
    let response = app(Settings::default())
        .oneshot(request)
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|value| value.to_str().ok()),
        Some("*")
    );
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(value["status"], "UP");
    assert!(value["message"].is_string());
}

#[tokio::test]
async fn preflight_is_answered_without_body() {
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/api/image/add-text")
        .body(Body::empty())
        .expect("request");
    let response = app(Settings::default())
        .oneshot(request)
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.headers().contains_key("access-control-allow-methods"));
}

#[tokio::test]
async fn png_upload_keeps_png_and_dimensions() {
    let png = png_bytes(400, 300);
    let (status, content_type, body) = post_form(
        app(Settings::default()),
        &[png_part(&png), Part::Text("text", "Hi <there>")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/png"));
    let decoded = image::load_from_memory(&body).expect("decode response");
    assert_eq!((decoded.width(), decoded.height()), (400, 300));
}

#[tokio::test]
async fn jpg_alias_is_served_as_jpeg() {
    let png = png_bytes(120, 80);
    let (status, content_type, body) = post_form(
        app(Settings::default()),
        &[
            png_part(&png),
            Part::Text("text", "caption"),
            Part::Text("outputFormat", "JPG"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(
        image::guess_format(&body).expect("format"),
        ImageFormat::Jpeg
    );
}

#[tokio::test]
async fn unknown_output_format_falls_back_to_png() {
    let png = png_bytes(64, 64);
    let (status, content_type, _) = post_form(
        app(Settings::default()),
        &[
            png_part(&png),
            Part::Text("text", ""),
            Part::Text("outputFormat", "bmp"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn missing_image_is_a_bad_request() {
    let (status, _, body) =
        post_form(app(Settings::default()), &[Part::Text("text", "hello")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&body).expect("json"),
        serde_json::json!({ "error": "No image file uploaded." })
    );
}

#[tokio::test]
async fn missing_text_is_a_bad_request() {
    let png = png_bytes(32, 32);
    let (status, _, body) = post_form(app(Settings::default()), &[png_part(&png)]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&body).expect("json"),
        serde_json::json!({ "error": "No text parameter provided for overlay." })
    );
}

#[tokio::test]
async fn disallowed_mime_type_is_an_upload_error() {
    let (status, _, body) = post_form(
        app(Settings::default()),
        &[
            Part::File {
                name: "image",
                file_name: "notes.txt",
                content_type: "text/plain",
                bytes: b"not an image",
            },
            Part::Text("text", "hello"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).starts_with("File upload error:"));
}

#[tokio::test]
async fn oversized_file_is_an_upload_error() {
    let settings = Settings {
        max_upload_bytes: 1024,
        ..Settings::default()
    };
    let mut seed: u32 = 0x2545_f491;
    let noisy = RgbaImage::from_fn(128, 128, |_, _| {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let [r, g, b, _] = seed.to_le_bytes();
        Rgba([r, g, b, 255])
    });
    let mut large = Vec::new();
    DynamicImage::ImageRgba8(noisy)
        .write_to(&mut Cursor::new(&mut large), ImageFormat::Png)
        .expect("encode png");
    assert!(large.len() > 1024);
    let (status, _, body) = post_form(
        app(settings),
        &[png_part(&large), Part::Text("text", "hello")],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).starts_with("File upload error:"));
}

#[tokio::test]
async fn corrupt_image_is_a_server_error() {
    let (status, _, body) = post_form(
        app(Settings::default()),
        &[
            png_part(b"\x89PNG\r\n\x1a\ntruncated"),
            Part::Text("text", "hello"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!error_message(&body).is_empty());
}

#[tokio::test]
async fn image_sent_as_plain_field_counts_as_missing_file() {
    let (status, _, body) = post_form(
        app(Settings::default()),
        &[Part::Text("image", "not-a-file"), Part::Text("text", "hello")],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "No image file uploaded.");
}

#[cfg(feature = "avif-input")]
#[tokio::test]
async fn avif_upload_is_decoded_and_served_as_avif() {
    use image::ImageEncoder;
    use image::codecs::avif::AvifEncoder;

    let pixels = RgbaImage::from_pixel(32, 32, Rgba([20, 140, 220, 255]));
    let mut avif = Vec::new();
    AvifEncoder::new_with_speed_quality(&mut avif, 10, 80)
        .write_image(pixels.as_raw(), 32, 32, image::ExtendedColorType::Rgba8)
        .expect("encode avif");

    let (status, content_type, body) = post_form(
        app(Settings::default()),
        &[
            Part::File {
                name: "image",
                file_name: "photo.avif",
                content_type: "image/avif",
                bytes: &avif,
            },
            Part::Text("text", "hi"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    assert_eq!(content_type.as_deref(), Some("image/avif"));
    let decoded = image::load_from_memory(&body).expect("decode response");
    assert_eq!((decoded.width(), decoded.height()), (32, 32));
}
