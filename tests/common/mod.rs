//! Shared fixtures for integration tests

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::put;
use axum::Router;
use image::{ImageFormat, Rgb, RgbImage};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Object held by [`FakeGcs`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub authorization: Option<String>,
}

type Objects = Arc<Mutex<HashMap<(String, String), StoredObject>>>;

/// Last-Modified sent with every object; clients require the header
const LAST_MODIFIED: &str = "Mon, 01 Jan 2024 00:00:00 GMT";

/// In-process stand-in for the GCS XML API (`/{bucket}/{object}`)
pub struct FakeGcs {
    pub addr: SocketAddr,
    objects: Objects,
}

impl FakeGcs {
    pub async fn start() -> Self {
        let objects: Objects = Arc::default();
        let app = Router::new()
            .route(
                "/:bucket/*object",
                put(put_object).get(get_object).delete(delete_object),
            )
            .layer(DefaultBodyLimit::disable())
            .with_state(objects.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, objects }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Seed an object directly, bypassing HTTP
    pub fn insert(&self, bucket: &str, key: &str, bytes: impl Into<Bytes>) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                bytes: bytes.into(),
                content_type: None,
                metadata: BTreeMap::new(),
                authorization: None,
            },
        );
    }
}

async fn put_object(
    State(objects): State<Objects>,
    Path((bucket, object)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let metadata = headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix("x-goog-meta-")?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect();
    let etag = format!("\"{:x}\"", md5::compute(&body));

    objects.lock().unwrap().insert(
        (bucket, object),
        StoredObject {
            bytes: body,
            content_type: header_value("content-type"),
            metadata,
            authorization: header_value("authorization"),
        },
    );
    (StatusCode::OK, [(header::ETAG, etag)]).into_response()
}

async fn get_object(
    State(objects): State<Objects>,
    Path((bucket, object)): Path<(String, String)>,
) -> Response {
    match objects.lock().unwrap().get(&(bucket, object)) {
        Some(stored) => {
            let etag = format!("\"{:x}\"", md5::compute(&stored.bytes));
            (
                [
                    (header::ETAG, etag),
                    (header::LAST_MODIFIED, LAST_MODIFIED.to_string()),
                ],
                stored.bytes.clone(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "NoSuchKey").into_response(),
    }
}

async fn delete_object(
    State(objects): State<Objects>,
    Path((bucket, object)): Path<(String, String)>,
) -> StatusCode {
    match objects.lock().unwrap().remove(&(bucket, object)) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// Small encoded photo
pub fn encoded_image(format: ImageFormat) -> Vec<u8> {
    let mut image = RgbImage::new(48, 40);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        *pixel = Rgb([200 - x as u8, 150 + y as u8, 120]);
    }
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

pub const BOUNDARY: &str = "skin-type-test-boundary";

/// `multipart/form-data` body with one file field
pub fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 256);
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// `multipart/form-data` body with one plain text field
pub fn multipart_text_body(field: &str, value: &str) -> Vec<u8> {
    format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}\r\n--{BOUNDARY}--\r\n"
    )
    .into_bytes()
}
