mod common;

use bytes::Bytes;
use common::FakeGcs;
use skin_type_service::config::{ContentTypePolicy, GcsAuth, StorageBackend, StorageConfig};
use skin_type_service::error::StorageError;
use skin_type_service::storage::{ArchiveStore, GcsClient, GcsStorage, ObjectStorage};
use skin_type_service::types::PredictionId;
use std::io::Write;
use std::sync::Arc;

fn gcs_config(server: &FakeGcs) -> StorageConfig {
    StorageConfig {
        backend: StorageBackend::Gcs,
        bucket_name: "skin-uploads".to_string(),
        endpoint: server.endpoint(),
        auth: GcsAuth::Anonymous,
        max_retries: 0,
        ..StorageConfig::default()
    }
}

#[tokio::test]
async fn test_archive_upload_is_publicly_readable() {
    let server = FakeGcs::start().await;
    let archive = ArchiveStore::from_config(&gcs_config(&server), None).unwrap();
    let id = PredictionId::generate();
    let photo = Bytes::from(common::encoded_image(image::ImageFormat::Png));

    let archived = archive.upload(photo.clone(), &id, "PNG").await.unwrap();

    let key = format!("uploads/skin_type_prediction_{id}.png");
    assert_eq!(archived.storage_key, key);
    assert_eq!(
        archived.public_url,
        format!("{}/skin-uploads/{key}", server.endpoint())
    );

    let stored = server.object("skin-uploads", &key).unwrap();
    assert_eq!(stored.bytes, photo);
    assert_eq!(stored.content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(stored.metadata["prediction_id"], id.as_str());
    assert!(stored.metadata["uploaded_at"].ends_with('Z'));

    let fetched = reqwest::get(&archived.public_url)
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(fetched, photo);
}

#[tokio::test]
async fn test_content_type_by_extension() {
    let server = FakeGcs::start().await;
    let config = StorageConfig {
        content_type_policy: ContentTypePolicy::ByExtension,
        ..gcs_config(&server)
    };
    let archive = ArchiveStore::from_config(&config, None).unwrap();
    let id = PredictionId::generate();

    let archived = archive
        .upload(Bytes::from_static(b"png bytes"), &id, "png")
        .await
        .unwrap();

    let stored = server.object("skin-uploads", &archived.storage_key).unwrap();
    assert_eq!(stored.content_type.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn test_discard_removes_object() {
    let server = FakeGcs::start().await;
    let archive = ArchiveStore::from_config(&gcs_config(&server), None).unwrap();
    let id = PredictionId::generate();

    let archived = archive
        .upload(Bytes::from_static(b"jpeg bytes"), &id, "jpg")
        .await
        .unwrap();
    assert_eq!(server.len(), 1);

    archive.discard(&archived).await.unwrap();
    assert_eq!(server.len(), 0);

    let err = archive
        .backend()
        .get(&archived.storage_key)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
async fn test_service_account_key_file() {
    let server = FakeGcs::start().await;
    // emulator-style key: no OAuth exchange, requests go to the fake server
    let mut key = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        key,
        r#"{{
  "type": "service_account",
  "client_email": "archiver@skin-type.iam.gserviceaccount.com",
  "private_key_id": "",
  "private_key": "",
  "gcs_base_url": "{}",
  "disable_oauth": true
}}"#,
        server.endpoint()
    )
    .unwrap();

    let config = StorageConfig {
        auth: GcsAuth::ServiceAccount,
        service_account_path: Some(key.path().to_string_lossy().into_owned()),
        public_base_url: Some("https://storage.googleapis.com".to_string()),
        ..gcs_config(&server)
    };
    let archive = ArchiveStore::from_config(&config, None).unwrap();
    let id = PredictionId::generate();

    let archived = archive
        .upload(Bytes::from_static(b"jpeg bytes"), &id, "jpg")
        .await
        .unwrap();

    assert_eq!(
        archived.public_url,
        format!("https://storage.googleapis.com/skin-uploads/uploads/skin_type_prediction_{id}.jpg")
    );
    assert!(server.object("skin-uploads", &archived.storage_key).is_some());
}

#[test]
fn test_missing_service_account_key_is_rejected() {
    let config = StorageConfig {
        backend: StorageBackend::Gcs,
        bucket_name: "skin-uploads".to_string(),
        auth: GcsAuth::ServiceAccount,
        service_account_path: Some("/nonexistent/gcs-key.json".to_string()),
        ..StorageConfig::default()
    };
    assert!(ArchiveStore::from_config(&config, None).is_err());
}

#[tokio::test]
async fn test_static_token_is_sent() {
    let server = FakeGcs::start().await;
    let config = StorageConfig {
        auth: GcsAuth::Token,
        access_token: Some("secret-token".to_string()),
        ..gcs_config(&server)
    };
    let client = GcsClient::from_config(&config).unwrap();
    let storage = GcsStorage::new(&client, "skin-uploads", Some("https://cdn.example.test")).unwrap();

    let url = storage
        .put(
            "uploads/a.jpg",
            Bytes::from_static(b"x"),
            "image/jpeg",
            &Default::default(),
        )
        .await
        .unwrap();

    assert_eq!(url, "https://cdn.example.test/skin-uploads/uploads/a.jpg");
    let stored = server.object("skin-uploads", "uploads/a.jpg").unwrap();
    assert_eq!(stored.authorization.as_deref(), Some("Bearer secret-token"));
    assert_eq!(storage.get("uploads/a.jpg").await.unwrap(), Bytes::from_static(b"x"));
}

#[tokio::test]
async fn test_one_client_serves_archive_and_model_bucket() {
    let server = FakeGcs::start().await;
    server.insert("models", "skin_type.pth", b"weights".to_vec());
    let client = Arc::new(GcsClient::from_config(&gcs_config(&server)).unwrap());

    let archive = ArchiveStore::from_config(&gcs_config(&server), Some(client.clone())).unwrap();
    archive
        .upload(Bytes::from_static(b"jpeg bytes"), &PredictionId::generate(), "jpg")
        .await
        .unwrap();

    let weights = client.download("models", "skin_type.pth").await.unwrap();
    assert_eq!(weights, Bytes::from_static(b"weights"));
    assert_eq!(server.len(), 2);
}

#[tokio::test]
async fn test_unreachable_store_is_backend_error() {
    let client = GcsClient::anonymous("http://127.0.0.1:1").unwrap();
    let storage = GcsStorage::new(&client, "skin-uploads", None).unwrap();

    let err = storage
        .put(
            "uploads/a.jpg",
            Bytes::from_static(b"x"),
            "image/jpeg",
            &Default::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Backend(_)));
}
