//! Google Cloud Storage through `object_store`

use super::{ObjectMetadata, ObjectStorage};
use crate::config::{GcsAuth, StorageConfig};
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::gcp::{GcpCredential, GoogleCloudStorageBuilder};
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, Attributes, BackoffConfig, ClientOptions, ObjectStore, PutOptions, PutPayload,
    RetryConfig, StaticCredentialProvider,
};
use reqwest::Url;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Builds and caches one `object_store` client per bucket
pub struct GcsClient {
    endpoint: Url,
    auth: GcsAuth,
    access_token: Option<String>,
    service_account_path: Option<String>,
    max_retries: usize,
    buckets: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl GcsClient {
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let endpoint = parse_base_url(&config.endpoint)?;

        match config.auth {
            GcsAuth::Token if config.access_token.as_deref().unwrap_or_default().is_empty() => {
                return Err(StorageError::Auth(
                    "storage.access_token is required for token auth".into(),
                ));
            }
            GcsAuth::ServiceAccount
                if config.service_account_path.as_deref().unwrap_or_default().is_empty() =>
            {
                return Err(StorageError::Auth(
                    "storage.service_account_path is required for service_account auth".into(),
                ));
            }
            _ => {}
        }

        Ok(Self {
            endpoint,
            auth: config.auth.clone(),
            access_token: config.access_token.clone(),
            service_account_path: config.service_account_path.clone(),
            max_retries: config.max_retries,
            buckets: Mutex::new(HashMap::new()),
        })
    }

    /// Client without credentials, for public buckets and emulators
    pub fn anonymous(endpoint: &str) -> Result<Self, StorageError> {
        Self::from_config(&StorageConfig {
            endpoint: endpoint.to_string(),
            auth: GcsAuth::Anonymous,
            ..StorageConfig::default()
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Store handle for `bucket`, built on first use
    pub fn bucket(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        if bucket.is_empty() {
            return Err(StorageError::InvalidKey("bucket name is empty".into()));
        }

        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(store) = buckets.get(bucket) {
            return Ok(store.clone());
        }

        let store: Arc<dyn ObjectStore> = Arc::new(self.builder(bucket).build()?);
        debug!(bucket = %bucket, auth = ?self.auth, "Created GCS client");
        buckets.insert(bucket.to_string(), store.clone());
        Ok(store)
    }

    /// Download `bucket/key` into memory
    pub async fn download(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let store = self.bucket(bucket)?;
        let bytes = store.get(&object_path(key)?).await?.bytes().await?;
        Ok(bytes)
    }

    fn builder(&self, bucket: &str) -> GoogleCloudStorageBuilder {
        let builder = match self.auth {
            // service account env vars, the gcloud ADC file, then the metadata server
            GcsAuth::ApplicationDefault => GoogleCloudStorageBuilder::from_env(),
            _ => GoogleCloudStorageBuilder::new(),
        };

        let builder = builder
            .with_bucket_name(bucket)
            .with_client_options(
                ClientOptions::new().with_allow_http(self.endpoint.scheme() == "http"),
            )
            .with_retry(RetryConfig {
                backoff: BackoffConfig::default(),
                max_retries: self.max_retries,
                retry_timeout: Duration::from_secs(30),
            });

        match self.auth {
            GcsAuth::ApplicationDefault => builder,
            GcsAuth::ServiceAccount => builder
                .with_service_account_path(self.service_account_path.clone().unwrap_or_default()),
            GcsAuth::Anonymous => builder.with_service_account_key(endpoint_key(&self.endpoint)),
            GcsAuth::Token => builder
                .with_service_account_key(endpoint_key(&self.endpoint))
                .with_credentials(Arc::new(StaticCredentialProvider::new(GcpCredential {
                    bearer: self.access_token.clone().unwrap_or_default(),
                }))),
        }
    }
}

/// Key that only carries the API base URL, with OAuth disabled
fn endpoint_key(endpoint: &Url) -> String {
    serde_json::json!({
        "gcs_base_url": endpoint.as_str().trim_end_matches('/'),
        "disable_oauth": true,
        "client_email": "",
        "private_key": "",
        "private_key_id": "",
    })
    .to_string()
}

/// Archive backend bound to one bucket
pub struct GcsStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    public_base: Url,
}

impl GcsStorage {
    pub fn new(
        client: &GcsClient,
        bucket: &str,
        public_base_url: Option<&str>,
    ) -> Result<Self, StorageError> {
        let store = client.bucket(bucket)?;
        let public_base = match public_base_url {
            Some(base) => parse_base_url(base)?,
            None => client.endpoint().clone(),
        };

        Ok(Self {
            store,
            bucket: bucket.to_string(),
            public_base,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Public link for `key`, in the form `<base>/<bucket>/<key>`
    pub fn public_url(&self, key: &str) -> String {
        object_url(&self.public_base, &self.bucket, key).to_string()
    }
}

#[async_trait]
impl ObjectStorage for GcsStorage {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<String, StorageError> {
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        for (name, value) in metadata {
            attributes.insert(Attribute::Metadata(name.clone().into()), value.clone().into());
        }
        let options = PutOptions {
            attributes,
            ..PutOptions::default()
        };

        self.store
            .put_opts(&object_path(key)?, PutPayload::from(bytes), options)
            .await?;
        debug!(bucket = %self.bucket, key = %key, "Uploaded object");
        Ok(self.public_url(key))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        Ok(self.store.get(&object_path(key)?).await?.bytes().await?)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.store.delete(&object_path(key)?).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "gcs"
    }
}

fn object_path(key: &str) -> Result<ObjectPath, StorageError> {
    ObjectPath::parse(key).map_err(|e| StorageError::InvalidKey(format!("{key:?}: {e}")))
}

fn parse_base_url(raw: &str) -> Result<Url, StorageError> {
    let url = Url::parse(raw)
        .map_err(|e| StorageError::InvalidKey(format!("invalid storage URL {raw:?}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(StorageError::InvalidKey(format!(
            "storage URL {raw:?} cannot be used as a base"
        )));
    }
    Ok(url)
}

/// `<base>/<bucket>/<key>` with each path segment percent-encoded
pub(crate) fn object_url(base: &Url, bucket: &str, key: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(bucket).extend(key.split('/'));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_encoding() {
        let base = Url::parse("https://storage.googleapis.com").unwrap();
        let url = object_url(&base, "skin-uploads", "uploads/skin type#1.jpg");
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/skin-uploads/uploads/skin%20type%231.jpg"
        );
    }

    #[test]
    fn test_object_url_with_base_path() {
        let base = Url::parse("http://127.0.0.1:4443/storage/").unwrap();
        let url = object_url(&base, "b", "uploads/a.png");
        assert_eq!(url.as_str(), "http://127.0.0.1:4443/storage/b/uploads/a.png");
    }

    #[test]
    fn test_public_url_defaults_to_endpoint() {
        let client = GcsClient::anonymous("https://storage.googleapis.com").unwrap();
        let storage = GcsStorage::new(&client, "skin-uploads", None).unwrap();
        assert_eq!(
            storage.public_url("uploads/skin_type_prediction_abc.jpg"),
            "https://storage.googleapis.com/skin-uploads/uploads/skin_type_prediction_abc.jpg"
        );
    }

    #[test]
    fn test_credentials_required_by_auth_mode() {
        let token = StorageConfig {
            auth: GcsAuth::Token,
            ..StorageConfig::default()
        };
        assert!(matches!(
            GcsClient::from_config(&token),
            Err(StorageError::Auth(_))
        ));

        let service_account = StorageConfig {
            auth: GcsAuth::ServiceAccount,
            ..StorageConfig::default()
        };
        assert!(matches!(
            GcsClient::from_config(&service_account),
            Err(StorageError::Auth(_))
        ));
    }

    #[test]
    fn test_bucket_stores_are_cached() {
        let client = GcsClient::anonymous("http://127.0.0.1:4443").unwrap();
        let a = client.bucket("skin-uploads").unwrap();
        let b = client.bucket("skin-uploads").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(client.bucket("").is_err());
    }

    #[test]
    fn test_object_path_rejects_empty_segments() {
        assert!(object_path("uploads/a.jpg").is_ok());
        assert!(matches!(
            object_path("uploads//a.jpg"),
            Err(StorageError::InvalidKey(_))
        ));
    }
}
