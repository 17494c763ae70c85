use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    types::{
        BucketLocationConstraint, CreateBucketConfiguration, Event, NotificationConfiguration,
        QueueConfiguration,
    },
    Client,
};
use tracing::{debug, info, instrument};

use super::{config::StorageConfig, ObjectStore};

const NOTIFICATION_ID: &str = "castiron-etl";
const DEFAULT_REGION: &str = "us-east-1";

/// `x-amz-copy-source` value: each key segment percent-encoded, `/` kept.
fn copy_source(bucket: &str, key: &str) -> String {
    let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
    format!("{bucket}/{}", encoded.join("/"))
}

/// MinIO/S3 client
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    region: String,
}

impl S3Store {
    pub fn new(config: StorageConfig) -> Self {
        debug!("Initializing storage with config: {:?}", config);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "castiron-etl",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(endpoint = ?config.endpoint, region = %config.region, "Storage client initialized");

        Self {
            client: Client::from_conf(builder.build()),
            region: config.region,
        }
    }

    /// Wrap an already configured SDK client.
    pub fn from_client(client: Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to download s3://{bucket}/{key}"))?;

        let data = response
            .body
            .collect()
            .await
            .context("Failed to read S3 response body")?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), bucket, key);
        Ok(data)
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|| format!("Failed to upload s3://{bucket}/{key}"))?;

        debug!("Uploaded s3://{}/{}", bucket, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn copy(
        &self,
        bucket: &str,
        dest_key: &str,
        src_bucket: &str,
        src_key: &str,
    ) -> Result<()> {
        let source = copy_source(src_bucket, src_key);

        self.client
            .copy_object()
            .bucket(bucket)
            .copy_source(&source)
            .key(dest_key)
            .send()
            .await
            .with_context(|| {
                format!("Failed to copy s3://{src_bucket}/{src_key} to s3://{bucket}/{dest_key}")
            })?;

        debug!("Copied s3://{}/{} to s3://{}/{}", src_bucket, src_key, bucket, dest_key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to delete s3://{bucket}/{key}"))?;

        debug!("Deleted s3://{}/{}", bucket, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, bucket: &str, prefix: &str, recursive: bool) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if !recursive {
                request = request.delimiter("/");
            }
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("Failed to list s3://{bucket}/{prefix}"))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(|k| k.to_string())),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }

    #[instrument(skip(self))]
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|service| service.is_not_found())
                    .unwrap_or(false);
                if not_found || e.to_string().contains("NotFound") {
                    Ok(false)
                } else {
                    Err(anyhow!("Failed to check bucket {}: {}", bucket, e))
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(bucket);

        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        request
            .send()
            .await
            .with_context(|| format!("Failed to create bucket {bucket}"))?;

        info!("Created bucket {}", bucket);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_notification_config(&self, bucket: &str, queue_arn: &str) -> Result<()> {
        let queue = QueueConfiguration::builder()
            .id(NOTIFICATION_ID)
            .queue_arn(queue_arn)
            .events(Event::from("s3:ObjectCreated:*"))
            .events(Event::from("s3:ObjectRemoved:*"))
            .build()
            .context("Invalid queue notification configuration")?;

        self.client
            .put_bucket_notification_configuration()
            .bucket(bucket)
            .notification_configuration(
                NotificationConfiguration::builder()
                    .queue_configurations(queue)
                    .build(),
            )
            .send()
            .await
            .with_context(|| format!("Failed to set notification config on {bucket}"))?;

        info!(bucket, queue_arn, "Bucket notifications configured");
        Ok(())
    }
}
