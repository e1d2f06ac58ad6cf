use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;

use crate::{CompletedPart, Destination, TransferClient, UploadError, UploadId, UploadResult};

/// Connection settings for an S3-compatible endpoint
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    /// Custom endpoint (MinIO, Ceph, R2, ...); `None` uses AWS
    pub endpoint: Option<String>,

    /// Region override; `None` defers to the AWS provider chain
    pub region: Option<String>,

    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`
    pub force_path_style: bool,
}

impl S3Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `S3_ENDPOINT`, `S3_REGION` and `S3_FORCE_PATH_STYLE`.
    ///
    /// Credentials are resolved later by the standard AWS provider chain.
    pub fn from_env() -> Self {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        Self {
            endpoint: non_empty("S3_ENDPOINT"),
            region: non_empty("S3_REGION"),
            force_path_style: non_empty("S3_FORCE_PATH_STYLE")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_region<S: Into<String>>(mut self, region: S) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_path_style(mut self) -> Self {
        self.force_path_style = true;
        self
    }
}

/// Multipart transfers against S3 through `aws-sdk-s3`
#[derive(Debug, Clone)]
pub struct S3TransferClient {
    client: Client,
}

impl S3TransferClient {
    /// Wrap an already configured SDK client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from `config` plus the default AWS credential chain
    pub async fn from_config(config: S3Config) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = config.region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(endpoint) = config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();

        Self::new(Client::from_conf(s3_config))
    }

    /// Shorthand for `from_config(S3Config::from_env())`
    pub async fn from_env() -> Self {
        Self::from_config(S3Config::from_env()).await
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn part_number_i32(part_number: u32) -> UploadResult<i32> {
    i32::try_from(part_number)
        .map_err(|_| UploadError::invalid(format!("part number {} is out of range for S3", part_number)))
}

#[async_trait]
impl TransferClient for S3TransferClient {
    async fn initiate(&self, destination: &Destination) -> UploadResult<UploadId> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&destination.bucket)
            .key(&destination.key)
            .send()
            .await
            .map_err(|e| UploadError::backend("create_multipart_upload", e))?;

        Ok(UploadId(output.upload_id().unwrap_or_default().to_string()))
    }

    async fn upload_part(
        &self,
        upload_id: &UploadId,
        destination: &Destination,
        part_number: u32,
        body: Bytes,
    ) -> UploadResult<String> {
        let output = self
            .client
            .upload_part()
            .bucket(&destination.bucket)
            .key(&destination.key)
            .upload_id(upload_id.as_str())
            .part_number(part_number_i32(part_number)?)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| UploadError::backend(format!("upload_part {}", part_number), e))?;

        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| UploadError::protocol(format!("no ETag returned for part {}", part_number)))
    }

    async fn complete(
        &self,
        upload_id: &UploadId,
        destination: &Destination,
        parts: Vec<CompletedPart>,
    ) -> UploadResult<()> {
        let parts = parts
            .into_iter()
            .map(|part| {
                Ok(S3CompletedPart::builder()
                    .part_number(part_number_i32(part.part_number)?)
                    .e_tag(part.etag)
                    .build())
            })
            .collect::<UploadResult<Vec<_>>>()?;

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&destination.bucket)
            .key(&destination.key)
            .upload_id(upload_id.as_str())
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| UploadError::backend("complete_multipart_upload", e))?;

        Ok(())
    }

    async fn abort(&self, upload_id: &UploadId, destination: &Destination) -> UploadResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&destination.bucket)
            .key(&destination.key)
            .upload_id(upload_id.as_str())
            .send()
            .await
            .map_err(|e| UploadError::backend("abort_multipart_upload", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let config = S3Config::new()
            .with_endpoint("http://127.0.0.1:9000")
            .with_region("us-east-1")
            .with_path_style();

        assert_eq!(config.endpoint.as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(config.region.as_deref(), Some("us-east-1"));
        assert!(config.force_path_style);
    }

    #[test]
    fn part_numbers_fit_sdk_type() {
        assert_eq!(part_number_i32(10_000).unwrap(), 10_000);
        assert!(part_number_i32(u32::MAX).is_err());
    }
}
