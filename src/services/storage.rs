use crate::services::managers::ByteStream;
use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as S3Body;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Object storage holding the binary files of projects
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Stores everything `reader` yields under `key`, returning the size
    async fn upload_stream(&self, key: &str, reader: ByteStream) -> Result<u64>;
    async fn get_object_stream(&self, key: &str) -> Result<ByteStream>;
    async fn delete_file(&self, key: &str) -> Result<()>;
    /// Time-limited URL another service can fetch the object from
    async fn get_download_url(&self, key: &str, expires_in: Duration) -> Result<String>;
}

pub struct S3StorageService {
    client: Client,
    bucket: String,
}

impl S3StorageService {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl StorageService for S3StorageService {
    async fn upload_stream(&self, key: &str, mut reader: ByteStream) -> Result<u64> {
        let multipart_upload_res = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;

        let upload_id = multipart_upload_res
            .upload_id()
            .ok_or_else(|| anyhow::anyhow!("No upload ID"))?;
        let mut chunk_index = 1;
        let mut completed_parts = Vec::new();
        let mut total_size: u64 = 0;

        // S3 parts other than the last must be at least 5 MB
        let chunk_size = 8 * 1024 * 1024;
        let mut buffer = vec![0u8; chunk_size];

        loop {
            let mut n = 0;
            while n < chunk_size {
                let read = reader.read(&mut buffer[n..]).await?;
                if read == 0 {
                    break;
                }
                n += read;
            }

            // An empty object still needs one (empty) part
            if n == 0 && chunk_index > 1 {
                break;
            }

            total_size += n as u64;
            let upload_part_res = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .body(S3Body::from(buffer[..n].to_vec()))
                .part_number(chunk_index)
                .send()
                .await?;

            completed_parts.push(
                CompletedPart::builder()
                    .e_tag(upload_part_res.e_tag().unwrap_or_default())
                    .part_number(chunk_index)
                    .build(),
            );

            chunk_index += 1;
            if n < chunk_size {
                break;
            }
        }

        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await?;

        Ok(total_size)
    }

    async fn get_object_stream(&self, key: &str) -> Result<ByteStream> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        Ok(Box::new(output.body.into_async_read()))
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }

    async fn get_download_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(PresigningConfig::expires_in(expires_in)?)
            .await?;
        Ok(presigned.uri().to_string())
    }
}
