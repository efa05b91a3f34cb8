use anyhow::{Context, anyhow};
use bytes::Bytes;
use s3::{Bucket, Region, creds::Credentials, error::S3Error};
use stash_core::store::{ByteStream, StoreError, StoreFeatures, StoreResult};
use tokio_util::io::{ReaderStream, StreamReader};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct S3StoreConfig {
    endpoint: String,
    #[serde(default)]
    region: String,
    bucket_name: String,
    access_key: String,
    secret_key: String,
}

/// Objects in an S3-compatible bucket.
///
/// S3 has no rename; the gateway publishes by copy then delete.
#[derive(Debug, Clone)]
pub struct S3Store {
    bucket: Box<Bucket>,
}

/// A 404 from the bucket means the object is missing.
fn map_s3_error(err: S3Error) -> StoreError {
    match err {
        S3Error::HttpFailWithBody(404, _) => StoreError::NotFound,
        err => StoreError::Other(err.into()),
    }
}

fn check_status(code: u16) -> StoreResult<()> {
    match code {
        200..=299 => Ok(()),
        404 => Err(StoreError::NotFound),
        code => Err(anyhow!("unexpected http status code {code}").into()),
    }
}

impl S3Store {
    pub fn create(config: S3StoreConfig) -> anyhow::Result<Self> {
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .context("invalid S3 credentials")?;
        let bucket = Bucket::new(
            &config.bucket_name,
            Region::Custom {
                endpoint: config.endpoint,
                region: config.region,
            },
            credentials,
        )
        .context("invalid S3 bucket configuration")?
        .with_path_style();
        s3::set_retries(5);
        Ok(Self { bucket })
    }
}

#[async_trait::async_trait]
impl stash_core::store::Store for S3Store {
    async fn put_stream(&self, path: &str, stream: ByteStream) -> StoreResult<()> {
        let mut reader = StreamReader::new(stream);
        let response = self
            .bucket
            .put_object_stream(&mut reader, path)
            .await
            .map_err(map_s3_error)?;
        check_status(response.status_code())
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<()> {
        let response = self
            .bucket
            .put_object(path, &bytes)
            .await
            .map_err(map_s3_error)?;
        check_status(response.status_code())
    }

    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            supports_rename: false,
        }
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        match self.bucket.head_object(path).await.map_err(map_s3_error) {
            Ok((_, 200)) => Ok(true),
            Ok((_, 404)) | Err(StoreError::NotFound) => Ok(false),
            Ok((_, code)) => Err(anyhow!("unexpected http status code {code}").into()),
            Err(e) => Err(e),
        }
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        let (head, code) = self.bucket.head_object(path).await.map_err(map_s3_error)?;
        check_status(code)?;
        let len = head
            .content_length
            .ok_or_else(|| anyhow!("missing content-length"))?;
        Ok(u64::try_from(len).context("negative content-length")?)
    }

    async fn open_read_stream(&self, path: &str) -> StoreResult<ByteStream> {
        let response_data = self
            .bucket
            .get_object_stream(path)
            .await
            .map_err(map_s3_error)?;
        check_status(response_data.status_code)?;
        Ok(Box::new(ReaderStream::new(response_data)))
    }

    async fn open_read_bytes(&self, path: &str) -> StoreResult<Bytes> {
        let res = self.bucket.get_object(path).await.map_err(map_s3_error)?;
        check_status(res.status_code())?;
        Ok(res.into_bytes())
    }

    /// S3 deletes are idempotent already.
    async fn delete(&self, path: &str) -> StoreResult<()> {
        match self.bucket.delete_object(path).await.map_err(map_s3_error) {
            Ok(_) | Err(StoreError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn rename(&self, _: &str, _: &str) -> StoreResult<()> {
        Err(anyhow!("rename not supported by S3Store").into())
    }
}

#[cfg(test)]
mod tests {
    // S3 tests require a running S3-compatible server (e.g., MinIO)
    // They are ignored by default
    #[allow(unused_imports)]
    use super::*;
    #[allow(unused_imports)]
    use stash_core::testutil::StoreTests;

    #[test]
    fn bucket_404_is_not_found() {
        let err = map_s3_error(S3Error::HttpFailWithBody(404, "NoSuchKey".into()));
        assert!(err.is_not_found());
        let err = map_s3_error(S3Error::HttpFailWithBody(500, "oops".into()));
        assert!(!err.is_not_found());
        assert!(check_status(204).is_ok());
        assert!(check_status(404).unwrap_err().is_not_found());
    }

    #[tokio::test]
    #[ignore = "requires S3-compatible server"]
    async fn test_s3_store() {
        let config = S3StoreConfig {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            bucket_name: "test-bucket".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
        };
        let store = S3Store::create(config).unwrap();
        StoreTests::new(&store).run_all().await.unwrap();
    }
}
