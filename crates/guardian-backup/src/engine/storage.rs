//! Where finished artifacts are kept: a local directory or an S3 bucket

use std::path::{Path, PathBuf};

use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::{Client as S3Client, Config};
use guardian_core::S3Settings;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::models::{BackupConfig, StorageTarget};

/// Parsed storage location of a backup config
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    Local(PathBuf),
    S3 {
        bucket: String,
        prefix: Option<String>,
    },
}

impl StorageLocation {
    pub fn parse(target: StorageTarget, location: &str) -> Result<Self, EngineError> {
        match target {
            StorageTarget::Local => Ok(StorageLocation::Local(PathBuf::from(location))),
            StorageTarget::AwsS3 => {
                let trimmed = location.trim_start_matches("s3://").trim_matches('/');
                let (bucket, prefix) = match trimmed.split_once('/') {
                    Some((bucket, prefix)) => (bucket, Some(prefix.trim_matches('/'))),
                    None => (trimmed, None),
                };
                if bucket.is_empty() {
                    return Err(EngineError::Artifact(format!(
                        "Invalid S3 location '{}', expected bucket[/prefix]",
                        location
                    )));
                }
                Ok(StorageLocation::S3 {
                    bucket: bucket.to_string(),
                    prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
                })
            }
            other => Err(EngineError::Unsupported(format!(
                "{} storage is not supported",
                other
            ))),
        }
    }

    fn object_key(prefix: &Option<String>, file_name: &str) -> String {
        match prefix {
            Some(prefix) => format!("{}/{}", prefix, file_name),
            None => file_name.to_string(),
        }
    }
}

/// Moves staged artifacts to their storage target and brings them back for
/// restores
#[derive(Debug, Clone, Default)]
pub struct ArtifactStorage {
    s3: Option<S3Settings>,
}

impl ArtifactStorage {
    pub fn new(s3: Option<S3Settings>) -> Self {
        Self { s3 }
    }

    /// Store `staged` under `file_name` and return the recorded path
    pub async fn store(
        &self,
        config: &BackupConfig,
        staged: &Path,
        file_name: &str,
    ) -> Result<String, EngineError> {
        match StorageLocation::parse(config.storage_type, &config.storage_location)? {
            StorageLocation::Local(dir) => {
                tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                    EngineError::Io(format!(
                        "Failed to create backup directory {}: {}",
                        dir.display(),
                        e
                    ))
                })?;
                let destination = dir.join(file_name);
                tokio::fs::copy(staged, &destination).await.map_err(|e| {
                    EngineError::Io(format!(
                        "Failed to write backup to {}: {}",
                        destination.display(),
                        e
                    ))
                })?;
                debug!("Stored backup artifact at {}", destination.display());
                Ok(destination.to_string_lossy().into_owned())
            }
            StorageLocation::S3 { bucket, prefix } => {
                let key = StorageLocation::object_key(&prefix, file_name);
                let client = self.client()?;
                let content = tokio::fs::read(staged).await?;

                info!("Uploading backup to S3: s3://{}/{}", bucket, key);
                client
                    .put_object()
                    .bucket(&bucket)
                    .key(&key)
                    .body(content.into())
                    .content_type("application/octet-stream")
                    .send()
                    .await
                    .map_err(|e| s3_error("upload", e))?;

                Ok(format!("s3://{}/{}", bucket, key))
            }
        }
    }

    /// Make the artifact at `path` available locally, downloading into
    /// `workdir` when it lives in S3
    pub async fn fetch(&self, path: &str, workdir: &Path) -> Result<PathBuf, EngineError> {
        if let Some(rest) = path.strip_prefix("s3://") {
            let (bucket, key) = rest.split_once('/').ok_or_else(|| {
                EngineError::Artifact(format!("Invalid S3 artifact path '{}'", path))
            })?;
            let file_name = key.rsplit('/').next().unwrap_or(key);
            let client = self.client()?;

            info!("Downloading backup from S3: {}", path);
            let response = client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| s3_error("download", e))?;
            let data = response
                .body
                .collect()
                .await
                .map_err(|e| EngineError::Io(format!("Failed to read S3 object: {}", e)))?
                .into_bytes();

            let local = workdir.join(file_name);
            tokio::fs::write(&local, &data).await?;
            return Ok(local);
        }

        let local = PathBuf::from(path);
        if tokio::fs::metadata(&local).await.is_err() {
            return Err(EngineError::Artifact(format!(
                "Backup artifact not found at {}",
                path
            )));
        }
        Ok(local)
    }

    fn client(&self) -> Result<S3Client, EngineError> {
        let settings = self.s3.as_ref().ok_or_else(|| {
            EngineError::Unsupported(
                "aws_s3 storage requires GUARDIAN_S3_ACCESS_KEY_ID and GUARDIAN_S3_SECRET_KEY"
                    .to_string(),
            )
        })?;

        let creds = aws_sdk_s3::config::Credentials::new(
            settings.access_key_id.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "guardian",
        );

        let mut builder = Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(settings.region.clone()))
            .force_path_style(settings.force_path_style)
            .credentials_provider(creds);

        // S3-compatible services such as MinIO
        if let Some(endpoint) = &settings.endpoint {
            let endpoint_url = if endpoint.starts_with("http") {
                endpoint.clone()
            } else {
                format!("http://{}", endpoint)
            };
            builder = builder.endpoint_url(endpoint_url);
        }

        Ok(S3Client::from_conf(builder.build()))
    }
}

fn s3_error<E, R>(action: &str, err: SdkError<E, R>) -> EngineError
where
    E: ProvideErrorMetadata,
{
    match err.as_service_error() {
        Some(service_error) => EngineError::Io(format!(
            "S3 {} failed: {} (code: {:?})",
            action,
            service_error.message().unwrap_or("unknown error"),
            service_error.code()
        )),
        None => EngineError::Io(format!("S3 {} failed: {}", action, err)),
    }
}
