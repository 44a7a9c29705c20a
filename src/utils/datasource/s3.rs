use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::DateTimeFormat;
use aws_sdk_s3::types::Object;
use aws_sdk_s3::Client;
use serde_json::{json, Value};

use super::base::{Batch, BatchFailure, BatchReader, DataSourceConnector, LatencyTimer, ServerInfo};
use super::common::{format_bytes, ConnectorError};
use crate::models::{required, CredentialField, ResolvedConfig, StreamPosition};

const OBJECT_STREAM: &str = "objects";
const MAX_KEYS_PER_PAGE: usize = 1000;

/// Amazon S3 and S3-compatible object stores (MinIO, R2, ...).
pub struct S3Connector;

struct BucketTarget {
    bucket: String,
    region: String,
    endpoint: Option<String>,
}

impl BucketTarget {
    fn resolve(config: &ResolvedConfig) -> Result<Self, ConnectorError> {
        let settings = config.s3()?;
        Ok(BucketTarget {
            bucket: required(&settings.bucket, "bucket")?.to_string(),
            region: required(&settings.region, "region")?.to_string(),
            endpoint: settings
                .endpoint
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from),
        })
    }
}

/// A client scoped to one call. The SDK only ever sees the static keys of
/// this source, never the ambient AWS environment's credentials.
async fn client_for(config: &ResolvedConfig, target: &BucketTarget) -> Result<Client, ConnectorError> {
    let credentials = Credentials::new(
        config.require_secret(CredentialField::AccessKey)?,
        config.require_secret(CredentialField::SecretKey)?,
        None,
        None,
        "datasource-hub",
    );

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(target.region.clone()))
        .credentials_provider(credentials);
    if let Some(endpoint) = &target.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let shared = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&shared)
        .force_path_style(target.endpoint.is_some())
        .build();
    Ok(Client::from_conf(s3_config))
}

fn sdk_error<E>(err: SdkError<E, HttpResponse>) -> ConnectorError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    match &err {
        SdkError::TimeoutError(_) => return ConnectorError::Timeout,
        SdkError::DispatchFailure(failure) if failure.is_timeout() => return ConnectorError::Timeout,
        SdkError::DispatchFailure(_) => {
            return ConnectorError::Network(DisplayErrorContext(&err).to_string())
        }
        SdkError::ConstructionFailure(_) => {
            return ConnectorError::Config(DisplayErrorContext(&err).to_string())
        }
        _ => {}
    }

    let Some(status) = err.raw_response().map(|r| r.status().as_u16()) else {
        return ConnectorError::Protocol(DisplayErrorContext(&err).to_string());
    };
    match status {
        301 => ConnectorError::Query("bucket is in another region".to_string()),
        404 => ConnectorError::Query("bucket not found".to_string()),
        _ => {
            let detail = match (err.code(), err.message()) {
                (Some(code), Some(message)) => format!("{}: {}", code, message),
                (Some(code), None) => code.to_string(),
                _ => String::new(),
            };
            ConnectorError::from_http_status(status, &detail)
        }
    }
}

fn object_record(object: &Object) -> Value {
    json!({
        "key": object.key(),
        "size": object.size(),
        "lastModified": object
            .last_modified()
            .and_then(|t| t.fmt(DateTimeFormat::DateTime).ok()),
        "etag": object.e_tag().map(|e| e.trim_matches('"').to_string()),
        "storageClass": object.storage_class().map(|c| c.as_str().to_string()),
    })
}

#[async_trait]
impl DataSourceConnector for S3Connector {
    async fn test_connection(
        &self,
        config: &ResolvedConfig,
        timer: &LatencyTimer,
    ) -> Result<ServerInfo, ConnectorError> {
        let target = BucketTarget::resolve(config)?;
        let client = client_for(config, &target).await?;

        let head = client
            .head_bucket()
            .bucket(&target.bucket)
            .send()
            .await
            .map_err(sdk_error);
        timer.mark_round_trip();
        let head = head?;

        let mut info = ServerInfo::new();
        info.insert("bucket".to_string(), json!(target.bucket));
        info.insert(
            "bucketRegion".to_string(),
            json!(head.bucket_region().unwrap_or(target.region.as_str())),
        );
        if let Some(endpoint) = &target.endpoint {
            info.insert("endpoint".to_string(), json!(endpoint));
        }
        Ok(info)
    }

    async fn open_reader(&self, config: &ResolvedConfig) -> Result<Box<dyn BatchReader>, ConnectorError> {
        BucketTarget::resolve(config)?;
        Ok(Box::new(S3Reader))
    }
}

/// Lists bucket objects; the continuation token is the last key seen.
struct S3Reader;

#[async_trait]
impl BatchReader for S3Reader {
    async fn streams(&mut self, _config: &ResolvedConfig) -> Result<Vec<String>, ConnectorError> {
        Ok(vec![OBJECT_STREAM.to_string()])
    }

    async fn read_batch(
        &mut self,
        config: &ResolvedConfig,
        _stream: &str,
        position: &StreamPosition,
        limit: usize,
    ) -> Result<Batch, BatchFailure> {
        let target = BucketTarget::resolve(config)?;
        let client = client_for(config, &target).await?;

        let page = client
            .list_objects_v2()
            .bucket(&target.bucket)
            .max_keys(limit.min(MAX_KEYS_PER_PAGE) as i32)
            .set_start_after(position.token.clone())
            .send()
            .await
            .map_err(sdk_error)?;

        let records: Vec<Value> = page.contents().iter().map(object_record).collect();
        let next_token = page.contents().last().and_then(|o| o.key()).map(String::from);
        let total_bytes: u64 = page
            .contents()
            .iter()
            .filter_map(|o| o.size())
            .map(|size| size.max(0) as u64)
            .sum();
        tracing::debug!("S3 listing page: {} objects, {}", records.len(), format_bytes(total_bytes));

        Ok(Batch {
            exhausted: !page.is_truncated().unwrap_or(false) || records.is_empty(),
            records,
            next_token,
        })
    }
}
