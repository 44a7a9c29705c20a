use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::base::{
    short_page, Batch, BatchFailure, BatchReader, DataSourceConnector, LatencyTimer, ServerInfo,
};
use super::common::ConnectorError;
use crate::models::{required, CredentialField, ResolvedConfig, StreamPosition};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Google Sheets through a service account. Each tab is a stream.
pub struct GoogleSheetsConnector {
    client: Client,
}

impl GoogleSheetsConnector {
    pub fn new(client: Client) -> Self {
        GoogleSheetsConnector { client }
    }
}

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

fn service_account(config: &ResolvedConfig) -> Result<ServiceAccountKey, ConnectorError> {
    let raw = config.require_secret(CredentialField::ServiceAccountJson)?;
    serde_json::from_str(raw)
        .map_err(|e| ConnectorError::Config(format!("serviceAccountJson is invalid: {}", e)))
}

/// Signed JWT assertion for the OAuth token exchange.
fn build_assertion(key: &ServiceAccountKey, token_uri: &str, issued_at: i64) -> Result<String, ConnectorError> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: READONLY_SCOPE,
        aud: token_uri,
        iat: issued_at,
        exp: issued_at + 3600,
    };
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| ConnectorError::Config(format!("service account private_key is invalid: {}", e)))?;
    encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
        .map_err(|e| ConnectorError::Config(format!("failed to sign token request: {}", e)))
}

async fn access_token(client: &Client, config: &ResolvedConfig) -> Result<String, ConnectorError> {
    let key = service_account(config)?;
    let token_uri = key.token_uri.clone().unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());
    let assertion = build_assertion(&key, &token_uri, Utc::now().timestamp())?;

    let response = client
        .post(&token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let error = body.get("error").and_then(Value::as_str).unwrap_or_default();
        let description = body
            .get("error_description")
            .and_then(Value::as_str)
            .unwrap_or(error);
        return Err(match error {
            "invalid_grant" | "invalid_client" | "unauthorized_client" => {
                ConnectorError::Auth(format!("service account rejected: {}", description))
            }
            _ => ConnectorError::from_http_status(status.as_u16(), description),
        });
    }

    let token: TokenResponse = response.json().await?;
    Ok(token.access_token)
}

async fn get_json(client: &Client, url: &str, token: &str) -> Result<Value, ConnectorError> {
    let response = client.get(url).bearer_auth(token).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let message = body
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(ConnectorError::from_http_status(status.as_u16(), message));
    }
    Ok(response.json().await?)
}

fn metadata_url(sheet_id: &str) -> String {
    format!(
        "{}/{}?fields=properties(title,locale,timeZone),sheets(properties(title))",
        SHEETS_API,
        urlencoding::encode(sheet_id)
    )
}

fn tab_titles(metadata: &Value) -> Vec<String> {
    metadata
        .get("sheets")
        .and_then(Value::as_array)
        .map(|sheets| {
            sheets
                .iter()
                .filter_map(|s| s.pointer("/properties/title").and_then(Value::as_str))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// A1 range covering whole rows `offset+1 ..= offset+limit` of one tab.
fn row_range(tab: &str, offset: u64, limit: usize) -> String {
    let first = offset + 1;
    let last = offset + limit as u64;
    format!("'{}'!{}:{}", tab.replace('\'', "''"), first, last)
}

#[async_trait]
impl DataSourceConnector for GoogleSheetsConnector {
    async fn test_connection(
        &self,
        config: &ResolvedConfig,
        timer: &LatencyTimer,
    ) -> Result<ServerInfo, ConnectorError> {
        let sheet_id = required(&config.sheets()?.sheet_id, "sheetId")?;
        let token = access_token(&self.client, config).await?;
        let metadata = get_json(&self.client, &metadata_url(sheet_id), &token).await?;
        timer.mark_round_trip();

        let mut info = ServerInfo::new();
        for (pointer, key) in [
            ("/properties/title", "title"),
            ("/properties/locale", "locale"),
            ("/properties/timeZone", "timeZone"),
        ] {
            if let Some(value) = metadata.pointer(pointer) {
                info.insert(key.to_string(), value.clone());
            }
        }
        info.insert("sheetCount".to_string(), json!(tab_titles(&metadata).len()));
        Ok(info)
    }

    async fn open_reader(&self, config: &ResolvedConfig) -> Result<Box<dyn BatchReader>, ConnectorError> {
        let sheet_id = required(&config.sheets()?.sheet_id, "sheetId")?.to_string();
        let token = access_token(&self.client, config).await?;
        Ok(Box::new(SheetsReader {
            client: self.client.clone(),
            sheet_id,
            token,
        }))
    }
}

/// Holds the short-lived access token for the duration of one sync run.
struct SheetsReader {
    client: Client,
    sheet_id: String,
    token: String,
}

#[async_trait]
impl BatchReader for SheetsReader {
    async fn streams(&mut self, _config: &ResolvedConfig) -> Result<Vec<String>, ConnectorError> {
        let metadata = get_json(&self.client, &metadata_url(&self.sheet_id), &self.token).await?;
        Ok(tab_titles(&metadata))
    }

    async fn read_batch(
        &mut self,
        _config: &ResolvedConfig,
        stream: &str,
        position: &StreamPosition,
        limit: usize,
    ) -> Result<Batch, BatchFailure> {
        let url = format!(
            "{}/{}/values/{}?majorDimension=ROWS",
            SHEETS_API,
            urlencoding::encode(&self.sheet_id),
            urlencoding::encode(&row_range(stream, position.offset, limit))
        );
        let body = get_json(&self.client, &url, &self.token).await?;

        let records: Vec<Value> = body
            .get("values")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .enumerate()
                    .map(|(i, row)| json!({ "row": position.offset + i as u64 + 1, "values": row }))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Batch {
            exhausted: short_page(&records, limit),
            records,
            next_token: None,
        })
    }
}
