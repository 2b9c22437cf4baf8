/*!
 * Alpaca REST transport.
 */
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::trace;

use orrery_core::config::AlpacaConfig;

use crate::error::{DeviceError, Result};

/// Media type of the binary image transfer
pub const IMAGE_BYTES: &str = "application/imagebytes";

const IMAGE_BYTES_HEADER: usize = 44;

/// Alpaca response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaResponse<T> {
    /// Payload, absent on commands
    #[serde(rename = "Value")]
    pub value: Option<T>,
    /// Zero on success
    #[serde(rename = "ErrorNumber", default)]
    pub error_number: i32,
    /// Error description
    #[serde(rename = "ErrorMessage", default)]
    pub error_message: String,
    /// Echo of the request transaction id
    #[serde(rename = "ClientTransactionID", default)]
    pub client_transaction_id: u32,
}

impl<T> AlpacaResponse<T> {
    fn check(&self) -> Result<()> {
        if self.error_number != 0 {
            return Err(DeviceError::Remote {
                code: self.error_number,
                message: self.error_message.clone(),
            });
        }
        Ok(())
    }

    /// The payload, or the remote error
    pub fn into_value(self) -> Result<T> {
        self.check()?;
        self.value
            .ok_or_else(|| DeviceError::invalid_response("response has no Value"))
    }
}

/// Entry of `/management/v1/configureddevices`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredDevice {
    /// Display name
    #[serde(rename = "DeviceName")]
    pub name: String,
    /// Alpaca device type, e.g. `Camera` or `Telescope`
    #[serde(rename = "DeviceType")]
    pub device_type: String,
    /// Index within its type
    #[serde(rename = "DeviceNumber")]
    pub number: u32,
    /// Stable unique id
    #[serde(rename = "UniqueID")]
    pub unique_id: String,
}

/// HTTP client of one Alpaca server
#[derive(Debug)]
pub struct AlpacaService {
    http: Client,
    base_url: String,
    client_id: u32,
    transaction: AtomicU32,
}

impl AlpacaService {
    /// Build a client for `http://host:port`
    pub fn new(host: &str, port: u16, config: &AlpacaConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            http,
            base_url: format!("http://{}:{}", host, port),
            client_id: config.client_id,
            transaction: AtomicU32::new(0),
        })
    }

    /// Server root URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Client id sent with every request
    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    fn next_transaction(&self) -> u32 {
        self.transaction.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn ids(&self) -> [(&'static str, String); 2] {
        [
            ("ClientID", self.client_id.to_string()),
            ("ClientTransactionID", self.next_transaction().to_string()),
        ]
    }

    /// `GET /api/v1/{path}`
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_with(path, &[]).await
    }

    /// `GET /api/v1/{path}` with extra query parameters
    pub async fn get_with<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}/api/v1/{}", self.base_url, path);
        trace!(%url, "Alpaca GET");

        let response = self
            .http
            .get(&url)
            .query(&self.ids())
            .query(query)
            .send()
            .await?;
        decode::<T>(response).await?.into_value()
    }

    /// `PUT /api/v1/{path}` with form parameters
    pub async fn put(&self, path: &str, params: &[(&str, String)]) -> Result<()> {
        let url = format!("{}/api/v1/{}", self.base_url, path);
        trace!(%url, "Alpaca PUT");

        let mut form: Vec<(&str, String)> = params.to_vec();
        form.extend(self.ids());

        let response = self.http.put(&url).form(&form).send().await?;
        decode::<serde_json::Value>(response).await?.check()
    }

    /// `GET /api/v1/{path}` for image data
    ///
    /// Prefers the ImageBytes encoding and falls back to the JSON array.
    /// Returns the file suffix of the payload and its raw bytes.
    pub async fn get_image(&self, path: &str) -> Result<(&'static str, Bytes)> {
        let url = format!("{}/api/v1/{}", self.base_url, path);
        trace!(%url, "Alpaca image GET");

        let response = self
            .http
            .get(&url)
            .header(ACCEPT, format!("{}, application/json", IMAGE_BYTES))
            .query(&self.ids())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeviceError::invalid_response(format!("HTTP {}: {}", status, body.trim())));
        }

        let binary = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with(IMAGE_BYTES));
        let data = response.bytes().await?;

        if binary {
            check_image_bytes(&data)?;
            Ok((".imagebytes", data))
        } else {
            serde_json::from_slice::<AlpacaResponse<serde_json::Value>>(&data)
                .map_err(|e| DeviceError::invalid_response(e.to_string()))?
                .check()?;
            Ok((".json", data))
        }
    }

    /// `GET /management/v1/configureddevices`
    pub async fn configured_devices(&self) -> Result<Vec<ConfiguredDevice>> {
        let url = format!("{}/management/v1/configureddevices", self.base_url);
        let response = self.http.get(&url).query(&self.ids()).send().await?;
        decode::<Vec<ConfiguredDevice>>(response).await?.into_value()
    }
}

fn read_i32(data: &[u8], offset: usize) -> Option<i32> {
    let bytes = data.get(offset..offset + 4)?;
    <[u8; 4]>::try_from(bytes).ok().map(i32::from_le_bytes)
}

fn check_image_bytes(data: &[u8]) -> Result<()> {
    if data.len() < IMAGE_BYTES_HEADER {
        return Err(DeviceError::invalid_response("truncated ImageBytes header"));
    }

    let code = read_i32(data, 4).unwrap_or(0);
    if code != 0 {
        let start = read_i32(data, 16)
            .and_then(|start| usize::try_from(start).ok())
            .unwrap_or(IMAGE_BYTES_HEADER)
            .min(data.len());
        return Err(DeviceError::Remote {
            code,
            message: String::from_utf8_lossy(&data[start..]).into_owned(),
        });
    }
    Ok(())
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<AlpacaResponse<T>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DeviceError::invalid_response(format!("HTTP {}: {}", status, body.trim())));
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| DeviceError::invalid_response(e.to_string()))
}
