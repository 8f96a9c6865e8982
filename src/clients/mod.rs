/// External API clients module
#[cfg(test)]
pub mod mock;

use crate::cache::Params;
use crate::config::FetchTimeouts;
use crate::errors::FetchError;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

const NASA_API_URL: &str = "https://api.nasa.gov";
const IMAGES_API_URL: &str = "https://images-api.nasa.gov";
const EONET_URL: &str = "https://eonet.gsfc.nasa.gov/api/v3";

/// HTTP client wrapper with common configuration
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(default_timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(default_timeout)
            .user_agent("apod-gallery/1.0")
            .build()
            .map_err(|e| FetchError::from_reqwest("http.client", e))?;
        Ok(Self { client })
    }

    /// GET `url` with `params` and decode the JSON body. Non-2xx is an error.
    pub async fn get_json(
        &self,
        operation: &str,
        url: &str,
        params: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Value, FetchError> {
        let resp = self
            .client
            .get(url)
            .query(params)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(operation, e))?
            .error_for_status()
            .map_err(|e| FetchError::from_reqwest(operation, e))?;

        resp.json()
            .await
            .map_err(|e| FetchError::from_reqwest(operation, e))
    }

    /// GET raw bytes, used for share card backgrounds
    pub async fn get_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let operation = "image.download";
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(operation, e))?
            .error_for_status()
            .map_err(|e| FetchError::from_reqwest(operation, e))?;

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(operation, e))?;
        Ok(bytes.to_vec())
    }
}

fn borrow_params(params: &Params) -> Vec<(&str, &str)> {
    params.iter().map(|(k, v)| (*k, v.as_str())).collect()
}

/// NASA APIs client (APOD, NeoWs)
#[derive(Clone)]
pub struct NasaClient {
    http_client: HttpClient,
    base_url: String,
    api_key: String,
    timeouts: FetchTimeouts,
}

impl NasaClient {
    pub fn new(http_client: HttpClient, api_key: String, timeouts: FetchTimeouts) -> Self {
        Self {
            http_client,
            base_url: NASA_API_URL.to_string(),
            api_key,
            timeouts,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn get(
        &self,
        operation: &str,
        path: &str,
        params: &Params,
        timeout: Duration,
    ) -> Result<Value, FetchError> {
        let mut query = borrow_params(params);
        info!(operation, params = ?query, "fetching");
        query.push(("api_key", self.api_key.as_str()));
        let url = format!("{}{}", self.base_url, path);
        self.http_client.get_json(operation, &url, &query, timeout).await
    }

    /// Single-date APOD (`date`, `thumbs`)
    pub async fn fetch_apod(&self, params: &Params) -> Result<Value, FetchError> {
        self.get("apod.single", "/planetary/apod", params, self.timeouts.single)
            .await
    }

    /// APOD range (`start_date`, `end_date`, `thumbs`)
    pub async fn fetch_apod_range(&self, params: &Params) -> Result<Value, FetchError> {
        self.get("apod.range", "/planetary/apod", params, self.timeouts.range)
            .await
    }

    /// N random APODs (`count`, `thumbs`)
    pub async fn fetch_apod_random(&self, params: &Params) -> Result<Value, FetchError> {
        self.get("apod.random", "/planetary/apod", params, self.timeouts.range)
            .await
    }

    /// Near Earth Objects feed (`start_date`, `end_date`)
    pub async fn fetch_neo_feed(&self, params: &Params) -> Result<Value, FetchError> {
        self.get("neo.feed", "/neo/rest/v1/feed", params, self.timeouts.range)
            .await
    }
}

/// NASA Image and Video Library client
#[derive(Clone)]
pub struct ImageLibraryClient {
    http_client: HttpClient,
    base_url: String,
    timeout: Duration,
}

impl ImageLibraryClient {
    pub fn new(http_client: HttpClient, timeouts: &FetchTimeouts) -> Self {
        Self {
            http_client,
            base_url: IMAGES_API_URL.to_string(),
            timeout: timeouts.single,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Search (`q`, `page`, `media_type`)
    pub async fn search(&self, params: &Params) -> Result<Value, FetchError> {
        let query = borrow_params(params);
        info!(operation = "images.search", params = ?query, "fetching");
        let url = format!("{}/search", self.base_url);
        self.http_client
            .get_json("images.search", &url, &query, self.timeout)
            .await
    }

    /// Asset manifest for one NASA id
    pub async fn asset(&self, nasa_id: &str) -> Result<Value, FetchError> {
        info!(operation = "images.asset", nasa_id, "fetching");
        let url = format!("{}/asset/{}", self.base_url, nasa_id);
        self.http_client
            .get_json("images.asset", &url, &[], self.timeout)
            .await
    }
}

/// EONET natural events client
#[derive(Clone)]
pub struct EonetClient {
    http_client: HttpClient,
    base_url: String,
    timeout: Duration,
}

impl EonetClient {
    pub fn new(http_client: HttpClient, timeouts: &FetchTimeouts) -> Self {
        Self {
            http_client,
            base_url: EONET_URL.to_string(),
            timeout: timeouts.range,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Events (`status`, `days`, optional `category`)
    pub async fn events(&self, params: &Params) -> Result<Value, FetchError> {
        let query = borrow_params(params);
        info!(operation = "events.list", params = ?query, "fetching");
        let url = format!("{}/events", self.base_url);
        self.http_client
            .get_json("events.list", &url, &query, self.timeout)
            .await
    }

    pub async fn categories(&self) -> Result<Value, FetchError> {
        info!(operation = "events.categories", "fetching");
        let url = format!("{}/categories", self.base_url);
        self.http_client
            .get_json("events.categories", &url, &[], self.timeout)
            .await
    }
}
