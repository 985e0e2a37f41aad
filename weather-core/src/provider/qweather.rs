use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};

use crate::{
    Config,
    model::{AirQualityNow, Daily, IndicesDaily, Location, NowWeather},
};

use super::{ApiResponse, IndexCategory, WeatherApi};

pub const DEFAULT_API_HOST: &str = "https://devapi.qweather.com";

const CITY_LOOKUP_PATH: &str = "/geo/v2/city/lookup";
const WEATHER_NOW_PATH: &str = "/v7/weather/now";
const WEATHER_7D_PATH: &str = "/v7/weather/7d";
const INDICES_1D_PATH: &str = "/v7/indices/1d";
const AIR_NOW_PATH: &str = "/v7/air/now";

/// HTTP client for the QWeather REST API.
#[derive(Debug, Clone)]
pub struct QWeatherClient {
    api_key: String,
    host: String,
    http: Client,
}

impl QWeatherClient {
    pub fn new(api_key: String, host: impl Into<String>) -> Self {
        Self::with_http(api_key, host, Client::new())
    }

    pub fn with_http(api_key: String, host: impl Into<String>, http: Client) -> Self {
        let host = host.into().trim_end_matches('/').to_string();
        Self {
            api_key,
            host,
            http,
        }
    }

    /// Build a client from the stored configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.api_key()?.to_owned();

        let mut builder = Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder.build().context("Failed to build HTTP client")?;

        Ok(Self::with_http(api_key, config.api_host.clone(), http))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    async fn get<E>(&self, path: &str, params: &[(&str, &str)]) -> Result<ApiResponse<E::Payload>>
    where
        E: Envelope + DeserializeOwned,
    {
        let url = self.url(path);
        tracing::debug!(%url, "QWeather request");

        let mut query = params.to_vec();
        query.push(("key", self.api_key.as_str()));

        let res = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("Failed to send request to QWeather ({path})"))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .with_context(|| format!("Failed to read QWeather response body ({path})"))?;

        if !status.is_success() {
            tracing::debug!(%status, body = %truncate_body(&body), "QWeather request rejected");
            return Ok(ApiResponse::failed(status.as_str()));
        }

        let parsed: E = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse QWeather JSON ({path})"))?;

        Ok(parsed.into_response())
    }
}

/// Response body shape shared by every QWeather endpoint: a `code` plus one
/// endpoint-specific data field.
trait Envelope {
    type Payload;

    fn into_response(self) -> ApiResponse<Self::Payload>;
}

#[derive(Debug, Deserialize)]
struct CityLookupBody {
    code: String,
    location: Option<Vec<Location>>,
}

impl Envelope for CityLookupBody {
    type Payload = Vec<Location>;

    fn into_response(self) -> ApiResponse<Self::Payload> {
        ApiResponse {
            code: self.code,
            payload: self.location,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WeatherNowBody {
    code: String,
    now: Option<NowWeather>,
}

impl Envelope for WeatherNowBody {
    type Payload = NowWeather;

    fn into_response(self) -> ApiResponse<Self::Payload> {
        ApiResponse {
            code: self.code,
            payload: self.now,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DailyBody {
    code: String,
    daily: Option<Vec<Daily>>,
}

impl Envelope for DailyBody {
    type Payload = Vec<Daily>;

    fn into_response(self) -> ApiResponse<Self::Payload> {
        ApiResponse {
            code: self.code,
            payload: self.daily,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IndicesBody {
    code: String,
    daily: Option<Vec<IndicesDaily>>,
}

impl Envelope for IndicesBody {
    type Payload = Vec<IndicesDaily>;

    fn into_response(self) -> ApiResponse<Self::Payload> {
        ApiResponse {
            code: self.code,
            payload: self.daily,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AirNowBody {
    code: String,
    now: Option<AirQualityNow>,
}

impl Envelope for AirNowBody {
    type Payload = AirQualityNow;

    fn into_response(self) -> ApiResponse<Self::Payload> {
        ApiResponse {
            code: self.code,
            payload: self.now,
        }
    }
}

#[async_trait]
impl WeatherApi for QWeatherClient {
    async fn search_city(&self, query: &str) -> Result<ApiResponse<Vec<Location>>> {
        self.get::<CityLookupBody>(CITY_LOOKUP_PATH, &[("location", query)])
            .await
    }

    async fn current_weather(&self, location_id: &str) -> Result<ApiResponse<NowWeather>> {
        self.get::<WeatherNowBody>(WEATHER_NOW_PATH, &[("location", location_id)])
            .await
    }

    async fn daily_forecast(&self, location_id: &str) -> Result<ApiResponse<Vec<Daily>>> {
        self.get::<DailyBody>(WEATHER_7D_PATH, &[("location", location_id)])
            .await
    }

    async fn air_quality(&self, location_id: &str) -> Result<ApiResponse<AirQualityNow>> {
        self.get::<AirNowBody>(AIR_NOW_PATH, &[("location", location_id)])
            .await
    }

    async fn indices(
        &self,
        location_id: &str,
        category: IndexCategory,
    ) -> Result<ApiResponse<Vec<IndicesDaily>>> {
        self.get::<IndicesBody>(
            INDICES_1D_PATH,
            &[("location", location_id), ("type", category.as_str())],
        )
        .await
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
