use crate::model::{AirQualityNow, Daily, IndicesDaily, Location, NowWeather};
use async_trait::async_trait;
use std::{convert::TryFrom, fmt::Debug};

pub mod qweather;

pub use qweather::QWeatherClient;

/// Status code the weather API reports for a successful call.
pub const SUCCESS_CODE: &str = "200";

/// A call that reached the API: its status code and, when present, the data.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub code: String,
    pub payload: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(payload: T) -> Self {
        Self {
            code: SUCCESS_CODE.to_string(),
            payload: Some(payload),
        }
    }

    pub fn failed(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            payload: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// Payload of a successful call; `None` for any other code.
    pub fn into_success(self) -> Option<T> {
        if self.is_success() {
            self.payload
        } else {
            None
        }
    }
}

/// Lifestyle index categories accepted by `/v7/indices/1d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexCategory {
    #[default]
    All,
    Sport,
    CarWash,
    Dressing,
    Fishing,
    Uv,
    Travel,
    Allergy,
    Comfort,
    Flu,
    AirPollution,
    AirConditioner,
    Sunglasses,
    Makeup,
    Drying,
    Traffic,
    Sunscreen,
}

impl IndexCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexCategory::All => "0",
            IndexCategory::Sport => "1",
            IndexCategory::CarWash => "2",
            IndexCategory::Dressing => "3",
            IndexCategory::Fishing => "4",
            IndexCategory::Uv => "5",
            IndexCategory::Travel => "6",
            IndexCategory::Allergy => "7",
            IndexCategory::Comfort => "8",
            IndexCategory::Flu => "9",
            IndexCategory::AirPollution => "10",
            IndexCategory::AirConditioner => "11",
            IndexCategory::Sunglasses => "12",
            IndexCategory::Makeup => "13",
            IndexCategory::Drying => "14",
            IndexCategory::Traffic => "15",
            IndexCategory::Sunscreen => "16",
        }
    }

    pub const fn all() -> &'static [IndexCategory] {
        &[
            IndexCategory::All,
            IndexCategory::Sport,
            IndexCategory::CarWash,
            IndexCategory::Dressing,
            IndexCategory::Fishing,
            IndexCategory::Uv,
            IndexCategory::Travel,
            IndexCategory::Allergy,
            IndexCategory::Comfort,
            IndexCategory::Flu,
            IndexCategory::AirPollution,
            IndexCategory::AirConditioner,
            IndexCategory::Sunglasses,
            IndexCategory::Makeup,
            IndexCategory::Drying,
            IndexCategory::Traffic,
            IndexCategory::Sunscreen,
        ]
    }
}

impl std::fmt::Display for IndexCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for IndexCategory {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        IndexCategory::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == value.trim())
            .ok_or_else(|| {
                anyhow::anyhow!("Unknown index category '{value}'. Expected 0..=16.")
            })
    }
}

/// The five read calls the app makes against the weather service.
///
/// `Err` means the call never produced a response (connection, body or
/// decoding failure). A response with a non-`"200"` code is `Ok`.
#[async_trait]
pub trait WeatherApi: Send + Sync + Debug {
    async fn search_city(&self, query: &str) -> anyhow::Result<ApiResponse<Vec<Location>>>;

    async fn current_weather(&self, location_id: &str) -> anyhow::Result<ApiResponse<NowWeather>>;

    async fn daily_forecast(&self, location_id: &str) -> anyhow::Result<ApiResponse<Vec<Daily>>>;

    async fn air_quality(&self, location_id: &str) -> anyhow::Result<ApiResponse<AirQualityNow>>;

    async fn indices(
        &self,
        location_id: &str,
        category: IndexCategory,
    ) -> anyhow::Result<ApiResponse<Vec<IndicesDaily>>>;
}
