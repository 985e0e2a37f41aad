use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A city as returned by the lookup API and as persisted locally.
///
/// Two locations are the same city when their `id`s match; the other fields
/// are display data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adm2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Location {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            adm2: None,
            country: None,
        }
    }

    pub fn with_adm2(mut self, adm2: impl Into<String>) -> Self {
        self.adm2 = Some(adm2.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn same_city(&self, other: &Location) -> bool {
        self.id == other.id
    }

    /// "Name, adm2, country" with missing or repeated parts left out.
    pub fn display_name(&self) -> String {
        let mut parts = vec![self.name.as_str()];
        for part in [self.adm2.as_deref(), self.country.as_deref()]
            .into_iter()
            .flatten()
        {
            if !parts.contains(&part) {
                parts.push(part);
            }
        }
        parts.join(", ")
    }
}

/// City seeded on first launch when nothing has been persisted yet.
pub fn default_city() -> Location {
    Location::new("漳州", "101230601")
        .with_adm2("漳州")
        .with_country("中国")
}

/// Real-time conditions (`/v7/weather/now`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowWeather {
    pub temp: String,
    pub feels_like: String,
    pub icon: String,
    pub text: String,
    pub wind_dir: String,
    pub wind_scale: String,
    pub humidity: String,
    pub pressure: String,
    pub vis: String,
}

/// One day of the 7-day forecast (`/v7/weather/7d`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Daily {
    pub fx_date: String,
    pub temp_max: String,
    pub temp_min: String,
    pub icon_day: String,
    pub text_day: String,
    #[serde(default)]
    pub sunrise: Option<String>,
    #[serde(default)]
    pub sunset: Option<String>,
}

impl Daily {
    /// Forecast date, if `fx_date` is a well-formed `YYYY-MM-DD`.
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.fx_date, "%Y-%m-%d").ok()
    }
}

/// Lifestyle index for one day (`/v7/indices/1d`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicesDaily {
    pub date: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub level: String,
    pub category: String,
    pub text: String,
}

/// Real-time air quality (`/v7/air/now`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirQualityNow {
    pub pub_time: String,
    pub aqi: String,
    pub level: String,
    pub category: String,
    pub primary: String,
    pub pm10: String,
    pub pm2p5: String,
    pub no2: String,
    pub so2: String,
    pub co: String,
    pub o3: String,
}

/// What the weather screen shows for the active city.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WeatherSnapshot {
    Loading,
    #[default]
    Empty,
    Error(String),
    Success {
        current: NowWeather,
        daily: Vec<Daily>,
        air_quality: Option<AirQualityNow>,
        indices: Option<Vec<IndicesDaily>>,
    },
}

impl WeatherSnapshot {
    /// `true` once a fetch sequence has produced its final result.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            WeatherSnapshot::Error(_) | WeatherSnapshot::Success { .. }
        )
    }
}
