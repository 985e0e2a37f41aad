//! Core library for the `weather` app.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - The QWeather API client behind the [`WeatherApi`] trait
//! - An observable key-value store and the location repository built on it
//! - The [`WeatherOrchestrator`], which owns all state a front end renders
//!
//! It is used by `weather-cli`, but can also back other front ends.

pub mod config;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod repository;
pub mod store;

pub use config::Config;
pub use model::{AirQualityNow, Daily, IndicesDaily, Location, NowWeather, WeatherSnapshot};
pub use orchestrator::{OrchestratorOptions, WeatherOrchestrator};
pub use provider::{ApiResponse, IndexCategory, QWeatherClient, WeatherApi};
pub use repository::LocationRepository;
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
