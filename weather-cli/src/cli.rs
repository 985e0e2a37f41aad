use std::{fmt, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use inquire::{Password, Select, Text};
use weather_core::{
    Config, FileStore, Location, LocationRepository, OrchestratorOptions, QWeatherClient,
    WeatherOrchestrator, WeatherSnapshot,
};

use crate::render;

const WEATHER_WAIT: Duration = Duration::from_secs(30);

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Weather CLI")]
pub struct Cli {
    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Set the QWeather API key and host.
    Configure,

    /// Show weather for the current city.
    Show,

    /// Search for a city and make it the current one.
    Search {
        /// City name, pinyin or location id.
        query: String,

        /// Take the first match instead of asking.
        #[arg(long)]
        first: bool,
    },

    /// List favorite cities.
    Favorites,

    /// Switch to a favorite city by id.
    Use {
        /// Location id, e.g. "101010100".
        id: String,
    },

    /// Remove a city from favorites by id.
    Remove {
        /// Location id, e.g. "101010100".
        id: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Configure => configure(),
            Command::Show => {
                let orchestrator = open(&Config::load()?).await?;
                orchestrator.start();
                show(&orchestrator).await
            }
            Command::Search { query, first } => {
                let orchestrator = open(&Config::load()?).await?;
                search(&orchestrator, &query, first).await
            }
            Command::Favorites => {
                let repo = open_repository().await?;
                let current = repo.current_city().await;
                let favorites = repo.favorites().await;
                print!("{}", render::favorites(&favorites, current.as_ref()));
                Ok(())
            }
            Command::Use { id } => {
                let orchestrator = open(&Config::load()?).await?;
                let city = find_favorite(&id).await?;
                orchestrator.select_city(city).await?;
                orchestrator.start();
                show(&orchestrator).await
            }
            Command::Remove { id } => {
                let orchestrator = open(&Config::load()?).await?;
                let city = find_favorite(&id).await?;
                orchestrator.remove_favorite(&city).await?;
                println!("Removed {}", city.display_name());
                Ok(())
            }
        }
    }
}

fn configure() -> Result<()> {
    let mut cfg = Config::load()?;

    let api_key = Password::new("QWeather API key:")
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;
    let host = Text::new("API host:")
        .with_default(&cfg.api_host)
        .prompt()
        .context("Failed to read API host")?;

    cfg.set_api_key(api_key);
    cfg.api_host = host.trim().to_string();
    cfg.save()?;

    let path = Config::config_file_path()?;
    tracing::debug!(path = %path.display(), host = %cfg.api_host, "configuration saved");
    println!("Configuration saved to {}", path.display());
    Ok(())
}

async fn open_repository() -> Result<LocationRepository> {
    let path = Config::store_path()?;
    let store = FileStore::open(&path)
        .await
        .with_context(|| format!("Failed to open saved cities: {}", path.display()))?;
    Ok(LocationRepository::new(Arc::new(store)))
}

/// Build an orchestrator over the on-disk store. Background tasks are not
/// started yet, so callers can persist a new city before the first fetch.
async fn open(config: &Config) -> Result<WeatherOrchestrator> {
    let api = QWeatherClient::from_config(config)?;
    tracing::debug!(
        host = %api.host(),
        timeout_secs = ?config.request_timeout_secs,
        "API client ready"
    );

    let repo = open_repository().await?;
    let options = OrchestratorOptions::from_config(config);
    Ok(WeatherOrchestrator::new(Arc::new(api), repo, options))
}

async fn find_favorite(id: &str) -> Result<Location> {
    let favorites = open_repository().await?.favorites().await;
    favorites
        .into_iter()
        .find(|c| c.id == id)
        .with_context(|| {
            format!("No favorite with id '{id}'.\nHint: run `weather favorites` to list them.")
        })
}

async fn show(orchestrator: &WeatherOrchestrator) -> Result<()> {
    let snapshot = wait_for_weather(orchestrator).await?;
    let city = orchestrator.current_city().borrow().clone();
    orchestrator.shutdown();

    let today = chrono::Local::now().date_naive();
    print!("{}", render::snapshot(city.as_ref(), &snapshot, today));

    if let WeatherSnapshot::Error(message) = snapshot {
        bail!(message);
    }
    Ok(())
}

async fn wait_for_weather(orchestrator: &WeatherOrchestrator) -> Result<WeatherSnapshot> {
    let mut rx = orchestrator.weather();
    let snapshot = tokio::time::timeout(WEATHER_WAIT, rx.wait_for(WeatherSnapshot::is_settled))
        .await
        .context("Timed out waiting for weather data")?
        .context("Weather updates stopped unexpectedly")?
        .clone();
    Ok(snapshot)
}

async fn search(orchestrator: &WeatherOrchestrator, query: &str, first: bool) -> Result<()> {
    orchestrator.search(query).await;
    let results = orchestrator.search_results().borrow().clone();
    tracing::debug!(query, count = results.len(), "search results");

    if results.is_empty() {
        bail!("No cities found for '{query}'.");
    }

    let city = if first || results.len() == 1 {
        results[0].clone()
    } else {
        let choices = results.into_iter().map(CityChoice).collect();
        Select::new("Select a city:", choices)
            .prompt()
            .context("No city selected")?
            .0
    };
    tracing::debug!(id = %city.id, name = %city.name, "city chosen");

    orchestrator.select_city(city).await?;
    orchestrator.start();
    show(orchestrator).await
}

struct CityChoice(Location);

impl fmt::Display for CityChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0.display_name(), self.0.id)
    }
}
