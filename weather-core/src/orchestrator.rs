//! Drives everything the weather screen shows.
//!
//! The orchestrator owns five observable values (weather snapshot, current
//! city, favorites, search query, search results) and keeps them in sync with
//! the [`LocationRepository`] and the [`WeatherApi`]. Front ends subscribe to
//! the `watch` receivers and send intents through the public methods.
//!
//! Selecting a city only persists it. Weather is fetched when the persisted
//! current city is observed to change, so there is exactly one place that
//! starts a fetch.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle};
use tokio_stream::StreamExt;

use crate::{
    Config,
    model::{Location, WeatherSnapshot, default_city},
    provider::{ApiResponse, IndexCategory, WeatherApi},
    repository::LocationRepository,
    store::StoreError,
};

/// Shown when a mandatory call never got a response.
pub const NETWORK_FAILED: &str = "Network connection failed";
/// Shown when a mandatory call answered with an error code or no data.
pub const FETCH_FAILED: &str = "Failed to fetch weather";

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub default_city: Location,
    pub search_debounce: Duration,
    pub index_category: IndexCategory,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            default_city: default_city(),
            search_debounce: Duration::from_millis(crate::config::DEFAULT_SEARCH_DEBOUNCE_MS),
            index_category: IndexCategory::All,
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_city: config.default_city(),
            search_debounce: config.search_debounce(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeatherOrchestrator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    api: Arc<dyn WeatherApi>,
    repo: LocationRepository,
    options: OrchestratorOptions,

    weather: watch::Sender<WeatherSnapshot>,
    current_city: watch::Sender<Option<Location>>,
    favorites: watch::Sender<Vec<Location>>,
    search_query: watch::Sender<String>,
    search_results: watch::Sender<Vec<Location>>,

    /// Bumped by every fetch sequence; only the latest may publish.
    fetch_generation: AtomicU64,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WeatherOrchestrator {
    pub fn new(
        api: Arc<dyn WeatherApi>,
        repo: LocationRepository,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                repo,
                options,
                weather: watch::channel(WeatherSnapshot::Empty).0,
                current_city: watch::channel(None).0,
                favorites: watch::channel(Vec::new()).0,
                search_query: watch::channel(String::new()).0,
                search_results: watch::channel(Vec::new()).0,
                fetch_generation: AtomicU64::new(0),
                started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawn the background tasks: city/favorites observation, first-launch
    /// seeding and search debouncing. Calling it again does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let handles = vec![
            tokio::spawn(self.clone().watch_current_city()),
            tokio::spawn(self.clone().watch_favorites()),
            tokio::spawn(self.clone().seed_default_city()),
            tokio::spawn(self.clone().debounce_search()),
        ];
        self.tasks().extend(handles);
    }

    /// Abort the tasks spawned by [`start`](Self::start). In-flight fetch
    /// sequences are left to finish.
    pub fn shutdown(&self) {
        for handle in self.tasks().drain(..) {
            handle.abort();
        }
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn weather(&self) -> watch::Receiver<WeatherSnapshot> {
        self.inner.weather.subscribe()
    }

    pub fn current_city(&self) -> watch::Receiver<Option<Location>> {
        self.inner.current_city.subscribe()
    }

    pub fn favorites(&self) -> watch::Receiver<Vec<Location>> {
        self.inner.favorites.subscribe()
    }

    pub fn search_query(&self) -> watch::Receiver<String> {
        self.inner.search_query.subscribe()
    }

    pub fn search_results(&self) -> watch::Receiver<Vec<Location>> {
        self.inner.search_results.subscribe()
    }

    /// Run one fetch sequence for `location_id` and publish the outcome,
    /// unless a newer sequence has started in the meantime.
    pub async fn fetch_weather(&self, location_id: &str) {
        let generation = self.inner.fetch_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.publish(generation, WeatherSnapshot::Loading);

        let snapshot = self.load_weather(location_id).await;
        if !self.publish(generation, snapshot) {
            tracing::debug!(
                location_id,
                generation,
                "dropped result of superseded fetch"
            );
        }
    }

    /// Fetch again for the current city. No-op when there is none yet.
    pub async fn refresh(&self) {
        let cached = self.inner.current_city.borrow().clone();
        let city = match cached {
            Some(city) => Some(city),
            None => self.inner.repo.current_city().await,
        };

        match city {
            Some(city) => self.fetch_weather(&city.id).await,
            None => tracing::debug!("refresh requested without a current city"),
        }
    }

    /// Persist `city` as the current city, add it to favorites and reset the
    /// search. The fetch follows from the current-city observation.
    pub async fn select_city(&self, city: Location) -> Result<(), StoreError> {
        tracing::info!(id = %city.id, name = %city.name, "city selected");

        self.inner.repo.save_current_city(&city).await?;
        self.add_to_favorites(city).await?;

        self.inner.search_query.send_replace(String::new());
        self.clear_search_results();
        Ok(())
    }

    /// Put `city` at the front of favorites unless a city with the same id is
    /// already there.
    pub async fn add_to_favorites(&self, city: Location) -> Result<(), StoreError> {
        let mut list = self.inner.repo.favorites().await;
        if list.iter().any(|c| c.same_city(&city)) {
            return Ok(());
        }

        list.insert(0, city);
        self.inner.repo.save_favorites(&list).await
    }

    pub async fn remove_favorite(&self, city: &Location) -> Result<(), StoreError> {
        let list: Vec<Location> = self
            .inner
            .repo
            .favorites()
            .await
            .into_iter()
            .filter(|c| !c.same_city(city))
            .collect();

        self.inner.repo.save_favorites(&list).await
    }

    /// Look up cities matching `query`. Blank queries clear the results
    /// without a call; failed calls leave the results as they were.
    pub async fn search(&self, query: &str) {
        if query.trim().is_empty() {
            self.clear_search_results();
            return;
        }

        match self.inner.api.search_city(query).await {
            Ok(resp) if resp.is_success() => {
                let found = resp.payload.unwrap_or_default();
                tracing::debug!(query, count = found.len(), "city search finished");
                self.inner.search_results.send_replace(found);
            }
            Ok(resp) => tracing::debug!(query, code = %resp.code, "city search rejected"),
            Err(e) => tracing::warn!(query, error = %e, "city search failed"),
        }
    }

    pub fn clear_search_results(&self) {
        self.inner.search_results.send_if_modified(|results| {
            let had_results = !results.is_empty();
            results.clear();
            had_results
        });
    }

    /// Update the typed query. The debouncer started by
    /// [`start`](Self::start) turns stable queries into searches.
    pub fn set_search_query(&self, query: impl Into<String>) {
        self.inner.search_query.send_replace(query.into());
    }

    fn publish(&self, generation: u64, snapshot: WeatherSnapshot) -> bool {
        let fetch_generation = &self.inner.fetch_generation;
        self.inner.weather.send_if_modified(|current| {
            if fetch_generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            *current = snapshot;
            true
        })
    }

    async fn load_weather(&self, location_id: &str) -> WeatherSnapshot {
        let api = &self.inner.api;

        let current = match api.current_weather(location_id).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(location_id, error = %e, "current weather request failed");
                return WeatherSnapshot::Error(NETWORK_FAILED.to_string());
            }
        };
        let daily = match api.daily_forecast(location_id).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(location_id, error = %e, "daily forecast request failed");
                return WeatherSnapshot::Error(NETWORK_FAILED.to_string());
            }
        };

        let (current_code, daily_code) = (current.code.clone(), daily.code.clone());
        let (Some(current), Some(daily)) = (current.into_success(), daily.into_success()) else {
            tracing::warn!(location_id, %current_code, %daily_code, "weather fetch rejected");
            return WeatherSnapshot::Error(FETCH_FAILED.to_string());
        };

        let category = self.inner.options.index_category;
        let air_quality = optional(api.air_quality(location_id).await, "air quality");
        let indices = optional(api.indices(location_id, category).await, "indices");

        WeatherSnapshot::Success {
            current,
            daily,
            air_quality,
            indices,
        }
    }

    async fn watch_current_city(self) {
        let mut cities = Box::pin(self.inner.repo.observe_current_city());

        while let Some(city) = cities.next().await {
            let changed = self.inner.current_city.send_if_modified(|current| {
                if *current == city {
                    return false;
                }
                *current = city.clone();
                true
            });

            if let (true, Some(city)) = (changed, city) {
                tracing::info!(id = %city.id, name = %city.name, "current city changed");
                let this = self.clone();
                tokio::spawn(async move { this.fetch_weather(&city.id).await });
            }
        }
    }

    async fn watch_favorites(self) {
        let mut favorites = Box::pin(self.inner.repo.observe_favorites());

        while let Some(list) = favorites.next().await {
            self.inner.favorites.send_if_modified(|current| {
                if *current == list {
                    return false;
                }
                *current = list;
                true
            });
        }
    }

    /// First launch: nothing persisted yet, so store the default city and make
    /// it the only favorite. Later `None`s on the city stream are not seeding
    /// triggers.
    async fn seed_default_city(self) {
        let saved = Box::pin(self.inner.repo.observe_current_city())
            .next()
            .await
            .flatten();
        if saved.is_some() {
            return;
        }

        let city = self.inner.options.default_city.clone();
        tracing::info!(id = %city.id, name = %city.name, "no saved city, seeding default");

        if let Err(e) = self.inner.repo.save_current_city(&city).await {
            tracing::warn!(error = %e, "failed to persist default city");
            return;
        }
        if let Err(e) = self.add_to_favorites(city).await {
            tracing::warn!(error = %e, "failed to add default city to favorites");
        }
    }

    async fn debounce_search(self) {
        let mut queries = self.inner.search_query.subscribe();
        let quiet = self.inner.options.search_debounce;

        'next_edit: loop {
            if queries.changed().await.is_err() {
                return;
            }

            loop {
                let query = queries.borrow_and_update().clone();
                if query.trim().chars().count() <= 1 {
                    self.clear_search_results();
                    continue 'next_edit;
                }

                tokio::select! {
                    changed = queries.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep(quiet) => {
                        self.search(&query).await;
                        continue 'next_edit;
                    }
                }
            }
        }
    }
}

fn optional<T>(result: anyhow::Result<ApiResponse<T>>, what: &str) -> Option<T> {
    match result {
        Ok(resp) if resp.is_success() => resp.payload,
        Ok(resp) => {
            tracing::debug!(code = %resp.code, "{what} unavailable");
            None
        }
        Err(e) => {
            tracing::debug!(error = %e, "{what} request failed");
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        model::{AirQualityNow, Daily, IndicesDaily, NowWeather},
        repository::{CURRENT_CITY_KEY, FAVORITES_KEY},
        store::{Entries, FailingStore, KeyValueStore, MemoryStore},
    };

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Reply {
        Ok,
        NoPayload,
        Code(&'static str),
        Transport,
    }

    #[derive(Debug)]
    struct MockApi {
        search: Reply,
        current: Reply,
        daily: Reply,
        air: Reply,
        indices: Reply,
        search_hits: Vec<Location>,
        /// Per-location latency of the current-weather call.
        delays: HashMap<String, Duration>,
        calls: Mutex<Vec<String>>,
    }

    impl Default for MockApi {
        fn default() -> Self {
            Self {
                search: Reply::Ok,
                current: Reply::Ok,
                daily: Reply::Ok,
                air: Reply::Ok,
                indices: Reply::Ok,
                search_hits: vec![beijing(), shanghai()],
                delays: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl MockApi {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .count()
        }

        fn reply<T>(reply: Reply, payload: T) -> anyhow::Result<ApiResponse<T>> {
            match reply {
                Reply::Ok => Ok(ApiResponse::ok(payload)),
                Reply::NoPayload => Ok(ApiResponse {
                    code: "200".into(),
                    payload: None,
                }),
                Reply::Code(code) => Ok(ApiResponse::failed(code)),
                Reply::Transport => Err(anyhow::anyhow!("connection reset")),
            }
        }
    }

    #[async_trait]
    impl WeatherApi for MockApi {
        async fn search_city(&self, query: &str) -> anyhow::Result<ApiResponse<Vec<Location>>> {
            self.record(format!("search:{query}"));
            Self::reply(self.search, self.search_hits.clone())
        }

        async fn current_weather(&self, id: &str) -> anyhow::Result<ApiResponse<NowWeather>> {
            self.record(format!("now:{id}"));
            if let Some(delay) = self.delays.get(id) {
                tokio::time::sleep(*delay).await;
            }
            Self::reply(self.current, now_for(id))
        }

        async fn daily_forecast(&self, id: &str) -> anyhow::Result<ApiResponse<Vec<Daily>>> {
            self.record(format!("daily:{id}"));
            Self::reply(self.daily, vec![day("2024-03-01"), day("2024-03-02")])
        }

        async fn air_quality(&self, id: &str) -> anyhow::Result<ApiResponse<AirQualityNow>> {
            self.record(format!("air:{id}"));
            Self::reply(self.air, air())
        }

        async fn indices(
            &self,
            id: &str,
            category: IndexCategory,
        ) -> anyhow::Result<ApiResponse<Vec<IndicesDaily>>> {
            self.record(format!("indices:{id}:{category}"));
            Self::reply(self.indices, vec![index()])
        }
    }

    fn beijing() -> Location {
        Location::new("北京", "101010100").with_country("中国")
    }

    fn shanghai() -> Location {
        Location::new("上海", "101020100").with_country("中国")
    }

    /// Current conditions whose `temp` is the location id, so results from
    /// different cities can be told apart.
    fn now_for(id: &str) -> NowWeather {
        NowWeather {
            temp: id.to_string(),
            feels_like: "17".into(),
            icon: "101".into(),
            text: "多云".into(),
            wind_dir: "东风".into(),
            wind_scale: "2".into(),
            humidity: "60".into(),
            pressure: "1012".into(),
            vis: "16".into(),
        }
    }

    fn day(date: &str) -> Daily {
        Daily {
            fx_date: date.into(),
            temp_max: "20".into(),
            temp_min: "10".into(),
            icon_day: "100".into(),
            text_day: "晴".into(),
            sunrise: None,
            sunset: None,
        }
    }

    fn air() -> AirQualityNow {
        AirQualityNow {
            pub_time: "2024-03-01T10:00+08:00".into(),
            aqi: "42".into(),
            level: "1".into(),
            category: "优".into(),
            primary: "NA".into(),
            pm10: "40".into(),
            pm2p5: "20".into(),
            no2: "10".into(),
            so2: "3".into(),
            co: "0.5".into(),
            o3: "80".into(),
        }
    }

    fn index() -> IndicesDaily {
        IndicesDaily {
            date: "2024-03-01".into(),
            kind: "1".into(),
            name: "运动指数".into(),
            level: "1".into(),
            category: "适宜".into(),
            text: "天气较好".into(),
        }
    }

    /// Store entries with `city` saved as current and `favorites` as the list.
    fn saved(city: &Location, favorites: &[Location]) -> Entries {
        let mut entries = Entries::new();
        entries.insert(
            CURRENT_CITY_KEY.to_string(),
            serde_json::to_string(city).unwrap(),
        );
        entries.insert(
            FAVORITES_KEY.to_string(),
            serde_json::to_string(favorites).unwrap(),
        );
        entries
    }

    struct Harness {
        api: Arc<MockApi>,
        store: Arc<dyn KeyValueStore>,
        repo: LocationRepository,
        orchestrator: WeatherOrchestrator,
    }

    impl Harness {
        fn seed_results(&self, results: Vec<Location>) {
            self.orchestrator.inner.search_results.send_replace(results);
        }
    }

    fn harness(api: MockApi) -> Harness {
        harness_with_store(api, Arc::new(MemoryStore::new()))
    }

    fn harness_with_store(api: MockApi, store: Arc<dyn KeyValueStore>) -> Harness {
        let api = Arc::new(api);
        let repo = LocationRepository::new(store.clone());
        let orchestrator =
            WeatherOrchestrator::new(api.clone(), repo.clone(), OrchestratorOptions::default());
        Harness {
            api,
            store,
            repo,
            orchestrator,
        }
    }

    async fn settled(orchestrator: &WeatherOrchestrator) -> WeatherSnapshot {
        let mut rx = orchestrator.weather();
        tokio::time::timeout(WAIT, rx.wait_for(WeatherSnapshot::is_settled))
            .await
            .expect("weather should settle")
            .expect("sender alive")
            .clone()
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn mandatory_success_yields_full_snapshot() {
        let h = harness(MockApi::default());

        h.orchestrator.fetch_weather("101010100").await;

        let WeatherSnapshot::Success {
            current,
            daily,
            air_quality,
            indices,
        } = h.orchestrator.weather().borrow().clone()
        else {
            panic!("expected success");
        };
        assert_eq!(current.temp, "101010100");
        assert_eq!(daily.len(), 2);
        assert_eq!(air_quality.map(|a| a.aqi), Some("42".to_string()));
        assert_eq!(indices.map(|i| i.len()), Some(1));
        assert_eq!(
            h.api.calls().last().map(String::as_str),
            Some("indices:101010100:0")
        );
    }

    #[tokio::test]
    async fn optional_failures_degrade_to_none() {
        let h = harness(MockApi {
            air: Reply::Transport,
            indices: Reply::Code("500"),
            ..MockApi::default()
        });

        h.orchestrator.fetch_weather("101010100").await;

        match h.orchestrator.weather().borrow().clone() {
            WeatherSnapshot::Success {
                current,
                daily,
                air_quality,
                indices,
            } => {
                assert_eq!(current.temp, "101010100");
                assert_eq!(daily.len(), 2);
                assert_eq!(air_quality, None);
                assert_eq!(indices, None);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn air_quality_error_code_keeps_indices() {
        let h = harness(MockApi {
            air: Reply::Code("403"),
            ..MockApi::default()
        });

        h.orchestrator.fetch_weather("101010100").await;

        match h.orchestrator.weather().borrow().clone() {
            WeatherSnapshot::Success {
                air_quality,
                indices,
                ..
            } => {
                assert_eq!(air_quality, None);
                assert!(indices.is_some());
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn current_weather_transport_failure_is_network_error() {
        let h = harness(MockApi {
            current: Reply::Transport,
            ..MockApi::default()
        });

        h.orchestrator.fetch_weather("101010100").await;

        assert_eq!(
            *h.orchestrator.weather().borrow(),
            WeatherSnapshot::Error(NETWORK_FAILED.to_string())
        );
        assert_eq!(h.api.count("daily:"), 0);
        assert_eq!(h.api.count("air:"), 0);
    }

    #[tokio::test]
    async fn daily_transport_failure_is_network_error() {
        let h = harness(MockApi {
            daily: Reply::Transport,
            ..MockApi::default()
        });

        h.orchestrator.fetch_weather("101010100").await;

        assert_eq!(
            *h.orchestrator.weather().borrow(),
            WeatherSnapshot::Error(NETWORK_FAILED.to_string())
        );
    }

    #[tokio::test]
    async fn mandatory_error_code_is_fetch_error() {
        let h = harness(MockApi {
            daily: Reply::Code("402"),
            ..MockApi::default()
        });

        h.orchestrator.fetch_weather("101010100").await;

        assert_eq!(
            *h.orchestrator.weather().borrow(),
            WeatherSnapshot::Error(FETCH_FAILED.to_string())
        );
        assert_eq!(h.api.count("air:"), 0);
        assert_eq!(h.api.count("indices:"), 0);
    }

    #[tokio::test]
    async fn mandatory_success_without_payload_is_fetch_error() {
        let h = harness(MockApi {
            current: Reply::NoPayload,
            ..MockApi::default()
        });

        h.orchestrator.fetch_weather("101010100").await;

        assert_eq!(
            *h.orchestrator.weather().borrow(),
            WeatherSnapshot::Error(FETCH_FAILED.to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_fetch_does_not_overwrite_newer_result() {
        let mut delays = HashMap::new();
        delays.insert("slow".to_string(), Duration::from_millis(200));
        let h = harness(MockApi {
            delays,
            ..MockApi::default()
        });

        tokio::join!(
            h.orchestrator.fetch_weather("slow"),
            h.orchestrator.fetch_weather("fast")
        );

        match h.orchestrator.weather().borrow().clone() {
            WeatherSnapshot::Success { current, .. } => assert_eq!(current.temp, "fast"),
            other => panic!("expected success, got {other:?}"),
        }
        // Both sequences still ran to completion.
        assert_eq!(h.api.count("indices:slow"), 1);
        assert_eq!(h.api.count("indices:fast"), 1);
    }

    #[tokio::test]
    async fn add_to_favorites_is_idempotent_and_most_recent_first() {
        let h = harness(MockApi::default());

        h.orchestrator.add_to_favorites(beijing()).await.unwrap();
        h.orchestrator.add_to_favorites(shanghai()).await.unwrap();
        let once = h.repo.favorites().await;

        h.orchestrator.add_to_favorites(shanghai()).await.unwrap();
        h.orchestrator.add_to_favorites(beijing()).await.unwrap();

        assert_eq!(once, vec![shanghai(), beijing()]);
        assert_eq!(h.repo.favorites().await, once);
    }

    #[tokio::test]
    async fn add_to_favorites_dedups_by_id_only() {
        let h = harness(MockApi::default());
        h.orchestrator.add_to_favorites(beijing()).await.unwrap();

        let renamed = Location::new("Beijing", "101010100");
        h.orchestrator.add_to_favorites(renamed).await.unwrap();

        assert_eq!(h.repo.favorites().await, vec![beijing()]);
    }

    #[tokio::test]
    async fn remove_favorite_is_idempotent() {
        let h = harness(MockApi::default());
        h.orchestrator.add_to_favorites(beijing()).await.unwrap();
        h.orchestrator.add_to_favorites(shanghai()).await.unwrap();

        h.orchestrator.remove_favorite(&beijing()).await.unwrap();
        let once = h.repo.favorites().await;
        h.orchestrator.remove_favorite(&beijing()).await.unwrap();

        assert_eq!(once, vec![shanghai()]);
        assert_eq!(h.repo.favorites().await, once);

        h.orchestrator.remove_favorite(&shanghai()).await.unwrap();
        assert!(h.repo.favorites().await.is_empty());
    }

    #[tokio::test]
    async fn first_launch_seeds_default_city_and_fetches_it() {
        let h = harness(MockApi::default());

        h.orchestrator.start();

        let snapshot = settled(&h.orchestrator).await;
        assert!(matches!(snapshot, WeatherSnapshot::Success { .. }));

        let mut favorites = h.orchestrator.favorites();
        tokio::time::timeout(WAIT, favorites.wait_for(|f| !f.is_empty()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.repo.current_city().await, Some(default_city()));
        assert_eq!(h.repo.favorites().await, vec![default_city()]);
        assert_eq!(
            *h.orchestrator.current_city().borrow(),
            Some(default_city())
        );
        h.orchestrator.shutdown();
    }

    #[tokio::test]
    async fn saved_city_is_not_reseeded() {
        let h = harness(MockApi::default());
        h.repo.save_current_city(&beijing()).await.unwrap();
        h.repo.save_favorites(&[beijing()]).await.unwrap();

        h.orchestrator.start();
        h.orchestrator.start();

        match settled(&h.orchestrator).await {
            WeatherSnapshot::Success { current, .. } => assert_eq!(current.temp, beijing().id),
            other => panic!("expected success, got {other:?}"),
        }
        settle().await;

        assert_eq!(h.repo.current_city().await, Some(beijing()));
        assert_eq!(h.repo.favorites().await, vec![beijing()]);
        assert_eq!(h.api.count("now:"), 1);
        h.orchestrator.shutdown();
    }

    #[tokio::test]
    async fn corrupt_current_city_after_start_does_not_reseed() {
        let h = harness(MockApi::default());
        h.repo.save_current_city(&beijing()).await.unwrap();
        h.repo.save_favorites(&[beijing()]).await.unwrap();
        h.orchestrator.start();
        settled(&h.orchestrator).await;

        h.store
            .put(CURRENT_CITY_KEY, "{garbage".to_string())
            .await
            .unwrap();

        let mut city = h.orchestrator.current_city();
        tokio::time::timeout(WAIT, city.wait_for(Option::is_none))
            .await
            .unwrap()
            .unwrap();
        settle().await;

        assert_eq!(h.store.snapshot().await[CURRENT_CITY_KEY], "{garbage");
        assert_eq!(h.repo.current_city().await, None);
        assert_eq!(h.repo.favorites().await, vec![beijing()]);
        assert_eq!(h.api.count("now:"), 1);
        h.orchestrator.shutdown();
    }

    #[tokio::test]
    async fn failed_writes_leave_state_untouched() {
        let store = FailingStore::with_entries(saved(&beijing(), &[beijing()]));
        let h = harness_with_store(MockApi::default(), Arc::new(store));
        h.orchestrator.start();
        settled(&h.orchestrator).await;

        let mut favorites = h.orchestrator.favorites();
        tokio::time::timeout(WAIT, favorites.wait_for(|f| !f.is_empty()))
            .await
            .unwrap()
            .unwrap();
        let mut city = h.orchestrator.current_city();
        let mut entries = h.store.subscribe();
        entries.borrow_and_update();
        h.seed_results(vec![shanghai()]);

        assert!(h.orchestrator.select_city(shanghai()).await.is_err());
        assert!(h.orchestrator.add_to_favorites(shanghai()).await.is_err());
        assert!(h.orchestrator.remove_favorite(&beijing()).await.is_err());
        settle().await;

        assert!(!entries.has_changed().unwrap());
        assert!(!city.has_changed().unwrap());
        assert!(!favorites.has_changed().unwrap());
        assert_eq!(*city.borrow_and_update(), Some(beijing()));
        assert_eq!(*favorites.borrow_and_update(), vec![beijing()]);
        assert_eq!(*h.orchestrator.search_results().borrow(), vec![shanghai()]);
        assert_eq!(h.api.count("now:"), 1);
        h.orchestrator.shutdown();
    }

    #[tokio::test]
    async fn select_city_persists_and_fetch_follows_observation() {
        let h = harness(MockApi::default());
        h.repo.save_current_city(&beijing()).await.unwrap();
        h.orchestrator.start();
        settled(&h.orchestrator).await;

        h.orchestrator.set_search_query("上海");
        h.seed_results(vec![shanghai()]);
        h.orchestrator.select_city(shanghai()).await.unwrap();

        assert_eq!(h.repo.current_city().await, Some(shanghai()));
        assert_eq!(h.repo.favorites().await.first(), Some(&shanghai()));
        assert_eq!(*h.orchestrator.search_query().borrow(), "");
        assert!(h.orchestrator.search_results().borrow().is_empty());

        let mut weather = h.orchestrator.weather();
        let snapshot = tokio::time::timeout(
            WAIT,
            weather.wait_for(|s| match s {
                WeatherSnapshot::Success { current, .. } => current.temp == shanghai().id,
                _ => false,
            }),
        )
        .await
        .expect("shanghai weather should load")
        .unwrap()
        .clone();
        assert!(snapshot.is_settled());
        h.orchestrator.shutdown();
    }

    #[tokio::test]
    async fn refresh_without_city_does_nothing() {
        let h = harness(MockApi::default());

        h.orchestrator.refresh().await;

        assert_eq!(*h.orchestrator.weather().borrow(), WeatherSnapshot::Empty);
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test]
    async fn refresh_refetches_saved_city() {
        let h = harness(MockApi::default());
        h.repo.save_current_city(&shanghai()).await.unwrap();

        h.orchestrator.refresh().await;

        assert_eq!(h.api.count("now:101020100"), 1);
        assert!(h.orchestrator.weather().borrow().is_settled());
    }

    #[tokio::test]
    async fn blank_search_clears_without_calling() {
        let h = harness(MockApi::default());
        h.seed_results(vec![beijing()]);

        h.orchestrator.search("").await;
        assert!(h.orchestrator.search_results().borrow().is_empty());

        h.seed_results(vec![beijing()]);
        h.orchestrator.search("   ").await;
        assert!(h.orchestrator.search_results().borrow().is_empty());

        assert_eq!(h.api.count("search:"), 0);
    }

    #[tokio::test]
    async fn search_replaces_results() {
        let h = harness(MockApi::default());

        h.orchestrator.search("bei").await;

        assert_eq!(
            *h.orchestrator.search_results().borrow(),
            vec![beijing(), shanghai()]
        );
        assert_eq!(h.api.calls(), vec!["search:bei".to_string()]);
    }

    #[tokio::test]
    async fn search_without_payload_empties_results() {
        let h = harness(MockApi {
            search: Reply::NoPayload,
            ..MockApi::default()
        });
        h.seed_results(vec![beijing()]);

        h.orchestrator.search("nowhere").await;

        assert!(h.orchestrator.search_results().borrow().is_empty());
    }

    #[tokio::test]
    async fn failed_search_leaves_results_unchanged() {
        for reply in [Reply::Transport, Reply::Code("404")] {
            let h = harness(MockApi {
                search: reply,
                ..MockApi::default()
            });
            h.seed_results(vec![beijing()]);

            h.orchestrator.search("shang").await;

            assert_eq!(*h.orchestrator.search_results().borrow(), vec![beijing()]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_search_waits_for_quiet_period() {
        let store = MemoryStore::with_entries(saved(&beijing(), &[beijing()]));
        let h = harness_with_store(MockApi::default(), Arc::new(store));
        h.orchestrator.start();
        settle().await;
        let baseline = h.api.count("search:");

        h.seed_results(vec![shanghai()]);
        h.orchestrator.set_search_query("b");
        settle().await;
        assert!(h.orchestrator.search_results().borrow().is_empty());

        h.orchestrator.set_search_query("be");
        settle().await;
        tokio::time::advance(Duration::from_millis(499)).await;
        settle().await;
        assert_eq!(h.api.count("search:"), baseline);

        h.orchestrator.set_search_query("bei");
        settle().await;
        tokio::time::advance(Duration::from_millis(499)).await;
        settle().await;
        assert_eq!(h.api.count("search:"), baseline);

        tokio::time::advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(h.api.count("search:"), baseline + 1);
        assert_eq!(h.api.count("search:bei"), 1);
        assert_eq!(h.orchestrator.search_results().borrow().len(), 2);

        h.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn short_query_never_reaches_the_api() {
        let h = harness(MockApi::default());
        h.orchestrator.start();

        h.orchestrator.set_search_query("b");
        settle().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;

        assert_eq!(h.api.count("search:"), 0);
        h.orchestrator.shutdown();
    }
}
