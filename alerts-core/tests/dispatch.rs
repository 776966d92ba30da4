//! End-to-end tests of the dispatcher and command handlers against in-memory
//! provider, transport and store fakes.

use std::sync::{Arc, Mutex};

use alerts_core::{
    AddOutcome, Command, CommandHandler, Config, ConfigStore, DayRecord, DispatchOptions,
    DispatchSummary, ForecastData, ForecastQuery, Formatting, GrantOutcome, LocationRegistry,
    MessagingTransport, ProviderError, RecipientId, StoreError, TransportError, WeatherProvider,
    run_daily_alerts,
    model::{Condition, Current, DayAggregate},
};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::join_all;

#[derive(Debug, Default)]
struct FakeProvider {
    failing: Vec<&'static str>,
    unknown: Vec<&'static str>,
}

#[async_trait]
impl WeatherProvider for FakeProvider {
    async fn fetch_forecast(
        &self,
        location: &str,
        _query: ForecastQuery,
    ) -> Result<ForecastData, ProviderError> {
        if self.unknown.iter().any(|u| *u == location) {
            return Err(ProviderError::InvalidLocation(location.to_string()));
        }
        if self.failing.iter().any(|f| *f == location) {
            return Err(ProviderError::Timeout);
        }
        Ok(ForecastData {
            current: Current {
                temp_c: Some(20.0),
                condition: Some(Condition { text: format!("Sunny in {location}") }),
                ..Current::default()
            },
            ..ForecastData::default()
        })
    }

    async fn fetch_history(
        &self,
        location: &str,
        date: NaiveDate,
    ) -> Result<DayRecord, ProviderError> {
        if self.failing.iter().any(|f| *f == location) {
            return Err(ProviderError::RateLimited);
        }
        Ok(DayRecord {
            date,
            location_name: Some(location.to_string()),
            day: DayAggregate { maxtemp_c: Some(11.0), ..DayAggregate::default() },
        })
    }
}

#[derive(Debug, Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(RecipientId, String)>>,
    blocked: Vec<&'static str>,
}

#[async_trait]
impl MessagingTransport for RecordingTransport {
    async fn send(
        &self,
        recipient: &RecipientId,
        text: &str,
        _formatting: Formatting,
    ) -> Result<(), TransportError> {
        if self.blocked.iter().any(|b| *b == recipient.as_str()) {
            return Err(TransportError::Blocked(recipient.clone()));
        }
        self.sent.lock().unwrap().push((recipient.clone(), text.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryStore {
    saved: Mutex<Vec<Config>>,
    fail: bool,
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<Config, StoreError> {
        Ok(Config::default())
    }

    fn save(&self, snapshot: &Config) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Io {
                path: "config.toml".into(),
                source: std::io::Error::other("read-only filesystem"),
            });
        }
        self.saved.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

fn three_recipients() -> Config {
    let mut cfg = Config::default();
    cfg.telegram.whitelisted_users = vec!["1".into(), "2".into(), "3".into()];
    cfg.telegram.admins = vec!["1".into()];
    cfg.locations.insert("1".into(), vec!["Paris".into(), "London".into()]);
    cfg.locations.insert("2".into(), vec!["Oslo".into(), "Rome".into()]);
    cfg.locations.insert("3".into(), vec!["Lima".into(), "Quito".into()]);
    cfg
}

fn options() -> DispatchOptions {
    DispatchOptions { max_concurrency: 2, forecast_days: 1 }
}

#[tokio::test]
async fn one_failed_fetch_does_not_stop_the_run() {
    let registry = LocationRegistry::new(three_recipients(), Arc::new(MemoryStore::default()));
    let provider = Arc::new(FakeProvider { failing: vec!["Rome"], ..Default::default() });
    let transport = Arc::new(RecordingTransport::default());

    let summary = run_daily_alerts(&registry, provider, transport.clone(), options()).await;

    assert_eq!(summary, DispatchSummary { attempted: 6, delivered: 5, failed: 1 });

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 5);

    let mut reports: Vec<&str> = sent.iter().map(|(_, text)| text.as_str()).collect();
    reports.sort();
    reports.dedup();
    assert_eq!(reports.len(), 5, "every delivery gets its own report");

    for (recipient, location) in
        [("1", "Paris"), ("1", "London"), ("2", "Oslo"), ("3", "Lima"), ("3", "Quito")]
    {
        assert!(
            sent.iter().any(|(r, text)| r.as_str() == recipient
                && text.starts_with(&format!("*Weather Update for {location}*"))),
            "missing report for {recipient}/{location}"
        );
    }
    assert!(!sent.iter().any(|(_, text)| text.contains("Rome")));
}

#[tokio::test]
async fn send_failures_are_counted_per_delivery() {
    let registry = LocationRegistry::new(three_recipients(), Arc::new(MemoryStore::default()));
    let provider = Arc::new(FakeProvider::default());
    let transport = Arc::new(RecordingTransport { blocked: vec!["2"], ..Default::default() });

    let summary = run_daily_alerts(&registry, provider, transport.clone(), options()).await;

    assert_eq!(summary, DispatchSummary { attempted: 6, delivered: 4, failed: 2 });
    assert_eq!(transport.sent.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn only_whitelisted_recipients_receive_alerts() {
    let mut cfg = three_recipients();
    cfg.telegram.whitelisted_users = vec!["3".into()];
    let registry = LocationRegistry::new(cfg, Arc::new(MemoryStore::default()));
    let transport = Arc::new(RecordingTransport::default());

    let summary =
        run_daily_alerts(&registry, Arc::new(FakeProvider::default()), transport.clone(), options())
            .await;

    assert_eq!(summary, DispatchSummary { attempted: 2, delivered: 2, failed: 0 });
    assert!(transport.sent.lock().unwrap().iter().all(|(r, _)| r.as_str() == "3"));
}

#[tokio::test]
async fn empty_registry_runs_nothing() {
    let registry = LocationRegistry::new(Config::default(), Arc::new(MemoryStore::default()));
    let summary = run_daily_alerts(
        &registry,
        Arc::new(FakeProvider::default()),
        Arc::new(RecordingTransport::default()),
        options(),
    )
    .await;

    assert_eq!(summary, DispatchSummary::default());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_changes_are_all_kept_while_dispatching() {
    let store = Arc::new(MemoryStore::default());
    let registry = Arc::new(LocationRegistry::new(three_recipients(), store.clone()));
    let provider = Arc::new(FakeProvider::default());
    let transport = Arc::new(RecordingTransport::default());

    // Recipient 10 is not whitelisted and the new whitelisted ids have no
    // locations, so the dispatch sees the same six pairs whatever the ordering.
    let places = ["Berlin", "Madrid", "Vienna", "Prague", "Dublin", "Athens", "Warsaw", "Riga"];
    let newcomers = ["20", "21", "22", "23"];

    let adds = places.map(|place| {
        let registry = registry.clone();
        let provider = provider.clone();
        tokio::spawn(async move {
            registry.add_location(&RecipientId::from("10"), place, provider.as_ref()).await
        })
    });
    let grants = newcomers.map(|id| {
        let registry = registry.clone();
        tokio::spawn(async move { registry.grant_whitelist(&RecipientId::from(id)).await })
    });
    let dispatch = {
        let registry = registry.clone();
        let provider = provider.clone();
        let transport = transport.clone();
        tokio::spawn(async move {
            run_daily_alerts(&registry, provider, transport, options()).await
        })
    };

    let (added, granted, summary) = tokio::join!(join_all(adds), join_all(grants), dispatch);

    for outcome in added {
        assert_eq!(outcome.unwrap().unwrap(), AddOutcome::Added);
    }
    for outcome in granted {
        assert_eq!(outcome.unwrap().unwrap(), GrantOutcome::Granted);
    }
    assert_eq!(summary.unwrap(), DispatchSummary { attempted: 6, delivered: 6, failed: 0 });

    let mut listed = registry.list_locations(&RecipientId::from("10")).await;
    listed.sort();
    let mut expected: Vec<String> = places.iter().map(|p| p.to_string()).collect();
    expected.sort();
    assert_eq!(listed, expected);

    let current = registry.snapshot().await;
    let saved = store.saved.lock().unwrap();
    assert_eq!(saved.len(), places.len() + newcomers.len());
    // The last save holds every change, so none was lost between snapshots.
    let last = saved.last().unwrap();
    assert_eq!(last.locations["10"].len(), places.len());
    for id in newcomers {
        assert!(last.telegram.whitelisted_users.iter().any(|u| u == id), "{id} not saved");
    }
    assert_eq!(*last, current);
}

fn handler(
    cfg: Config,
    store: MemoryStore,
    provider: FakeProvider,
) -> (CommandHandler, Arc<LocationRegistry>, Arc<RecordingTransport>) {
    let registry = Arc::new(LocationRegistry::new(cfg, Arc::new(store)));
    let transport = Arc::new(RecordingTransport::default());
    let handler = CommandHandler::new(
        registry.clone(),
        Arc::new(provider),
        transport.clone(),
        options(),
        chrono_tz::UTC,
    );
    (handler, registry, transport)
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

#[tokio::test]
async fn unauthorized_senders_get_no_reply() {
    let (handler, registry, _) =
        handler(three_recipients(), MemoryStore::default(), FakeProvider::default());
    let stranger = RecipientId::from("99");

    let commands =
        ["/weather Paris", "/add Paris", "/list", "/remove Paris", "/history 2024-04-01 Paris"];
    for text in commands {
        let command = Command::parse(text).unwrap();
        assert!(handler.handle_on(&stranger, command, today()).await.is_empty(), "{text}");
    }
    assert!(registry.list_locations(&stranger).await.is_empty());

    let replies = handler.handle_on(&stranger, Command::Whitelist, today()).await;
    assert_eq!(replies, vec!["You are now whitelisted! Use /start to see commands.".to_string()]);
    assert!(registry.is_authorized(&stranger).await);
}

#[tokio::test]
async fn weather_without_argument_reports_every_location() {
    let (handler, _, _) = handler(
        three_recipients(),
        MemoryStore::default(),
        FakeProvider { failing: vec!["London"], ..Default::default() },
    );

    let replies = handler.handle_on(&RecipientId::from("1"), Command::Weather(None), today()).await;

    assert_eq!(replies.len(), 2);
    assert!(replies[0].starts_with("*Weather Update for Paris*"));
    assert_eq!(replies[1], "Could not retrieve weather for London.");
}

#[tokio::test]
async fn add_reports_persistence_failure_and_keeps_list() {
    let (handler, registry, _) = handler(
        three_recipients(),
        MemoryStore { fail: true, ..MemoryStore::default() },
        FakeProvider::default(),
    );
    let sender = RecipientId::from("2");

    let replies = handler.handle_on(&sender, Command::Add("Madrid".into()), today()).await;

    assert_eq!(replies, vec!["Could not save your change, please try again later.".to_string()]);
    assert_eq!(
        registry.list_locations(&sender).await,
        vec!["Oslo".to_string(), "Rome".to_string()]
    );
}

#[tokio::test]
async fn add_list_remove_round() {
    let provider = FakeProvider { failing: vec!["Lisbon"], unknown: vec!["Atlantis"] };
    let (handler, _, _) = handler(three_recipients(), MemoryStore::default(), provider);
    let sender = RecipientId::from("3");
    let run = |text: &'static str| {
        let handler = handler.clone();
        let sender = sender.clone();
        async move { handler.handle_on(&sender, Command::parse(text).unwrap(), today()).await }
    };

    assert_eq!(run("/add Bogota").await, vec!["Added 'Bogota' to your locations.".to_string()]);
    assert_eq!(run("/add bogota").await, vec!["'bogota' is already in your list.".to_string()]);
    assert_eq!(
        run("/add Atlantis").await,
        vec!["Invalid city: 'Atlantis'. Please check the name.".to_string()]
    );
    assert_eq!(
        run("/add Lisbon").await,
        vec![
            "Could not check 'Lisbon' right now (weather provider request timed out), \
             please try again later."
                .to_string()
        ]
    );
    assert_eq!(run("/add").await, vec!["Usage: /add <city>".to_string()]);
    assert_eq!(run("/remove").await, vec!["Usage: /remove <city>".to_string()]);
    assert_eq!(
        run("/list").await,
        vec!["*Your locations:*\n- Lima\n- Quito\n- Bogota".to_string()]
    );
    assert_eq!(run("/remove LIMA").await, vec!["Removed 'LIMA'.".to_string()]);
    assert_eq!(run("/remove Lima").await, vec!["'Lima' not found in your list.".to_string()]);
}

#[tokio::test]
async fn history_validates_before_fetching() {
    let provider = FakeProvider { failing: vec!["Oslo"], ..Default::default() };
    let (handler, _, _) = handler(three_recipients(), MemoryStore::default(), provider);
    let sender = RecipientId::from("1");
    let run = |text: &'static str| {
        let handler = handler.clone();
        let sender = sender.clone();
        async move { handler.handle_on(&sender, Command::parse(text).unwrap(), today()).await }
    };

    assert_eq!(run("/history").await, vec!["Usage: /history <YYYY-MM-DD> <city>".to_string()]);
    assert_eq!(
        run("/history 2024-05-02 Paris").await,
        vec!["Cannot get history for a future date.".to_string()]
    );
    assert_eq!(
        run("/history yesterday Paris").await,
        vec!["Invalid date format. Please use YYYY-MM-DD.".to_string()]
    );
    assert_eq!(
        run("/history 2024-04-01 Oslo").await,
        vec!["Could not get history for Oslo on 2024-04-01.".to_string()]
    );

    let ok = run("/history 2024-04-01 Paris").await;
    assert!(ok[0].starts_with("*Historical Weather for Paris on 2024-04-01*"));
    assert!(ok[0].contains("- *Max Temp*: 11°C"));
}

#[tokio::test]
async fn mock_is_admin_only() {
    let (handler, _, transport) =
        handler(three_recipients(), MemoryStore::default(), FakeProvider::default());

    let denied = handler
        .handle_on(&RecipientId::from("2"), Command::parse("/mock list").unwrap(), today())
        .await;
    assert_eq!(denied, vec!["You are not authorized to use this command.".to_string()]);

    let admin = RecipientId::from("1");
    let listed = handler.handle_on(&admin, Command::parse("/mock list").unwrap(), today()).await;
    assert_eq!(listed, vec!["*Your locations:*\n- Paris\n- London".to_string()]);

    let unknown = handler.handle_on(&admin, Command::parse("/mock nope").unwrap(), today()).await;
    assert_eq!(unknown, vec!["Command '/nope' cannot be mocked or does not exist.".to_string()]);

    let ran = handler
        .handle_on(&admin, Command::parse("/mock scheduledalert").unwrap(), today())
        .await;
    assert_eq!(ran, vec!["Scheduled alerts sent: 6 attempted, 6 delivered, 0 failed.".to_string()]);
    assert_eq!(transport.sent.lock().unwrap().len(), 6);
}

#[tokio::test]
async fn scheduled_alert_is_not_a_public_command() {
    let (handler, _, transport) =
        handler(three_recipients(), MemoryStore::default(), FakeProvider::default());

    let replies = handler
        .handle_on(&RecipientId::from("1"), Command::parse("/scheduledalert").unwrap(), today())
        .await;

    assert!(replies.is_empty());
    assert!(transport.sent.lock().unwrap().is_empty());
}
