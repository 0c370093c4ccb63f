use crate::config::ServerConfig;
use crate::monitor::{AlertTrigger, MonitoringScheduler};
use chrono::{DateTime, Utc};
use sentinel_alert::rate_limit::{InMemoryCooldownStore, RateLimiter};
use sentinel_notify::dispatcher::NotificationDispatcher;
use sentinel_notify::Senders;
use sentinel_storage::AlertStore;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AlertStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub dispatcher: NotificationDispatcher,
    pub trigger: AlertTrigger,
    pub scheduler: Arc<MonitoringScheduler>,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wires the rate limiter, dispatcher and scheduler over `store`.
    pub fn new(config: ServerConfig, store: Arc<AlertStore>) -> anyhow::Result<Self> {
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit.clone(),
            Arc::new(InMemoryCooldownStore::new()),
            store.clone(),
        ));
        let senders = Senders::from_config(&config.notification)?;
        let dispatcher = NotificationDispatcher::new(
            senders,
            store.clone(),
            config.notification.max_concurrent_dispatches,
            Duration::from_secs(config.notification.channel_timeout_secs),
        );
        let trigger = AlertTrigger::new(store.clone(), rate_limiter.clone(), dispatcher.clone());
        let scheduler = Arc::new(MonitoringScheduler::new(
            config.monitoring.clone(),
            store.clone(),
            store.clone(),
            trigger.clone(),
            dispatcher.clone(),
        ));

        Ok(Self {
            store,
            rate_limiter,
            dispatcher,
            trigger,
            scheduler,
            start_time: Utc::now(),
            config: Arc::new(config),
        })
    }
}
