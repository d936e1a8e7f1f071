use std::sync::Arc;

use crate::config::Config;
use crate::driver::portal::PortalDriver;
use crate::services::{
    filter::FilterEngine,
    orchestrator::ScrapeOrchestrator,
    sessions::SessionManager,
    store::TransactionStore,
};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The portal automation backend.
    pub driver: Arc<dyn PortalDriver>,
    /// Live portal sessions, one per user.
    pub sessions: SessionManager,
    /// Latest normalized transactions per user.
    pub store: TransactionStore,
    /// Scrape job runner and registry.
    pub orchestrator: ScrapeOrchestrator,
    /// Date validation and filtering in the validation timezone.
    pub filter: FilterEngine,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    /// * `driver` - The portal driver every session goes through.
    pub fn new(config: &Config, driver: Arc<dyn PortalDriver>) -> Self {
        let sessions = SessionManager::new(driver.clone(), config.login_timeout);
        tracing::info!(
            "✅ Session manager initialized (login timeout {:?})",
            config.login_timeout
        );

        let store = TransactionStore::new();

        let orchestrator = ScrapeOrchestrator::new(
            sessions.clone(),
            driver.clone(),
            store.clone(),
            config.progress_buffer,
            config.job_retention,
        );
        tracing::info!(
            "✅ Scrape orchestrator initialized (progress buffer {}, retention {:?})",
            config.progress_buffer,
            config.job_retention
        );

        let filter = FilterEngine::new(config.timezone);
        tracing::info!("✅ Validation timezone: {}", config.timezone);

        AppState {
            driver,
            sessions,
            store,
            orchestrator,
            filter,
        }
    }
}
