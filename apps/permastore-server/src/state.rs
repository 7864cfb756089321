//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::ledger::{LedgerClient, PublicUrls};
use crate::package::ArchiveBuilder;
use crate::publish::Publisher;
use crate::usage::UsageReporter;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    ledger: Arc<dyn LedgerClient>,
    urls: PublicUrls,
    publisher: Publisher,
    usage: UsageReporter,
}

impl AppState {
    /// Create a new application state around a ledger client
    pub fn new(config: Config, ledger: Arc<dyn LedgerClient>, usage: UsageReporter) -> Self {
        let urls = PublicUrls::new(&config.ledger.explorer_url, &config.ledger.api_url);
        let builder = ArchiveBuilder::new(config.packaging.agent.clone())
            .with_staging_root(config.packaging.staging_dir.clone())
            .with_bagging_date(config.packaging.bagging_date);
        let publisher = Publisher::new(
            ledger.clone(),
            builder,
            urls.clone(),
            config.packaging.retain_archives,
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                ledger,
                urls,
                publisher,
                usage,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the ledger client
    pub fn ledger(&self) -> &dyn LedgerClient {
        self.inner.ledger.as_ref()
    }

    /// Get the public URL builder
    pub fn urls(&self) -> &PublicUrls {
        &self.inner.urls
    }

    /// Get the publish pipeline
    pub fn publisher(&self) -> &Publisher {
        &self.inner.publisher
    }

    /// Get the usage reporter
    pub fn usage(&self) -> &UsageReporter {
        &self.inner.usage
    }
}
