use async_trait::async_trait;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use ingest_models::file_type::MIME_URL;
use ingest_models::{Connector as ConnectorModel, ConnectorRequest, FileType, SourceType};

use super::error::ConnectorError;
use super::factory::ConnectorContext;
use super::traits::{Connector, TaskSink};
use super::types::{parse_config, ChangeItem, ConnectorBase, ConnectorEvent, EventSink, RunParams};

fn default_max_pages() -> usize {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub url_recursive: bool,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

/// Web crawler connector; pages are re-emitted on every run and the
/// chunking stage decides whether their content changed
pub struct WebConnector {
    base: ConnectorBase,
    config: WebConfig,
    context: ConnectorContext,
}

impl WebConnector {
    pub fn new(model: &ConnectorModel, context: &ConnectorContext) -> Result<Self, ConnectorError> {
        Ok(Self {
            base: ConnectorBase::from_model(model),
            config: parse_config(model)?,
            context: context.clone(),
        })
    }

    fn seed(&self) -> Result<Url, ConnectorError> {
        let url = Url::parse(self.config.url.trim())
            .map_err(|e| ConnectorError::InvalidConfiguration(format!("invalid url '{}': {}", self.config.url, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConnectorError::InvalidConfiguration(format!("unsupported scheme '{}'", other))),
        }
    }

    /// Page body, or `None` when the page no longer exists
    async fn fetch_page(&self, url: &Url) -> Result<Option<String>, ConnectorError> {
        let response = self.context.http.get(url.as_str()).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ConnectorError::HttpError(format!("HTTP {} for {}", status, url)));
        }
        Ok(Some(response.text().await?))
    }

    /// Emits every page in scope. Pages that could not be read keep the run
    /// from archiving anything, since the pages behind them were not reached.
    async fn crawl(&self, sink: &EventSink) -> Result<usize, ConnectorError> {
        let seed = self.seed()?;
        let scope = Scope::of(&seed);
        let max_pages = self.config.max_pages.max(1);

        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier = VecDeque::from([seed.clone()]);
        let mut emitted = 0usize;
        let mut unreadable = 0usize;

        while let Some(page) = frontier.pop_front() {
            if emitted >= max_pages {
                break;
            }
            if !visited.insert(page.to_string()) {
                continue;
            }
            let is_seed = page == seed;

            if self.config.url_recursive {
                match self.fetch_page(&page).await {
                    Ok(Some(html)) => {
                        for link in extract_links(&html, &page) {
                            if scope.contains(&link) && !visited.contains(link.as_str()) {
                                frontier.push_back(link);
                            }
                        }
                    }
                    Ok(None) if is_seed => warn!("⚠️ Seed page {} not found", page),
                    Ok(None) => {
                        info!("⏭️  Page {} is gone", page);
                        continue;
                    }
                    Err(e) => {
                        warn!("⚠️ Could not read page {}: {}", page, e);
                        unreadable += 1;
                        if !is_seed {
                            if self.base.known(page.as_str()).is_some() {
                                sink.seen(page.to_string()).await?;
                            }
                            continue;
                        }
                    }
                }
            }

            sink.changed(page_item(&page)).await?;
            emitted += 1;
        }

        if unreadable > 0 {
            return Err(ConnectorError::SyncFailed(format!("{} page(s) could not be read", unreadable)));
        }
        Ok(emitted)
    }
}

/// Origin and directory the crawl stays within
struct Scope {
    origin: url::Origin,
    prefix: String,
}

impl Scope {
    fn of(seed: &Url) -> Self {
        let path = seed.path();
        let prefix = match path.rfind('/') {
            Some(idx) => path[..=idx].to_string(),
            None => "/".to_string(),
        };
        Self {
            origin: seed.origin(),
            prefix,
        }
    }

    fn contains(&self, url: &Url) -> bool {
        url.origin() == self.origin && url.path().starts_with(&self.prefix)
    }
}

/// Absolute http(s) links of a page, without fragments
pub fn extract_links(html: &str, page: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let mut links: Vec<Url> = document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| page.join(href).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map(|mut url| {
            url.set_fragment(None);
            url
        })
        .collect();
    links.sort();
    links.dedup();
    links
}

fn page_item(page: &Url) -> ChangeItem {
    ChangeItem {
        source_id: page.to_string(),
        url: page.to_string(),
        original_url: Some(page.to_string()),
        name: page.to_string(),
        mime_type: MIME_URL.to_string(),
        file_type: FileType::Url,
        signature: String::new(),
        content: None,
        checkpoint: None,
    }
}

#[async_trait]
impl Connector for WebConnector {
    fn source_type(&self) -> SourceType {
        SourceType::Web
    }

    fn validate(&self) -> Result<(), ConnectorError> {
        if self.config.url.trim().is_empty() {
            return Err(ConnectorError::InvalidConfiguration("url is required".to_string()));
        }
        self.seed().map(|_| ())
    }

    fn execute(self: Box<Self>, cancel: CancellationToken, _params: RunParams) -> mpsc::Receiver<ConnectorEvent> {
        let (sink, rx) = EventSink::channel(cancel);
        tokio::spawn(async move {
            match self.crawl(&sink).await {
                Ok(pages) => info!("🌐 Crawled {} page(s) for connector {}", pages, self.base.connector_id),
                Err(ConnectorError::Cancelled) => {}
                Err(e) => {
                    error!("❌ Crawl failed for connector {}: {}", self.base.connector_id, e);
                    let _ = sink.failed(e).await;
                }
            }
        });
        rx
    }

    async fn prepare_task(&self, _session_id: Uuid, sink: &dyn TaskSink) -> Result<(), ConnectorError> {
        sink.run_connector(ConnectorRequest::new(self.base.connector_id)).await
    }
}
