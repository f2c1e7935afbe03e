//! Reference fetch worker
//!
//! A worker consumes its own task topic (`crawl-tasks.<id>`), fetches each
//! page, hands the content to the document index and reports the outcome on
//! the results topic. It sends heartbeats on a fixed interval: idle ones so the
//! coordinator can discover it, and per-task ones while a fetch is running.
//!
//! A task delivery is acknowledged only after its result has been published;
//! if the publish fails the delivery is negatively acknowledged and retried.

mod fetcher;
mod parser;

pub use fetcher::{build_http_client, FetchError, FetchedPage, HttpFetcher, PageFetcher};
pub use parser::{extract_page, PageContent, MAX_TITLE_CHARS, UNTITLED};

use crate::channel::{
    decode, publish_json, worker_task_topic, Channel, ChannelResult, Delivery, HeartbeatMessage,
    IndexDocument, ResultMessage, ResultStatus, TaskMessage, HEARTBEATS_TOPIC, INDEX_TOPIC,
    RESULTS_TOPIC,
};
use crate::config::WorkerConfig;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use url::Url;

/// A crawler worker bound to one id
pub struct FetchWorker {
    id: String,
    channel: Arc<dyn Channel>,
    fetcher: Arc<dyn PageFetcher>,
    config: WorkerConfig,
}

impl FetchWorker {
    pub fn new(
        id: impl Into<String>,
        channel: Arc<dyn Channel>,
        fetcher: Arc<dyn PageFetcher>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            channel,
            fetcher,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribes to this worker's task topic and runs until `shutdown` fires
    ///
    /// A task being processed when shutdown fires is finished first.
    pub async fn spawn(self, shutdown: CancellationToken) -> Result<JoinHandle<()>> {
        let mut tasks = self.channel.subscribe(&worker_task_topic(&self.id)).await?;
        tracing::info!("Worker {} started", self.id);

        Ok(tokio::spawn(async move {
            let mut ticker = time::interval(self.config.heartbeat_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.send_heartbeat(None).await {
                            tracing::warn!("Worker {} failed to send heartbeat: {}", self.id, e);
                        }
                    }
                    delivery = tasks.next_delivery() => match delivery {
                        Some(delivery) => self.process(delivery).await,
                        None => break,
                    },
                }
            }
            tracing::info!("Worker {} stopped", self.id);
        }))
    }

    async fn send_heartbeat(&self, task_id: Option<&str>) -> ChannelResult<()> {
        let heartbeat = HeartbeatMessage {
            crawler_id: self.id.clone(),
            timestamp: Utc::now().timestamp(),
            task_id: task_id.map(str::to_string),
        };
        publish_json(self.channel.as_ref(), HEARTBEATS_TOPIC, &heartbeat).await
    }

    /// Handles one task delivery end to end
    pub async fn process(&self, delivery: Delivery) {
        let task = match decode::<TaskMessage>(delivery.payload()) {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!("Worker {} dropping malformed task: {}", self.id, e);
                delivery.ack();
                return;
            }
        };

        tracing::info!("Worker {} crawling {} (task {})", self.id, task.url, task.task_id);
        let result = self.crawl(&task).await;

        match publish_json(self.channel.as_ref(), RESULTS_TOPIC, &result).await {
            Ok(()) => delivery.ack(),
            Err(e) => {
                tracing::warn!(
                    "Worker {} failed to report task {}: {}",
                    self.id,
                    task.task_id,
                    e
                );
                delivery.nack();
            }
        }
    }

    /// Fetches the task's page and builds its result
    async fn crawl(&self, task: &TaskMessage) -> ResultMessage {
        let mut result = ResultMessage {
            task_id: task.task_id.clone(),
            status: ResultStatus::Error,
            crawler_id: self.id.clone(),
            url: Some(task.url.clone()),
            attempt: task.attempt,
            links: Vec::new(),
            error: None,
            indexed: false,
        };

        let url = match Url::parse(&task.url) {
            Ok(url) => url,
            Err(e) => {
                result.error = Some(format!("Invalid URL: {}", e));
                return result;
            }
        };

        match self.fetch_with_heartbeats(&task.task_id, &url).await {
            Ok(page) => {
                result.status = ResultStatus::Crawled;
                result.indexed = self.index(&task.url, &page).await;
                result.links = page
                    .content
                    .links
                    .into_iter()
                    .take(self.config.max_links_per_page)
                    .collect();
                tracing::debug!(
                    "Worker {} crawled {}: {} links",
                    self.id,
                    task.url,
                    result.links.len()
                );
            }
            Err(e) => {
                tracing::warn!("Worker {} failed to crawl {}: {}", self.id, task.url, e);
                result.error = Some(e.to_string());
            }
        }
        result
    }

    /// Runs the fetch while sending per-task heartbeats
    async fn fetch_with_heartbeats(
        &self,
        task_id: &str,
        url: &Url,
    ) -> std::result::Result<FetchedPage, FetchError> {
        let fetch = time::timeout(self.fetch_deadline(), self.fetcher.fetch(url));
        tokio::pin!(fetch);

        let mut ticker = time::interval(self.config.heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                outcome = &mut fetch => {
                    return outcome.unwrap_or(Err(FetchError::Timeout));
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.send_heartbeat(Some(task_id)).await {
                        tracing::warn!("Worker {} failed to send heartbeat: {}", self.id, e);
                    }
                }
            }
        }
    }

    /// Upper bound on one fetch, past the HTTP client's own timeout
    fn fetch_deadline(&self) -> Duration {
        self.config.request_timeout() + Duration::from_secs(1)
    }

    /// Publishes the page to the document index, returning whether it was sent
    async fn index(&self, url: &str, page: &FetchedPage) -> bool {
        if page.content.text.is_empty() {
            return false;
        }

        let document = IndexDocument {
            url: url.to_string(),
            title: page.content.title.clone(),
            content: page.content.text.clone(),
        };
        match publish_json(self.channel.as_ref(), INDEX_TOPIC, &document).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Worker {} failed to index {}: {}", self.id, url, e);
                false
            }
        }
    }
}
