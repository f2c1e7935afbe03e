//! Background loops of a running coordinator
//!
//! Four loops share one [`Coordinator`]:
//! - dispatch: publishes queued tasks on every tick or wake-up
//! - ingestion: applies results and heartbeats as they arrive
//! - sweep: times out silent tasks
//! - dashboard: publishes snapshots
//!
//! Each loop has its own cancellation token so shutdown can drain them in
//! order: dispatch first, then ingestion, then the sweep, then the dashboard.

use crate::channel::{Channel, Subscription, HEARTBEATS_TOPIC, RESULTS_TOPIC};
use crate::coordinator::dashboard::DashboardSnapshot;
use crate::coordinator::engine::Coordinator;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

struct LoopHandle {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl LoopHandle {
    async fn stop(self) {
        self.token.cancel();
        if let Err(err) = self.handle.await {
            tracing::warn!("{} loop panicked: {}", self.name, err);
        }
    }
}

fn ticker(period: Duration) -> time::Interval {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// A coordinator with its loops running
pub struct RunningCoordinator {
    coordinator: Arc<Coordinator>,
    dispatch: Option<LoopHandle>,
    ingestion: LoopHandle,
    sweep: LoopHandle,
    dashboard: LoopHandle,
}

impl RunningCoordinator {
    /// Subscribes to the result and heartbeat topics and starts every loop
    ///
    /// Cancelling `shutdown` stops all loops at once; [`RunningCoordinator::shutdown`]
    /// stops them in drain order.
    pub async fn spawn(
        coordinator: Arc<Coordinator>,
        channel: &dyn Channel,
        shutdown: &CancellationToken,
    ) -> Result<Self> {
        let results = channel.subscribe(RESULTS_TOPIC).await?;
        let heartbeats = channel.subscribe(HEARTBEATS_TOPIC).await?;

        let config = coordinator.config().clone();
        tracing::info!(
            "Coordinator started (timeout {}s, sweep every {}s)",
            config.heartbeat_timeout,
            config.sweep_interval
        );

        let dispatch = spawn_loop("dispatch", shutdown, |token| {
            dispatch_loop(Arc::clone(&coordinator), config.dispatch_interval(), token)
        });
        let ingestion = spawn_loop("ingestion", shutdown, |token| {
            ingestion_loop(Arc::clone(&coordinator), results, heartbeats, token)
        });
        let sweep = spawn_loop("sweep", shutdown, |token| {
            sweep_loop(Arc::clone(&coordinator), config.sweep_interval(), token)
        });
        let dashboard = spawn_loop("dashboard", shutdown, |token| {
            dashboard_loop(Arc::clone(&coordinator), config.dashboard_interval(), token)
        });

        Ok(Self {
            coordinator,
            dispatch: Some(dispatch),
            ingestion,
            sweep,
            dashboard,
        })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Stops handing out tasks while results keep being ingested
    ///
    /// Lets workers finish and report what they hold before
    /// [`RunningCoordinator::shutdown`] stops the remaining loops.
    pub async fn stop_dispatch(&mut self) {
        if let Some(dispatch) = self.dispatch.take() {
            dispatch.stop().await;
            tracing::info!("Dispatch stopped");
        }
    }

    /// Stops the loops in drain order and returns a final snapshot
    pub async fn shutdown(mut self) -> DashboardSnapshot {
        tracing::info!("Coordinator shutting down");
        self.stop_dispatch().await;
        self.ingestion.stop().await;
        self.sweep.stop().await;
        self.dashboard.stop().await;
        self.coordinator.snapshot(Utc::now())
    }
}

fn spawn_loop<F, Fut>(name: &'static str, shutdown: &CancellationToken, body: F) -> LoopHandle
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let token = shutdown.child_token();
    let handle = tokio::spawn(body(token.clone()));
    LoopHandle {
        name,
        token,
        handle,
    }
}

async fn dispatch_loop(coordinator: Arc<Coordinator>, period: Duration, token: CancellationToken) {
    let mut ticker = ticker(period);
    loop {
        select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
            _ = coordinator.dispatch_requested() => {}
        }
        coordinator.dispatch_pending(Utc::now()).await;
    }
    tracing::debug!("Dispatch loop stopped");
}

async fn ingestion_loop(
    coordinator: Arc<Coordinator>,
    mut results: Box<dyn Subscription>,
    mut heartbeats: Box<dyn Subscription>,
    token: CancellationToken,
) {
    loop {
        select! {
            _ = token.cancelled() => break,
            delivery = results.next_delivery() => match delivery {
                Some(delivery) => coordinator.handle_result_delivery(delivery),
                None => break,
            },
            delivery = heartbeats.next_delivery() => match delivery {
                Some(delivery) => coordinator.handle_heartbeat_delivery(delivery),
                None => break,
            },
        }
    }
    tracing::debug!("Ingestion loop stopped");
}

async fn sweep_loop(coordinator: Arc<Coordinator>, period: Duration, token: CancellationToken) {
    let mut ticker = ticker(period);
    loop {
        select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                coordinator.sweep(Utc::now());
            }
        }
    }
    tracing::debug!("Sweep loop stopped");
}

async fn dashboard_loop(coordinator: Arc<Coordinator>, period: Duration, token: CancellationToken) {
    let mut ticker = ticker(period);
    loop {
        select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                match coordinator.publish_dashboard(Utc::now()).await {
                    Ok(snapshot) => tracing::debug!(
                        "Dashboard: {} active workers, {} queued, {} in flight, {} crawled",
                        snapshot.active_crawlers.len(),
                        snapshot.queued,
                        snapshot.in_flight,
                        snapshot.crawled_urls
                    ),
                    Err(e) => tracing::warn!("Failed to publish dashboard: {}", e),
                }
            }
        }
    }
    tracing::debug!("Dashboard loop stopped");
}
