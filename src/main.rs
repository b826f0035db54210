use anyhow::{bail, Result};
use channel::message::Topic;
use channel::{ChannelConfig, Manager};
use domain::gateway::queue_api::QueueApiClient;
use domain::monitor::{MonitorHandle, QueueMonitor};
use domain::tracker::{Tracker, TrackerConfig, TrackerHandle};
use events::EventPublisher;
use log::*;
use service::{config::Config, logging::Logger};
use std::sync::Arc;

mod console;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::new();
    Logger::init_logger(&config)?;

    if config.ticket().is_none() && config.service_id().is_none() && !config.admin_dashboard {
        bail!("nothing to watch: pass --ticket, --service-id or --admin-dashboard");
    }

    info!(
        "Starting queue_sync [{}] against {}",
        config.runtime_env(),
        config.ws_base_url
    );

    let manager = Arc::new(Manager::new(ChannelConfig::from(&config)));
    let publisher = EventPublisher::new().with_handler(Arc::new(console::ConsoleHandler));

    let mut tracker: Option<TrackerHandle> = match config.ticket() {
        Some(ticket) => {
            let source = Arc::new(QueueApiClient::new(&config)?);
            Some(Tracker::spawn(
                ticket,
                TrackerConfig::from(&config),
                manager.clone(),
                source,
                publisher.clone(),
            ))
        }
        None => None,
    };

    let mut monitors: Vec<MonitorHandle> = Vec::new();
    if let Some(service_id) = config.service_id() {
        monitors.push(QueueMonitor::spawn(
            Topic::service(service_id),
            manager.clone(),
            publisher.clone(),
        ));
    }
    if config.admin_dashboard {
        monitors.push(QueueMonitor::spawn(
            Topic::admin_dashboard(),
            manager.clone(),
            publisher.clone(),
        ));
    }

    match tracker.as_mut() {
        // A tracked ticket ends the run once it finishes.
        Some(tracker) if monitors.is_empty() => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                _ = tracker.finished() => info!("Ticket {} is done", tracker.ticket_number()),
            }
        }
        _ => tokio::signal::ctrl_c().await?,
    }

    info!("Shutting down");
    if let Some(tracker) = tracker.as_mut() {
        if tracker.is_running() && tracker.stop().is_ok() {
            tracker.finished().await;
        }
    }
    for monitor in monitors.iter_mut() {
        if monitor.stop().is_ok() {
            monitor.finished().await;
        }
    }
    manager.shutdown();
    Ok(())
}
