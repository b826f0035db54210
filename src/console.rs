use async_trait::async_trait;
use colored::*;
use events::{EventHandler, FinishKind, Priority, TrackerEvent};

/// Prints tracker events to stdout.
#[derive(Debug, Default)]
pub struct ConsoleHandler;

#[async_trait]
impl EventHandler for ConsoleHandler {
    async fn handle(&self, event: &TrackerEvent) {
        match event {
            TrackerEvent::SnapshotChanged(snapshot) => {
                let position = snapshot
                    .position_in_queue
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{} {} [{}] position {} ~{} min ({})",
                    "→".blue(),
                    snapshot.number.bold(),
                    snapshot.status.to_string().yellow(),
                    position.bright_white(),
                    snapshot.estimated_wait_minutes,
                    snapshot.service_name.dimmed()
                );
            }
            TrackerEvent::StatusChanged {
                ticket_number,
                from,
                to,
            } => {
                println!("{} {ticket_number}: {from} → {}", "•".cyan(), to.to_string().yellow());
            }
            TrackerEvent::EntityFinished {
                ticket_number,
                kind,
            } => {
                let label = match kind {
                    FinishKind::Normal => "finished".green().bold(),
                    FinishKind::AutoCompleted => "auto-completed".green().bold(),
                };
                println!("{} {ticket_number} {label}", "✓".green());
            }
            TrackerEvent::ProximityAlert {
                ticket_number,
                position,
            } => {
                println!(
                    "{} {ticket_number} is number {} in line, get ready",
                    "!".bright_yellow().bold(),
                    position.to_string().bright_yellow().bold()
                );
            }
            TrackerEvent::PatientCalled(notice) => {
                let banner = match notice.priority {
                    Priority::High => " CALLED ".on_red().white().bold(),
                    Priority::Normal => " CALLED ".on_blue().white(),
                };
                let counter = notice.counter.as_deref().unwrap_or("the front desk");
                println!("\n{banner} {} please go to {counter}\n", notice.ticket_number.bold());
            }
            TrackerEvent::Stale { last_updated } => {
                let since = last_updated
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!("{} refresh failed, showing data from {since}", "~".dimmed());
            }
            TrackerEvent::ConnectionChanged { connected, failed } => {
                let state = match (connected, failed) {
                    (true, _) => "live".green(),
                    (false, true) => "disconnected, resubscribe to retry".red().bold(),
                    (false, false) => "reconnecting".yellow(),
                };
                println!("{} push channel {state}", "⇄".blue());
            }
            TrackerEvent::QueueChanged { topic, state } => {
                println!("{} {}", "queue".magenta(), topic.bold());
                if let Ok(pretty) = serde_json::to_string_pretty(state) {
                    println!("   {}", pretty.dimmed());
                }
            }
            TrackerEvent::EmergencyAlert { topic, payload } => {
                println!(
                    "\n{} {} {}\n",
                    " EMERGENCY ".on_red().white().bold(),
                    topic.bold(),
                    payload.to_string().red()
                );
            }
        }
    }
}
