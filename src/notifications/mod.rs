//! Upstream change notifications.
//!
//! The platform posts batches of "event created/updated" notices for every
//! subscribed mailbox. Each notice only names an event; it is resolved to a
//! meeting descriptor and handed to discovery, so a notice for a meeting that
//! is already known is a no-op.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::{DiscoverSummary, ReconciliationEngine};
use crate::error::ReconcileError;
use crate::model::MeetingDescriptor;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationBatch {
    #[serde(default)]
    pub value: Vec<ChangeNotification>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub client_state: Option<String>,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub resource_data: Option<ResourceData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceData {
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotificationSummary {
    pub received: usize,
    /// Wrong or missing client state.
    pub rejected: usize,
    /// Unparseable resource or a repeat within the batch.
    pub ignored: usize,
    /// Events that are gone or are not online meetings.
    pub not_meetings: usize,
    /// Events the upstream could not be asked about.
    pub resolve_failed: usize,
    pub discovered: DiscoverSummary,
}

/// `(user_id, event_id)` from `users/{id}/events/{id}`.
pub fn parse_resource(resource: &str) -> Option<(String, String)> {
    let segments: Vec<&str> = resource
        .trim()
        .trim_start_matches('/')
        .split('/')
        .collect();
    match segments.as_slice() {
        [users, user_id, events, event_id]
            if users.eq_ignore_ascii_case("users")
                && events.eq_ignore_ascii_case("events")
                && !user_id.is_empty()
                && !event_id.is_empty() =>
        {
            Some((user_id.to_string(), event_id.to_string()))
        }
        _ => None,
    }
}

fn event_ref(notification: &ChangeNotification) -> Option<(String, String)> {
    let (user_id, event_id) = parse_resource(&notification.resource)?;
    let event_id = notification
        .resource_data
        .as_ref()
        .and_then(|data| data.id.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or(event_id);
    Some((user_id, event_id))
}

/// Resolve a notification batch into discovery candidates and discover them.
///
/// An empty `expected_client_state` accepts every notice.
pub async fn handle_batch(
    engine: &ReconciliationEngine,
    expected_client_state: &str,
    batch: &NotificationBatch,
) -> Result<NotificationSummary, ReconcileError> {
    let mut summary = NotificationSummary {
        received: batch.value.len(),
        ..NotificationSummary::default()
    };

    let mut events = Vec::new();
    let mut seen_events = HashSet::new();
    for notification in &batch.value {
        if !expected_client_state.is_empty()
            && notification.client_state.as_deref() != Some(expected_client_state)
        {
            warn!(
                "Rejected notification for {} with mismatched client state (subscription {})",
                notification.resource,
                notification.subscription_id.as_deref().unwrap_or("unknown")
            );
            summary.rejected += 1;
            continue;
        }
        let Some(event) = event_ref(notification) else {
            debug!("Ignoring notification for resource '{}'", notification.resource);
            summary.ignored += 1;
            continue;
        };
        if !seen_events.insert(event.clone()) {
            summary.ignored += 1;
            continue;
        }
        events.push(event);
    }

    let mut candidates: Vec<MeetingDescriptor> = Vec::new();
    let mut seen_meetings = HashSet::new();
    for (user_id, event_id) in events {
        match engine.upstream().resolve_event(&user_id, &event_id).await {
            Ok(Some(descriptor)) => {
                if seen_meetings.insert(descriptor.id()) {
                    candidates.push(descriptor);
                } else {
                    summary.ignored += 1;
                }
            }
            Ok(None) => summary.not_meetings += 1,
            Err(err) => {
                warn!("Could not resolve event {} for user {}: {}", event_id, user_id, err);
                summary.resolve_failed += 1;
            }
        }
    }

    summary.discovered = engine.discover(&candidates).await?;
    info!(
        "Notification batch: {} received, {} new meetings, {} rejected",
        summary.received, summary.discovered.created, summary.rejected
    );
    Ok(summary)
}
