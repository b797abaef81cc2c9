//! Microsoft Graph adapter.
//!
//! App-only auth (client credentials); the token is cached until shortly
//! before it expires. Calendar times are requested in UTC via the `Prefer`
//! header so `dateTime` values can be read as naive UTC.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{RenewedSubscription, TimeRange, TranscriptFetch, UpstreamClient};
use crate::config::UpstreamConfig;
use crate::error::CallError;
use crate::model::{HostUser, MeetingDescriptor, MeetingRecord, SubscriptionRecord};

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const SUBSCRIPTION_CHANGE_TYPES: &str = "created,updated,deleted";
const EVENT_SELECT: &str =
    "id,subject,start,end,organizer,isOnlineMeeting,onlineMeeting,onlineMeetingUrl,type,seriesMasterId";

/// Service plans whose licence lets a user host online meetings.
const MEETING_HOST_PLANS: &[&str] = &[
    "MCOSTANDARD",
    "MCOEV",
    "TEAMS1",
    "ENTERPRISEPACK",
    "ENTERPRISEPREMIUM",
    "ENTERPRISEWITHSCAL",
    "STANDARDPACK",
    "STANDARDWOFFPACK",
    "BUSINESS_PREMIUM",
    "M365_BUSINESS_BASIC",
    "M365_BUSINESS_STD",
    "M365_E3",
    "M365_E5",
    "SPE_E3",
    "SPE_E5",
    "DEVELOPERPACK",
];

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    value: String,
    refresh_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDateTime {
    date_time: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EmailAddress {
    address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Organizer {
    email_address: Option<EmailAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnlineMeetingInfo {
    join_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Event {
    id: String,
    subject: Option<String>,
    start: GraphDateTime,
    end: GraphDateTime,
    organizer: Option<Organizer>,
    online_meeting: Option<OnlineMeetingInfo>,
    online_meeting_url: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    series_master_id: Option<String>,
}

impl Event {
    fn join_url(&self) -> Option<&str> {
        self.online_meeting_url
            .as_deref()
            .or_else(|| self.online_meeting.as_ref()?.join_url.as_deref())
            .filter(|url| !url.is_empty())
    }

    fn organizer_email(&self) -> Option<String> {
        self.organizer
            .as_ref()?
            .email_address
            .as_ref()?
            .address
            .as_ref()
            .map(|a| a.to_lowercase())
    }

    fn into_descriptor(
        self,
        organizer_id: &str,
        upstream_meeting_id: String,
    ) -> Result<MeetingDescriptor, CallError> {
        let start_time = parse_graph_datetime(&self.start)?;
        let end_time = parse_graph_datetime(&self.end)?;
        let join_url = self.join_url().map(str::to_string);
        let organizer_email = self.organizer_email();
        Ok(MeetingDescriptor {
            organizer_id: organizer_id.to_string(),
            organizer_email,
            upstream_meeting_id,
            subject: self
                .subject
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "No subject".to_string()),
            start_time,
            end_time,
            join_url,
            series_id: self.series_master_id,
            is_recurring_parent: self.event_type.as_deref() == Some("seriesMaster"),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OnlineMeeting {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Transcript {
    id: String,
    created_date_time: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubscriptionRequest<'a> {
    change_type: &'a str,
    notification_url: &'a str,
    resource: &'a str,
    expiration_date_time: String,
    client_state: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionResponse {
    id: String,
    expiration_date_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryUser {
    id: String,
    mail: Option<String>,
    user_principal_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LicenseDetail {
    #[serde(default)]
    service_plans: Vec<ServicePlan>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicePlan {
    service_plan_name: Option<String>,
    provisioning_status: Option<String>,
}

fn parse_graph_datetime(value: &GraphDateTime) -> Result<DateTime<Utc>, CallError> {
    let raw = value.date_time.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| CallError::permanent(format!("malformed dateTime '{raw}': {e}")))
}

fn parse_expiry(raw: &str) -> Result<DateTime<Utc>, CallError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CallError::permanent(format!("malformed expirationDateTime '{raw}': {e}")))
}

fn can_host(licenses: &[LicenseDetail]) -> bool {
    licenses.iter().flat_map(|l| &l.service_plans).any(|plan| {
        let name = plan.service_plan_name.as_deref().unwrap_or_default();
        plan.provisioning_status.as_deref() == Some("Success") && MEETING_HOST_PLANS.contains(&name)
    })
}

pub struct GraphClient {
    client: reqwest::Client,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    base_url: String,
    authority_url: String,
    organizers: Vec<String>,
    notification_url: String,
    client_state: String,
    token: Mutex<Option<CachedToken>>,
}

impl GraphClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        if config.tenant_id.is_empty() || config.client_id.is_empty() {
            bail!("upstream.tenant_id and upstream.client_id must be set");
        }
        if config.client_secret.is_empty() {
            bail!("upstream.client_secret is empty (set it in config or SCRIBELINE_CLIENT_SECRET)");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        info!(
            "Initialized Graph client for tenant {} ({} organizers)",
            config.tenant_id,
            config.organizers.len()
        );

        Ok(Self {
            client,
            tenant_id: config.tenant_id.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            base_url: config.graph_base_url.trim_end_matches('/').to_string(),
            authority_url: config.authority_url.trim_end_matches('/').to_string(),
            organizers: config.organizers.clone(),
            notification_url: config.notification_url.clone(),
            client_state: config.client_state.clone(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, CallError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.refresh_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.authority_url, self.tenant_id);
        debug!("Requesting Graph access token");
        let response = self
            .client
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| CallError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::from_status(status, &body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CallError::from_reqwest(&e))?;
        let lifetime = (token.expires_in - TOKEN_REFRESH_MARGIN_SECS).max(0);
        let value = token.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at: Utc::now() + chrono::Duration::seconds(lifetime),
        });
        Ok(value)
    }

    /// Send an authenticated request and return the raw response when it
    /// succeeded. Non-success statuses are classified.
    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, CallError> {
        let token = self.access_token().await?;
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(token)
            .header("Prefer", "outlook.timezone=\"UTC\"");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CallError::from_reqwest(&e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CallError::from_status(status, &body))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, CallError> {
        self.send(Method::GET, url, query, None)
            .await?
            .json()
            .await
            .map_err(|e| CallError::from_reqwest(&e))
    }

    /// Follow `@odata.nextLink` until the collection is exhausted.
    async fn get_all<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, CallError> {
        let mut page: Page<T> = self.get_json(url, query).await?;
        let mut items = std::mem::take(&mut page.value);
        while let Some(next) = page.next_link.take() {
            page = self.get_json(&next, &[]).await?;
            items.append(&mut page.value);
        }
        Ok(items)
    }

    async fn online_meeting_id(&self, user_id: &str, join_url: &str) -> Result<Option<String>, CallError> {
        let url = format!("{}/users/{}/onlineMeetings", self.base_url, user_id);
        let filter = format!("JoinWebUrl eq '{}'", join_url.replace('\'', "''"));
        let page: Page<OnlineMeeting> = self.get_json(&url, &[("$filter", filter)]).await?;
        Ok(page.value.into_iter().next().map(|m| m.id))
    }

    async fn describe(&self, user_id: &str, event: Event) -> Result<Option<MeetingDescriptor>, CallError> {
        let Some(join_url) = event.join_url().map(str::to_string) else {
            debug!("Event {} is not an online meeting", event.id);
            return Ok(None);
        };
        let Some(meeting_id) = self.online_meeting_id(user_id, &join_url).await? else {
            debug!("No online meeting found for event {}", event.id);
            return Ok(None);
        };
        event.into_descriptor(user_id, meeting_id).map(Some)
    }

    async fn create_subscription(
        &self,
        resource: &str,
        requested_expiry: DateTime<Utc>,
    ) -> Result<SubscriptionResponse, CallError> {
        if self.notification_url.is_empty() {
            return Err(CallError::permanent("upstream.notification_url is not configured"));
        }
        let request = CreateSubscriptionRequest {
            change_type: SUBSCRIPTION_CHANGE_TYPES,
            notification_url: &self.notification_url,
            resource,
            expiration_date_time: requested_expiry.to_rfc3339_opts(SecondsFormat::Secs, true),
            client_state: &self.client_state,
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| CallError::permanent(format!("failed to encode subscription: {e}")))?;
        let url = format!("{}/subscriptions", self.base_url);
        self.send(Method::POST, &url, &[], Some(body))
            .await?
            .json()
            .await
            .map_err(|e| CallError::from_reqwest(&e))
    }
}

#[async_trait]
impl UpstreamClient for GraphClient {
    async fn list_meetings(&self, range: TimeRange) -> Result<Vec<MeetingDescriptor>, CallError> {
        let mut descriptors = Vec::new();
        for organizer in &self.organizers {
            let url = format!("{}/users/{}/calendarView", self.base_url, organizer);
            let query = [
                (
                    "startDateTime",
                    range.start.to_rfc3339_opts(SecondsFormat::Secs, true),
                ),
                (
                    "endDateTime",
                    range.end.to_rfc3339_opts(SecondsFormat::Secs, true),
                ),
                ("$select", EVENT_SELECT.to_string()),
                ("$top", "100".to_string()),
            ];
            let events: Vec<Event> = self.get_all(&url, &query).await?;
            debug!("Organizer {} has {} events in range", organizer, events.len());
            for event in events {
                if let Some(descriptor) = self.describe(organizer, event).await? {
                    descriptors.push(descriptor);
                }
            }
        }
        Ok(descriptors)
    }

    async fn fetch_transcript(&self, meeting: &MeetingRecord) -> Result<TranscriptFetch, CallError> {
        let url = format!(
            "{}/users/{}/onlineMeetings/{}/transcripts",
            self.base_url, meeting.organizer_id, meeting.upstream_meeting_id
        );
        let mut transcripts: Vec<Transcript> = self.get_all(&url, &[]).await?;
        // RFC 3339 strings from one source sort chronologically.
        transcripts.sort_by(|a, b| a.created_date_time.cmp(&b.created_date_time));
        let Some(latest) = transcripts.pop() else {
            return Ok(TranscriptFetch::NotReady);
        };

        let content_url = format!("{}/{}/content", url, latest.id);
        let response = self
            .send(
                Method::GET,
                &content_url,
                &[("$format", "text/vtt".to_string())],
                None,
            )
            .await;
        let response = match response {
            Ok(response) => response,
            // Listed but content not yet materialised.
            Err(err) if err.is_not_found() => return Ok(TranscriptFetch::NotReady),
            Err(err) => return Err(err),
        };
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CallError::from_reqwest(&e))?;
        if bytes.is_empty() {
            return Ok(TranscriptFetch::NotReady);
        }
        Ok(TranscriptFetch::Ready(bytes.to_vec()))
    }

    async fn renew_subscription(
        &self,
        subscription: &SubscriptionRecord,
        requested_expiry: DateTime<Utc>,
    ) -> Result<RenewedSubscription, CallError> {
        if let Some(upstream_ref) = &subscription.upstream_ref {
            let url = format!("{}/subscriptions/{}", self.base_url, upstream_ref);
            let body = json!({
                "expirationDateTime": requested_expiry.to_rfc3339_opts(SecondsFormat::Secs, true),
            });
            match self.send(Method::PATCH, &url, &[], Some(body)).await {
                Ok(response) => {
                    let renewed: SubscriptionResponse = response
                        .json()
                        .await
                        .map_err(|e| CallError::from_reqwest(&e))?;
                    return Ok(RenewedSubscription {
                        expires_at: parse_expiry(&renewed.expiration_date_time)?,
                        upstream_ref: renewed.id,
                    });
                }
                Err(err) if err.is_not_found() => {
                    warn!(
                        "Subscription {} for {} is gone upstream, recreating",
                        upstream_ref, subscription.resource_scope
                    );
                }
                Err(err) => return Err(err),
            }
        }

        let created = self
            .create_subscription(&subscription.resource_scope, requested_expiry)
            .await?;
        info!(
            "Created subscription {} for {}",
            created.id, subscription.resource_scope
        );
        Ok(RenewedSubscription {
            expires_at: parse_expiry(&created.expiration_date_time)?,
            upstream_ref: created.id,
        })
    }

    async fn resolve_event(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<Option<MeetingDescriptor>, CallError> {
        let url = format!("{}/users/{}/events/{}", self.base_url, user_id, event_id);
        let event: Event = match self
            .get_json(&url, &[("$select", EVENT_SELECT.to_string())])
            .await
        {
            Ok(event) => event,
            Err(err) if err.is_not_found() => {
                debug!("Event {} for user {} no longer exists", event_id, user_id);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        self.describe(user_id, event).await
    }

    async fn list_hosts(&self) -> Result<Vec<HostUser>, CallError> {
        let url = format!("{}/users", self.base_url);
        let users: Vec<DirectoryUser> = self
            .get_all(
                &url,
                &[
                    ("$top", "999".to_string()),
                    ("$select", "id,mail,userPrincipalName".to_string()),
                ],
            )
            .await?;

        let mut hosts = Vec::with_capacity(users.len());
        for user in users {
            let email = user
                .mail
                .or(user.user_principal_name)
                .unwrap_or_default()
                .to_lowercase();
            if email.is_empty() {
                continue;
            }
            let licenses_url = format!("{}/users/{}/licenseDetails", self.base_url, user.id);
            let can_host = match self.get_all::<LicenseDetail>(&licenses_url, &[]).await {
                Ok(licenses) => can_host(&licenses),
                Err(err) => {
                    warn!("Failed to read licences for {}: {}", email, err);
                    false
                }
            };
            hosts.push(HostUser {
                user_id: user.id,
                email,
                can_host,
            });
        }
        Ok(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(json: serde_json::Value) -> Event {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_event_maps_to_descriptor() {
        let e = event(json!({
            "id": "AAMk1",
            "subject": "Quarterly Review",
            "start": {"dateTime": "2026-10-19T14:00:00.0000000", "timeZone": "UTC"},
            "end": {"dateTime": "2026-10-19T15:00:00.0000000", "timeZone": "UTC"},
            "organizer": {"emailAddress": {"name": "Alice", "address": "Alice@Example.com"}},
            "isOnlineMeeting": true,
            "onlineMeeting": {"joinUrl": "https://teams.example/l/meetup-join/1"},
            "type": "occurrence",
            "seriesMasterId": "AAMkSeries"
        }));

        assert_eq!(e.join_url(), Some("https://teams.example/l/meetup-join/1"));
        let d = e.into_descriptor("user-1", "MSo1".to_string()).unwrap();
        assert_eq!(d.organizer_id, "user-1");
        assert_eq!(d.organizer_email.as_deref(), Some("alice@example.com"));
        assert_eq!(d.start_time, Utc.with_ymd_and_hms(2026, 10, 19, 14, 0, 0).unwrap());
        assert_eq!(d.series_id.as_deref(), Some("AAMkSeries"));
        assert!(!d.is_recurring_parent);
    }

    #[test]
    fn test_series_master_is_recurring_parent() {
        let e = event(json!({
            "id": "AAMk2",
            "subject": "",
            "start": {"dateTime": "2026-10-19T14:00:00Z"},
            "end": {"dateTime": "2026-10-19T15:00:00Z"},
            "onlineMeetingUrl": "https://teams.example/l/meetup-join/2",
            "type": "seriesMaster"
        }));
        let d = e.into_descriptor("user-1", "MSo2".to_string()).unwrap();
        assert!(d.is_recurring_parent);
        assert_eq!(d.subject, "No subject");
        assert!(d.organizer_email.is_none());
    }

    #[test]
    fn test_event_without_join_url_is_not_a_meeting() {
        let e = event(json!({
            "id": "AAMk3",
            "start": {"dateTime": "2026-10-19T14:00:00"},
            "end": {"dateTime": "2026-10-19T15:00:00"},
            "isOnlineMeeting": false,
            "onlineMeeting": null
        }));
        assert!(e.join_url().is_none());
    }

    #[test]
    fn test_malformed_datetime_is_permanent() {
        let err = parse_graph_datetime(&GraphDateTime {
            date_time: "tomorrow-ish".to_string(),
        })
        .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_can_host_requires_successful_plan() {
        let licenses: Vec<LicenseDetail> = serde_json::from_value(json!([
            {"servicePlans": [
                {"servicePlanName": "EXCHANGE_S_STANDARD", "provisioningStatus": "Success"},
                {"servicePlanName": "TEAMS1", "provisioningStatus": "PendingActivation"}
            ]}
        ]))
        .unwrap();
        assert!(!can_host(&licenses));

        let licenses: Vec<LicenseDetail> = serde_json::from_value(json!([
            {"servicePlans": [{"servicePlanName": "TEAMS1", "provisioningStatus": "Success"}]}
        ]))
        .unwrap();
        assert!(can_host(&licenses));
    }

    #[test]
    fn test_subscription_request_shape() {
        let request = CreateSubscriptionRequest {
            change_type: SUBSCRIPTION_CHANGE_TYPES,
            notification_url: "https://hooks.example/notifications",
            resource: "/users/u1/events",
            expiration_date_time: "2026-10-22T12:00:00Z".to_string(),
            client_state: "secret",
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["changeType"], "created,updated,deleted");
        assert_eq!(value["notificationUrl"], "https://hooks.example/notifications");
        assert_eq!(value["expirationDateTime"], "2026-10-22T12:00:00Z");
        assert_eq!(value["clientState"], "secret");
    }

    #[test]
    fn test_paged_response_decodes_next_link() {
        let page: Page<OnlineMeeting> = serde_json::from_value(json!({
            "value": [{"id": "MSo1"}],
            "@odata.nextLink": "https://graph.example/next"
        }))
        .unwrap();
        assert_eq!(page.value[0].id, "MSo1");
        assert_eq!(page.next_link.as_deref(), Some("https://graph.example/next"));
    }
}
