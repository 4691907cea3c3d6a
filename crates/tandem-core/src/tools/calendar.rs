//! `list_calendar_events` tool: reads the primary Google Calendar
//!
//! The bearer token is never passed as a tool argument: it is read from the
//! session state key the A2A executor injects before each turn.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::{ToolContext, ToolHandler, json_schema};
use crate::session::ACCESS_TOKEN_KEY;

pub const DEFAULT_CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";

const DEFAULT_LIMIT: u64 = 10;

/// Failures of a calendar read
#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("No calendar access token in session state")]
    MissingToken,
    #[error("Calendar request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Calendar API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Calendar API returned a malformed body: {0}")]
    Decode(String),
}

/// Thin client for the Calendar v3 events endpoint
#[derive(Clone)]
pub struct CalendarClient {
    http: Client,
    api_base: String,
}

impl std::fmt::Debug for CalendarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalendarClient")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl Default for CalendarClient {
    fn default() -> Self {
        Self::new(DEFAULT_CALENDAR_API)
    }
}

impl CalendarClient {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_base: api_base.into(),
        }
    }

    /// List events of the primary calendar between two naive UTC timestamps
    /// (`YYYY-MM-DDTHH:MM:SS`). A `Z` suffix is appended to both bounds.
    pub async fn list_events(
        &self,
        access_token: &str,
        start_time: &str,
        end_time: &str,
        limit: u64,
    ) -> Result<Value, CalendarError> {
        let url = format!(
            "{}/calendars/primary/events",
            self.api_base.trim_end_matches('/')
        );
        debug!("Listing calendar events {} .. {} (limit {})", start_time, end_time, limit);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .header("Content-Type", "application/json")
            .query(&[
                ("timeMin", format!("{}Z", start_time)),
                ("timeMax", format!("{}Z", end_time)),
                ("maxResults", limit.to_string()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CalendarError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| CalendarError::Decode(e.to_string()))
    }
}

/// Tool that searches the user's primary calendar
pub struct ListCalendarEventsTool {
    client: CalendarClient,
}

impl ListCalendarEventsTool {
    pub fn new(client: CalendarClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for ListCalendarEventsTool {
    fn name(&self) -> &str {
        "list_calendar_events"
    }

    fn description(&self) -> &str {
        "Search for calendar events in the user's primary calendar between \
         start_time and end_time (format YYYY-MM-DDTHH:MM:SS) and return up \
         to `limit` events."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "start_time": {
                    "type": "string",
                    "description": "Start of the time range (YYYY-MM-DDTHH:MM:SS)"
                },
                "end_time": {
                    "type": "string",
                    "description": "End of the time range (YYYY-MM-DDTHH:MM:SS)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of events to return"
                }
            }),
            vec!["start_time", "end_time", "limit"],
        )
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let start_time = input
            .get("start_time")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing 'start_time' parameter"))?;
        let end_time = input
            .get("end_time")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing 'end_time' parameter"))?;
        let limit = input
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LIMIT);

        let token = ctx
            .get_str(ACCESS_TOKEN_KEY)
            .ok_or(CalendarError::MissingToken)?;

        match self.client.list_events(token, start_time, end_time, limit).await {
            Ok(events) => Ok(events),
            Err(e) => {
                warn!("Calendar read for session '{}' failed: {}", ctx.session_id, e);
                Err(e.into())
            }
        }
    }
}
