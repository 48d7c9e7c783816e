use crate::common::http_session::{HttpRequest, HttpResponse, HttpSession};
use crate::common::metrics;
use crate::common::types::{Activity, ExportError, ExportFormat, ExportResult, StartTime};
use crate::config::Endpoints;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Largest activity count accepted from the statistics endpoint.
pub const MAX_TOTAL_ACTIVITIES: u64 = u32::MAX as u64;

#[derive(Debug, Deserialize)]
struct UsernameResponse {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatisticsResponse {
    #[serde(default)]
    user_metrics: Vec<UserMetrics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserMetrics {
    total_activities: Option<f64>,
    total_distance: Option<f64>,
    total_duration: Option<f64>,
    total_calories: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityListResponse {
    activity_list: Option<Vec<ActivitySummary>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivitySummary {
    activity_id: u64,
    start_time_local: String,
    #[serde(rename = "startTimeGMT")]
    start_time_gmt: String,
    activity_type: ActivityType,
    distance: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityType {
    type_key: String,
}

impl From<ActivitySummary> for Activity {
    fn from(summary: ActivitySummary) -> Self {
        Activity {
            id: summary.activity_id,
            start_time: StartTime {
                local: summary.start_time_local,
                gmt: summary.start_time_gmt,
            },
            activity_type: summary.activity_type.type_key,
            distance: summary.distance,
        }
    }
}

/// Aggregate account statistics. Only `activities` is required upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub activities: u64,
    pub distance: Option<f64>,
    pub duration: Option<f64>,
    pub calories: Option<f64>,
}

/// Typed calls against the application host, all sharing one session.
pub struct ConnectClient {
    session: HttpSession,
    endpoints: Endpoints,
}

impl ConnectClient {
    pub fn new(session: HttpSession, endpoints: Endpoints) -> Self {
        Self { session, endpoints }
    }

    pub fn session(&self) -> &HttpSession {
        &self.session
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Account identifier of the logged-in user, `None` when the session is
    /// not authenticated (empty name, error status or a non-JSON login page).
    pub async fn username(&self) -> ExportResult<Option<String>> {
        let response = self
            .session
            .send(HttpRequest::get(self.endpoints.username()))
            .await
            .inspect_err(|_e| metrics::increment_connect_api_failure())?;

        if !response.status.is_success() {
            debug!("Username lookup returned HTTP {}", response.status);
            return Ok(None);
        }

        metrics::increment_connect_api_success();
        match response.json::<UsernameResponse>() {
            Ok(body) => Ok(body.username.filter(|name| !name.is_empty())),
            Err(e) => {
                debug!("Username response was not JSON: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn totals(&self, account: &str) -> ExportResult<Totals> {
        let response = self
            .send_checked(HttpRequest::get(self.endpoints.statistics(account)))
            .await?;

        let stats: StatisticsResponse = response.json()?;
        let user = stats
            .user_metrics
            .into_iter()
            .next()
            .ok_or_else(|| ExportError::upstream("statistics response has no userMetrics"))?;

        let activities = user
            .total_activities
            .ok_or_else(|| ExportError::upstream("statistics response has no totalActivities"))?;
        if !(activities.is_finite() && (0.0..=MAX_TOTAL_ACTIVITIES as f64).contains(&activities)) {
            return Err(ExportError::upstream(format!(
                "totalActivities {activities} is out of range"
            )));
        }

        Ok(Totals {
            activities: activities as u64,
            distance: user.total_distance,
            duration: user.total_duration,
            calories: user.total_calories,
        })
    }

    pub async fn activity_page(
        &self,
        account: &str,
        start: u64,
        limit: u64,
    ) -> ExportResult<Vec<Activity>> {
        let request = HttpRequest::get(self.endpoints.activity_list(account))
            .query([("start", start.to_string()), ("limit", limit.to_string())]);
        let response = self.send_checked(request).await?;

        let page: ActivityListResponse = response.json()?;
        let summaries = page
            .activity_list
            .ok_or_else(|| ExportError::upstream("activity page has no activityList"))?;

        Ok(summaries.into_iter().map(Activity::from).collect())
    }

    /// Stream one activity file to `destination`. Returns the bytes written.
    pub async fn download_activity(
        &self,
        format: ExportFormat,
        activity_id: u64,
        destination: &Path,
    ) -> ExportResult<u64> {
        let url = self
            .endpoints
            .activity_download(format.as_str(), activity_id);
        let request = HttpRequest::get(url)
            .query([("full", "true")])
            .save_to(destination);
        let response = self.send_checked(request).await?;

        response.bytes_written().ok_or_else(|| {
            ExportError::upstream(format!(
                "{format} download for activity {activity_id} was not written"
            ))
        })
    }

    async fn send_checked(&self, request: HttpRequest<'_>) -> ExportResult<HttpResponse> {
        let result = self
            .session
            .send(request)
            .await
            .and_then(HttpResponse::error_for_status);
        match result {
            Ok(response) => {
                metrics::increment_connect_api_success();
                Ok(response)
            }
            Err(e) => {
                metrics::increment_connect_api_failure();
                Err(e)
            }
        }
    }
}
