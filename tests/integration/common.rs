//! Shared wiremock helpers for the identity and application hosts.
//!
//! Both mock servers listen on 127.0.0.1, so a cookie set by one is sent to
//! the other, the same way the real hosts share a parent domain.

use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use garmin_export::common::cache::TtlCache;
use garmin_export::common::connect_client::ConnectClient;
use garmin_export::common::http_session::HttpSession;
use garmin_export::config::{Endpoints, ExportConfig, Pacing};

pub const ACCOUNT: &str = "runner42";
pub const EXECUTION_KEY: &str = "e1s1";
pub const TICKET: &str = "ST-0412-abcDEF";
pub const SESSION_COOKIE: &str = "SESSIONID=7f3a9c";

pub struct Harness {
    pub sso: MockServer,
    pub connect: MockServer,
    pub client: ConnectClient,
    pub cache: TtlCache,
    pub config: ExportConfig,
    pub workdir: TempDir,
}

impl Harness {
    pub async fn start() -> Self {
        Self::with_timeout(Duration::from_secs(5)).await
    }

    pub async fn with_timeout(request_timeout: Duration) -> Self {
        let sso = MockServer::start().await;
        let connect = MockServer::start().await;
        let workdir = TempDir::new().expect("create temp dir");

        let config = ExportConfig {
            endpoints: Endpoints::new(&sso.uri(), &connect.uri()).expect("mock URLs are valid"),
            cache_dir: workdir.path().join("cache"),
            request_timeout,
            pacing: Pacing {
                every: 10,
                delay: Duration::ZERO,
            },
            download_retries: 0,
            ..ExportConfig::default()
        };

        let session = HttpSession::new(config.request_timeout).expect("build session");
        let client = ConnectClient::new(session, config.endpoints.clone());
        let cache = TtlCache::new(&config.cache_dir);

        Self {
            sso,
            connect,
            client,
            cache,
            config,
            workdir,
        }
    }

    pub fn output_dir(&self) -> std::path::PathBuf {
        let dir = self.workdir.path().join("export");
        std::fs::create_dir_all(&dir).expect("create output dir");
        dir
    }
}

// ---------------------------------------------------------------------------
// Identity host
// ---------------------------------------------------------------------------

pub fn login_page(hidden_inputs: &str) -> String {
    format!(
        r#"<!DOCTYPE html><html><head><title>Sign In</title></head><body>
        <form method="post" id="login-form">
            <input type="email" name="username" />
            <input type="password" name="password" />
            {hidden_inputs}
            <button type="submit">Sign In</button>
        </form></body></html>"#
    )
}

pub async fn mount_login_page(server: &MockServer, page: String) {
    Mock::given(method("GET"))
        .and(path("/sso/login"))
        .and(query_param("clientId", "GarminConnect"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(server)
        .await;
}

/// Credential POST answered with the script redirect carrying the ticket.
pub async fn mount_credentials_accepted(server: &MockServer) {
    let body = format!(
        r#"<html><head><script type="text/javascript">
            var response_url = "http:\/\/127.0.0.1\/post-auth\/login?ticket={TICKET}";
            window.location.replace(response_url);
        </script></head><body>Success</body></html>"#
    );
    Mock::given(method("POST"))
        .and(path("/sso/login"))
        .and(body_string_contains(format!("lt={EXECUTION_KEY}")))
        .and(body_string_contains(format!("username={ACCOUNT}")))
        .and(body_string_contains("_eventId=submit"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(server)
        .await;
}

pub async fn mount_credentials_rejected(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/sso/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(login_page(r#"<div class="error">Invalid sign in.</div>"#)),
        )
        .mount(server)
        .await;
}

// ---------------------------------------------------------------------------
// Application host
// ---------------------------------------------------------------------------

/// Ticket redemption: redirect to `location`, setting the session cookie.
pub async fn mount_ticket_redirect(server: &MockServer, location: &str) {
    Mock::given(method("GET"))
        .and(path("/post-auth/login"))
        .and(query_param("ticket", TICKET))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", location)
                .insert_header("Set-Cookie", format!("{SESSION_COOKIE}; Path=/; HttpOnly")),
        )
        .mount(server)
        .await;
}

pub async fn mount_landing(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/modern/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>Dashboard</html>"))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/legacy/session"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

/// Username lookup that only answers with the session cookie present.
/// Without it the server serves its HTML sign-in page.
pub async fn mount_username(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/user/username"))
        .and(header_regex("cookie", SESSION_COOKIE))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "username": ACCOUNT })))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/user/username"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>Sign In</html>"))
        .mount(server)
        .await;
}

/// Username lookup that succeeds without any cookie.
pub async fn mount_username_always(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/user/username"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "username": ACCOUNT })))
        .mount(server)
        .await;
}

pub async fn mount_statistics(server: &MockServer, total: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/proxy/userstats-service/statistics/{ACCOUNT}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "userMetrics": [{
                "totalActivities": total as f64,
                "totalDistance": 123456.7,
                "totalDuration": 98765.0,
                "totalCalories": 4321.0
            }]
        })))
        .mount(server)
        .await;
}

pub fn activity_json(id: u64) -> Value {
    json!({
        "activityId": id,
        "activityName": format!("Morning Run {id}"),
        "startTimeLocal": "2024-05-04 07:30:00",
        "startTimeGMT": "2024-05-04 05:30:00",
        "activityType": { "typeId": 1, "typeKey": "running" },
        "distance": 10012.5
    })
}

pub async fn mount_activity_page(server: &MockServer, start: u64, limit: u64, ids: &[u64]) {
    let activities: Vec<Value> = ids.iter().copied().map(activity_json).collect();
    Mock::given(method("GET"))
        .and(path(format!("/proxy/activitylist-service/activities/{ACCOUNT}")))
        .and(query_param("start", start.to_string()))
        .and(query_param("limit", limit.to_string()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "activityList": activities })),
        )
        .expect(1u64..)
        .mount(server)
        .await;
}

pub fn download_path(format: &str, id: u64) -> String {
    format!("/proxy/activity-service-1.1/{format}/activity/{id}")
}

pub fn file_body(format: &str, id: u64) -> String {
    format!("<{format}><activity>{id}</activity></{format}>")
}

/// Successful download of one file, expected exactly `times` times.
pub async fn mount_download(server: &MockServer, format: &str, id: u64, times: u64) {
    Mock::given(method("GET"))
        .and(path(download_path(format, id)))
        .and(query_param("full", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_string(file_body(format, id)))
        .expect(times)
        .mount(server)
        .await;
}

/// Both formats for every id, each expected once.
pub async fn mount_downloads(server: &MockServer, ids: &[u64]) {
    for &id in ids {
        mount_download(server, "gpx", id, 1).await;
        mount_download(server, "tcx", id, 1).await;
    }
}
