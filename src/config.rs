use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

const SSO_BASE: &str = "https://sso.garmin.com";
const CONNECT_BASE: &str = "https://connect.garmin.com";

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Base URLs of the identity host and the application host.
///
/// Tests point both at local mock servers.
#[derive(Debug, Clone)]
pub struct Endpoints {
    sso_base: Url,
    connect_base: Url,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            sso_base: Url::parse(SSO_BASE).expect("static SSO base URL is valid"),
            connect_base: Url::parse(CONNECT_BASE).expect("static Connect base URL is valid"),
        }
    }
}

impl Endpoints {
    pub fn new(sso_base: &str, connect_base: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            sso_base: parse_base(sso_base)?,
            connect_base: parse_base(connect_base)?,
        })
    }

    pub fn connect_base(&self) -> &Url {
        &self.connect_base
    }

    pub fn sso_login(&self) -> Url {
        self.sso("/sso/login")
    }

    /// Query parameters shared by the login page GET and the credential POST.
    pub fn sso_login_params(&self) -> Vec<(String, String)> {
        vec![
            ("service".to_string(), self.post_auth_login().to_string()),
            ("clientId".to_string(), "GarminConnect".to_string()),
            ("consumeServiceTicket".to_string(), "false".to_string()),
            ("gauthHost".to_string(), self.sso("/sso").to_string()),
        ]
    }

    pub fn post_auth_login(&self) -> Url {
        self.connect("/post-auth/login")
    }

    pub fn legacy_session(&self) -> Url {
        self.connect("/legacy/session")
    }

    pub fn username(&self) -> Url {
        self.connect("/user/username")
    }

    pub fn statistics(&self, account: &str) -> Url {
        self.connect(&format!("/proxy/userstats-service/statistics/{account}"))
    }

    pub fn activity_list(&self, account: &str) -> Url {
        self.connect(&format!("/proxy/activitylist-service/activities/{account}"))
    }

    pub fn activity_download(&self, format: &str, activity_id: u64) -> Url {
        self.connect(&format!(
            "/proxy/activity-service-1.1/{format}/activity/{activity_id}"
        ))
    }

    fn sso(&self, path: &str) -> Url {
        let mut url = self.sso_base.clone();
        url.set_path(path);
        url
    }

    fn connect(&self, path: &str) -> Url {
        let mut url = self.connect_base.clone();
        url.set_path(path);
        url
    }
}

fn parse_base(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(raw.to_string(), e))?;
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(
            raw.to_string(),
            url::ParseError::EmptyHost,
        ));
    }
    Ok(url)
}

/// Pause between batches of processed activities.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub every: usize,
    pub delay: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            every: 10,
            delay: Duration::from_secs(1),
        }
    }
}

impl Pacing {
    /// True before processing the `processed`-th activity (0-based) when a
    /// full batch has just completed.
    pub fn should_pause(&self, processed: usize) -> bool {
        self.every > 0 && processed != 0 && processed % self.every == 0
    }
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub endpoints: Endpoints,
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub page_size: u32,
    pub request_timeout: Duration,
    pub pacing: Pacing,
    pub download_retries: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            cache_dir: default_cache_dir(),
            cache_ttl: Duration::from_secs(3600),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_secs(30),
            pacing: Pacing::default(),
            download_retries: 2,
        }
    }
}

impl ExportConfig {
    /// Saved session cookies for one login, next to the response cache.
    pub fn cookie_file(&self, username: &str) -> PathBuf {
        self.cache_dir
            .join(format!("cookies_{}", crate::common::cache::normalize_key(username)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::PageSize(self.page_size));
        }
        Ok(())
    }
}

pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("garmin-export")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid base URL {0}: {1}")]
    InvalidUrl(String, url::ParseError),

    #[error("Page size must be between 1 and {MAX_PAGE_SIZE}, got {0}")]
    PageSize(u32),
}
