//! SSO login against the identity host.
//!
//! The flow is a fixed sequence of single-use tokens:
//!
//! 1. GET the login page and pull the execution key out of it.
//! 2. POST credentials plus the execution key, without following redirects;
//!    the response embeds a service ticket in a script redirect.
//! 3. Redeem the ticket on the application host, which must answer with a
//!    redirect.
//! 4. Follow that redirect and check we ended up on the application host.
//! 5. Touch the session endpoint so the server finishes its own bookkeeping.
//!
//! Any failure drops the authenticator back to [`AuthState::Unauthenticated`].

use crate::common::cache::TtlCache;
use crate::common::connect_client::ConnectClient;
use crate::common::http_session::HttpRequest;
use crate::common::types::{AuthError, ExportResult};
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Node, Selector};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const ACCOUNT_CACHE_KEY: &str = "username";

static COMMENT_EXECUTION_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"flowExecutionKey:\s*\[(.*?)\]").expect("execution key pattern is valid")
});

static SERVICE_TICKET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"ticket=([^"'&\s]+)"#).expect("service ticket pattern is valid")
});

static SCRIPT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script").expect("script selector is valid"));

/// Where the login page has hidden the execution key, most recent layout first.
#[derive(Debug, Clone, Copy)]
enum KeyLocator {
    HiddenInput(&'static str),
    CommentMarker,
}

const EXECUTION_KEY_LOCATORS: &[KeyLocator] = &[
    KeyLocator::HiddenInput("lt"),
    KeyLocator::HiddenInput("execution"),
    KeyLocator::CommentMarker,
];

impl KeyLocator {
    fn locate(&self, document: &Html) -> Option<String> {
        match self {
            KeyLocator::HiddenInput(name) => {
                let selector = Selector::parse(&format!(r#"input[name="{name}"]"#)).ok()?;
                document
                    .select(&selector)
                    .filter_map(|input| input.value().attr("value"))
                    .map(str::trim)
                    .find(|value| !value.is_empty())
                    .map(str::to_string)
            }
            KeyLocator::CommentMarker => document
                .tree
                .nodes()
                .filter_map(|node| match node.value() {
                    Node::Comment(comment) => Some(&**comment),
                    _ => None,
                })
                .find_map(|text| COMMENT_EXECUTION_KEY.captures(text))
                .map(|caps| caps[1].trim().to_string())
                .filter(|value| !value.is_empty()),
        }
    }
}

pub fn extract_execution_key(page: &str) -> Option<String> {
    let document = Html::parse_document(page);
    EXECUTION_KEY_LOCATORS.iter().find_map(|locator| {
        let key = locator.locate(&document);
        if key.is_some() {
            debug!("Execution key found via {:?}", locator);
        }
        key
    })
}

/// Looks for `ticket=<value>` inside the script-embedded redirect URL.
pub fn extract_service_ticket(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    document.select(&SCRIPT).find_map(|script| {
        let source: String = script.text().collect();
        SERVICE_TICKET
            .captures(&source)
            .map(|caps| caps[1].to_string())
    })
}

fn same_host(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// Login credentials. Consumed by a login attempt and never persisted.
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    KeyFetched,
    CredentialsSubmitted,
    TicketRedeemed,
    SessionEstablished,
}

pub struct Authenticator<'a> {
    client: &'a ConnectClient,
    cache: &'a TtlCache,
    ttl: Duration,
    state: AuthState,
}

impl<'a> Authenticator<'a> {
    pub fn new(client: &'a ConnectClient, cache: &'a TtlCache, ttl: Duration) -> Self {
        Self {
            client,
            cache,
            ttl,
            state: AuthState::Unauthenticated,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Asks the service who we are. True iff the session cookie still
    /// identifies an account.
    pub async fn is_connected(&self) -> ExportResult<bool> {
        Ok(self.refresh_account().await?.is_some())
    }

    /// Account identifier, served from the cache while it is fresh.
    ///
    /// `connect` always asks the service, since a cached id says nothing about
    /// whether the cookies still work. Later callers within the TTL are
    /// answered from the entry it leaves behind.
    pub async fn account_id(&self) -> ExportResult<Option<String>> {
        if let Some(account) = self.cache.get::<String>(ACCOUNT_CACHE_KEY, None, self.ttl) {
            return Ok(Some(account));
        }
        self.refresh_account().await
    }

    /// Reuse a live session if there is one, otherwise log in. Returns the
    /// account identifier of the authenticated user.
    pub async fn connect(&mut self, credentials: Credentials) -> ExportResult<String> {
        if let Some(account) = self.refresh_account().await? {
            info!("Existing session is still valid for {}", account);
            self.state = AuthState::SessionEstablished;
            self.client.session().save_cookies();
            return Ok(account);
        }

        self.login(credentials).await?;

        match self.refresh_account().await? {
            Some(account) => {
                info!("Logged in as {}", account);
                self.client.session().save_cookies();
                Ok(account)
            }
            None => {
                self.state = AuthState::Unauthenticated;
                let lookup = self.client.endpoints().username();
                Err(AuthError::SessionNotEstablished(lookup.to_string()).into())
            }
        }
    }

    pub async fn login(&mut self, credentials: Credentials) -> ExportResult<()> {
        let result = self.run_login(credentials).await;
        if let Err(e) = &result {
            warn!("Login failed: {}", e);
            self.state = AuthState::Unauthenticated;
        }
        result
    }

    async fn run_login(&mut self, credentials: Credentials) -> ExportResult<()> {
        let client = self.client;
        let endpoints = client.endpoints();
        let session = client.session();
        self.state = AuthState::Unauthenticated;

        // Step 1: execution key from the login page
        let page = session
            .send(HttpRequest::get(endpoints.sso_login()).query(endpoints.sso_login_params()))
            .await?
            .error_for_status()?;
        let execution_key =
            extract_execution_key(&page.text()).ok_or(AuthError::MissingExecutionKey)?;
        self.advance(AuthState::KeyFetched);

        // Step 2: submit credentials, service ticket comes back in the body
        let Credentials { username, password } = credentials;
        let form = [
            ("username", username),
            ("password", password),
            ("_eventId", "submit".to_string()),
            ("embed", "true".to_string()),
            ("displayNameRequired", "false".to_string()),
            ("lt", execution_key),
        ];
        let submitted = session
            .send(
                HttpRequest::post(endpoints.sso_login())
                    .query(endpoints.sso_login_params())
                    .form(form)
                    .without_redirects(),
            )
            .await?;
        debug!("Credential submission returned HTTP {}", submitted.status);
        let ticket =
            extract_service_ticket(&submitted.text()).ok_or(AuthError::InvalidCredentials)?;
        self.advance(AuthState::CredentialsSubmitted);

        // Step 3: redeem the ticket, expecting a redirect
        let redeemed = session
            .send(
                HttpRequest::get(endpoints.post_auth_login())
                    .query([("ticket", ticket)])
                    .without_redirects(),
            )
            .await?;
        if !redeemed.status.is_redirection() {
            return Err(AuthError::UnexpectedRedirect(redeemed.status).into());
        }
        let landing = redeemed
            .location()
            .ok_or(AuthError::UnexpectedRedirect(redeemed.status))?;
        self.advance(AuthState::TicketRedeemed);

        // Step 4: follow the redirect manually and confirm where we landed
        let landed = session.send(HttpRequest::get(landing)).await?;
        if !landed.status.is_success() || !same_host(&landed.url, endpoints.connect_base()) {
            return Err(AuthError::SessionNotEstablished(landed.url.to_string()).into());
        }
        self.advance(AuthState::SessionEstablished);

        // Step 5: best effort, the session is already usable
        match session.send(HttpRequest::get(endpoints.legacy_session())).await {
            Ok(response) if response.status.is_success() => debug!("Session confirmed"),
            Ok(response) => warn!("Session confirmation returned HTTP {}", response.status),
            Err(e) => warn!("Session confirmation failed: {}", e),
        }

        Ok(())
    }

    fn advance(&mut self, next: AuthState) {
        debug!("Login state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    async fn refresh_account(&self) -> ExportResult<Option<String>> {
        let account = self.client.username().await?;
        if let Some(account) = &account {
            self.cache.set(ACCOUNT_CACHE_KEY, None, account);
        }
        Ok(account)
    }
}
