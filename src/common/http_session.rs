use crate::common::types::{ExportError, ExportResult};
use cookie_store::CookieStore;
use futures::StreamExt;
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Client, ClientBuilder, Method, Response, StatusCode, Url, redirect};
use reqwest_cookie_store::CookieStoreMutex;
use serde::de::DeserializeOwned;
use std::ffi::OsString;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const MAX_REDIRECTS: usize = 10;
const USER_AGENT: &str = concat!("garmin-export/", env!("CARGO_PKG_VERSION"));

/// Cookie-scoped HTTP session.
///
/// Redirect handling is a client-level setting in reqwest, so the session
/// keeps two clients, one following redirects and one not, over a single
/// cookie store. Cookies set by any response are visible to every later
/// request. With a cookie file the store outlives the process.
pub struct HttpSession {
    following: Client,
    manual: Client,
    cookies: Arc<CookieStoreMutex>,
    cookie_file: Option<PathBuf>,
}

impl HttpSession {
    /// In-memory cookies only.
    pub fn new(timeout: Duration) -> ExportResult<Self> {
        Self::build(CookieStore::default(), None, timeout)
    }

    /// Start from the cookies saved at `path`, if any. A missing or
    /// unreadable file gives an empty store.
    pub fn with_cookie_file(timeout: Duration, path: impl Into<PathBuf>) -> ExportResult<Self> {
        let path = path.into();
        let store = load_cookies(&path);
        Self::build(store, Some(path), timeout)
    }

    fn build(
        store: CookieStore,
        cookie_file: Option<PathBuf>,
        timeout: Duration,
    ) -> ExportResult<Self> {
        let cookies = Arc::new(CookieStoreMutex::new(store));

        let following = Self::client_builder(&cookies, timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        let manual = Self::client_builder(&cookies, timeout)
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            following,
            manual,
            cookies,
            cookie_file,
        })
    }

    fn client_builder(cookies: &Arc<CookieStoreMutex>, timeout: Duration) -> ClientBuilder {
        Client::builder()
            .cookie_provider(Arc::clone(cookies))
            .timeout(timeout)
            .user_agent(USER_AGENT)
    }

    pub fn cookie_file(&self) -> Option<&Path> {
        self.cookie_file.as_deref()
    }

    /// Write the current cookies, session cookies included, to the cookie
    /// file. Failures are logged and reported as `false`; the run goes on
    /// with the in-memory store.
    pub fn save_cookies(&self) -> bool {
        let Some(path) = &self.cookie_file else {
            return false;
        };

        let mut serialized = Vec::new();
        {
            let Ok(store) = self.cookies.lock() else {
                warn!("Cookie store lock poisoned, not saving {}", path.display());
                return false;
            };
            if let Err(e) = cookie_store::serde::json::save_incl_expired_and_nonpersistent(
                &store,
                &mut serialized,
            ) {
                warn!("Failed to serialize cookies: {}", e);
                return false;
            }
        }

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Failed to create cookie directory {}: {}", parent.display(), e);
                return false;
            }
        }

        let tmp = with_suffix(path, ".tmp");
        let written = write_private(&tmp, &serialized).and_then(|()| std::fs::rename(&tmp, path));
        match written {
            Ok(()) => {
                debug!("Saved cookies to {}", path.display());
                true
            }
            Err(e) => {
                let _ = std::fs::remove_file(&tmp);
                warn!("Failed to write cookie file {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Issue one request. Transport failures surface as `ExportError::Network`
    /// and are never retried here.
    pub async fn send(&self, request: HttpRequest<'_>) -> ExportResult<HttpResponse> {
        let client = if request.follow_redirects {
            &self.following
        } else {
            &self.manual
        };

        let mut builder = client.request(request.method.clone(), request.url.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(form) = &request.form {
            builder = builder.form(form);
        }

        debug!("{} {}", request.method, request.url);
        let response = builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        debug!("{} {} -> {}", request.method, request.url, status);

        // Only a successful body is worth keeping on disk.
        let body = match request.destination {
            Some(destination) if status.is_success() => {
                ResponseBody::Written(stream_to_file(response, destination).await?)
            }
            _ => ResponseBody::Buffered(response.bytes().await?.to_vec()),
        };

        Ok(HttpResponse {
            status,
            headers,
            url,
            body,
        })
    }
}

/// A single request against the session. Not `Debug`: the form may carry a password.
pub struct HttpRequest<'a> {
    method: Method,
    url: Url,
    query: Vec<(String, String)>,
    form: Option<Vec<(String, String)>>,
    follow_redirects: bool,
    destination: Option<&'a Path>,
}

impl<'a> HttpRequest<'a> {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            form: None,
            follow_redirects: true,
            destination: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn query<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.form = Some(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn without_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    /// Stream a successful body straight to `destination` instead of memory.
    pub fn save_to(mut self, destination: &'a Path) -> Self {
        self.destination = Some(destination);
        self
    }
}

#[derive(Debug)]
pub enum ResponseBody {
    Buffered(Vec<u8>),
    Written(u64),
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Effective URL after any redirects were followed.
    pub url: Url,
    pub body: ResponseBody,
}

impl HttpResponse {
    pub fn bytes(&self) -> &[u8] {
        match &self.body {
            ResponseBody::Buffered(bytes) => bytes,
            ResponseBody::Written(_) => &[],
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.bytes()).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> ExportResult<T> {
        Ok(serde_json::from_slice(self.bytes())?)
    }

    pub fn bytes_written(&self) -> Option<u64> {
        match self.body {
            ResponseBody::Written(n) => Some(n),
            ResponseBody::Buffered(_) => None,
        }
    }

    /// `Location` header resolved against the URL that produced it.
    pub fn location(&self) -> Option<Url> {
        let raw = self.headers.get(LOCATION)?.to_str().ok()?;
        self.url.join(raw).ok()
    }

    pub fn error_for_status(self) -> ExportResult<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ExportError::HttpStatus {
                status: self.status,
                url: self.url.to_string(),
            })
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn partial_path(destination: &Path) -> PathBuf {
    with_suffix(destination, ".part")
}

fn load_cookies(path: &Path) -> CookieStore {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No saved cookies at {}", path.display());
            return CookieStore::default();
        }
        Err(e) => {
            warn!("Failed to open cookie file {}: {}", path.display(), e);
            return CookieStore::default();
        }
    };

    match cookie_store::serde::json::load(BufReader::new(file)) {
        Ok(store) => {
            debug!("Loaded saved cookies from {}", path.display());
            store
        }
        Err(e) => {
            warn!("Ignoring unreadable cookie file {}: {}", path.display(), e);
            CookieStore::default()
        }
    }
}

/// Session cookies are credentials: owner read/write only.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.flush()
}

/// Write into `<destination>.part` and rename on completion, so a file at
/// `destination` always holds a complete body.
async fn stream_to_file(response: Response, destination: &Path) -> ExportResult<u64> {
    let partial = partial_path(destination);

    match write_stream(response, &partial).await {
        Ok(written) => {
            tokio::fs::rename(&partial, destination)
                .await
                .map_err(|e| ExportError::filesystem(destination, e))?;
            Ok(written)
        }
        Err(e) => {
            tokio::fs::remove_file(&partial).await.ok();
            Err(e)
        }
    }
}

async fn write_stream(response: Response, partial: &Path) -> ExportResult<u64> {
    let mut file = tokio::fs::File::create(partial)
        .await
        .map_err(|e| ExportError::filesystem(partial, e))?;

    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| ExportError::filesystem(partial, e))?;
        written += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| ExportError::filesystem(partial, e))?;
    Ok(written)
}
