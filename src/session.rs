// Session module: the provider's authentication state behind the
// `SessionProvider` trait. `GoogleSession` runs the OAuth2 installed-app
// flow (loopback redirect + PKCE), keeps the token in memory and persists
// it to a file in the user's home directory so the next run starts signed
// in.

use crate::config::Config;
use crate::error::{DriveError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Refresh this many seconds before the provider's stated expiry.
const REFRESH_MARGIN_SECS: i64 = 60;
/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;
/// How long an accepted callback connection may stay silent before the
/// listener moves on to the next one. Browsers open idle spare sockets.
const CALLBACK_READ_TIMEOUT: Duration = Duration::from_secs(2);
/// Longest request line read from a callback connection.
const CALLBACK_MAX_LINE: u64 = 8 * 1024;

/// Authentication state of the storage provider.
#[cfg_attr(test, mockall::automock)]
pub trait SessionProvider: Send + Sync {
    /// Prepare the provider client and pick up a persisted session.
    /// Calling it again after success is a no-op.
    fn initialize(&self) -> Result<()>;

    fn is_authenticated(&self) -> bool;

    /// Run the interactive consent flow. Blocks until the user finishes or
    /// abandons it.
    fn login(&self) -> Result<()>;

    /// End the session. The local state is cleared before this returns;
    /// the remote revocation is best effort.
    fn logout(&self);

    /// Current bearer token, refreshed when close to expiry.
    fn access_token(&self) -> Result<String>;

    /// Give background work started by `logout` up to `timeout` to finish.
    fn finish_pending(&self, _timeout: Duration) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    pub expires_at: i64,
}

impl StoredToken {
    pub fn needs_refresh(&self, now: i64) -> bool {
        self.expires_at - REFRESH_MARGIN_SECS <= now
    }

    /// A refresh response usually omits the refresh token; keep the old one.
    fn from_response(resp: TokenResponse, previous_refresh: Option<String>, now: i64) -> Self {
        StoredToken {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token.or(previous_refresh),
            expires_at: now + resp.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Provider OAuth endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub revoke_url: String,
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        OAuthEndpoints {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            revoke_url: "https://oauth2.googleapis.com/revoke".into(),
        }
    }
}

#[derive(Default)]
struct SessionState {
    http: Option<Client>,
    token: Option<StoredToken>,
}

/// Google OAuth2 session with a file-backed token.
pub struct GoogleSession {
    client_id: String,
    client_secret: Option<String>,
    scopes: String,
    token_path: PathBuf,
    endpoints: OAuthEndpoints,
    state: Mutex<SessionState>,
    /// Signalled when the revocation started by the last logout is done.
    revocation: Mutex<Option<Receiver<()>>>,
}

impl GoogleSession {
    pub fn from_config(config: &Config) -> Self {
        GoogleSession {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes: config.scopes.clone(),
            token_path: config.token_path.clone(),
            endpoints: OAuthEndpoints::default(),
            state: Mutex::new(SessionState::default()),
            revocation: Mutex::new(None),
        }
    }

    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    fn http(&self) -> Result<Client> {
        self.state
            .lock()
            .http
            .clone()
            .ok_or_else(|| DriveError::Init("session used before initialize".into()))
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str, challenge: &str) -> Result<Url> {
        Url::parse_with_params(
            &self.endpoints.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", self.scopes.as_str()),
                ("state", state),
                ("code_challenge", challenge),
                ("code_challenge_method", "S256"),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| DriveError::Init(format!("bad auth url: {}", e)))
    }

    fn request_token(&self, http: &Client, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("client_id", self.client_id.as_str()));
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let res = http
            .post(&self.endpoints.token_url)
            .form(&form)
            .send()
            .map_err(|e| DriveError::Token(e.to_string()))?;
        let status = res.status();
        let body = res.text().unwrap_or_default();
        if !status.is_success() {
            return Err(DriveError::Token(format!("{} - {}", status, body)));
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn consent_flow(&self) -> Result<StoredToken> {
        let http = self.http()?;
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let redirect_uri = format!("http://127.0.0.1:{}", listener.local_addr()?.port());

        let pkce = Pkce::generate();
        let state = random_string(32);
        let url = self.authorize_url(&redirect_uri, &state, &pkce.challenge)?;

        println!("Open this URL in your browser to sign in:\n{}\n", url);
        if let Err(e) = open::that(url.as_str()) {
            warn!("could not open a browser: {}", e);
        }

        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message("Waiting for consent in the browser...");
        spinner.enable_steady_tick(Duration::from_millis(120));
        let outcome = wait_for_redirect(&listener, &state, CALLBACK_READ_TIMEOUT);
        spinner.finish_and_clear();
        let code = outcome?;

        let resp = self.request_token(
            &http,
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("code_verifier", pkce.verifier.as_str()),
            ],
        )?;
        Ok(StoredToken::from_response(resp, None, Utc::now().timestamp()))
    }
}

impl SessionProvider for GoogleSession {
    fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.http.is_some() {
            return Ok(());
        }
        if self.client_id.trim().is_empty() {
            return Err(DriveError::Init("CLIENT_ID is not set".into()));
        }

        let http = Client::builder()
            .build()
            .map_err(|e| DriveError::Init(format!("failed to build HTTP client: {}", e)))?;

        match load_token(&self.token_path) {
            Ok(Some(token)) => {
                debug!(path = %self.token_path.display(), "restored saved session");
                state.token = Some(token);
            }
            Ok(None) => {}
            Err(e) => warn!(
                path = %self.token_path.display(),
                "ignoring unreadable token file: {}", e
            ),
        }
        state.http = Some(http);
        info!("provider client initialized");
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.state.lock().token.is_some()
    }

    fn login(&self) -> Result<()> {
        let token = self.consent_flow().map_err(|e| match e {
            DriveError::LoginIncomplete(_) => e,
            other => DriveError::LoginIncomplete(other.to_string()),
        })?;
        if let Err(e) = persist_token(&self.token_path, &token) {
            warn!("session will not survive a restart: {}", e);
        }
        self.state.lock().token = Some(token);
        info!("signed in");
        Ok(())
    }

    fn logout(&self) {
        let (http, token) = {
            let mut state = self.state.lock();
            (state.http.clone(), state.token.take())
        };

        if let Err(e) = std::fs::remove_file(&self.token_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove token file: {}", e);
            }
        }

        info!("signed out");

        let (Some(http), Some(token)) = (http, token) else {
            return;
        };
        let revoke_url = self.endpoints.revoke_url.clone();
        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            let value = token.refresh_token.unwrap_or(token.access_token);
            match http.post(&revoke_url).form(&[("token", value)]).send() {
                Ok(res) if res.status().is_success() => debug!("token revoked"),
                Ok(res) => warn!("token revocation returned {}", res.status()),
                Err(e) => warn!("token revocation failed: {}", e),
            }
            let _ = done_tx.send(());
        });
        *self.revocation.lock() = Some(done_rx);
    }

    fn finish_pending(&self, timeout: Duration) {
        let Some(done) = self.revocation.lock().take() else {
            return;
        };
        if done.recv_timeout(timeout).is_err() {
            warn!("token revocation did not finish before exit");
        }
    }

    fn access_token(&self) -> Result<String> {
        let (current, http) = {
            let state = self.state.lock();
            let token = state.token.clone().ok_or(DriveError::NotAuthenticated)?;
            (token, state.http.clone())
        };
        let now = Utc::now().timestamp();
        if !current.needs_refresh(now) {
            return Ok(current.access_token);
        }
        let Some(refresh) = current.refresh_token else {
            return Ok(current.access_token);
        };
        let http =
            http.ok_or_else(|| DriveError::Init("session used before initialize".into()))?;

        // The state lock is not held across the request.
        debug!("refreshing access token");
        let resp = self.request_token(
            &http,
            &[("grant_type", "refresh_token"), ("refresh_token", refresh.as_str())],
        )?;
        let refreshed = StoredToken::from_response(resp, Some(refresh), now);

        let mut state = self.state.lock();
        if state.token.is_none() {
            debug!("signed out while refreshing, dropping the new token");
            return Err(DriveError::NotAuthenticated);
        }
        if let Err(e) = persist_token(&self.token_path, &refreshed) {
            warn!("failed to save refreshed token: {}", e);
        }
        let access = refreshed.access_token.clone();
        state.token = Some(refreshed);
        Ok(access)
    }
}

struct Pkce {
    verifier: String,
    challenge: String,
}

impl Pkce {
    fn generate() -> Self {
        let verifier = random_string(64);
        let challenge = pkce_challenge(&verifier);
        Pkce {
            verifier,
            challenge,
        }
    }
}

fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
enum Redirect {
    Code(String),
    Denied(String),
    /// Not the callback (favicon and the like).
    Ignored,
}

/// Classify the request line of a loopback callback.
fn parse_redirect(request_line: &str, expected_state: &str) -> Redirect {
    let Some(target) = request_line.split_whitespace().nth(1) else {
        return Redirect::Ignored;
    };
    let Ok(url) = Url::parse(&format!("http://127.0.0.1{}", target)) else {
        return Redirect::Ignored;
    };
    if url.path() != "/" {
        return Redirect::Ignored;
    }

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Redirect::Denied(error);
    }
    match (code, state) {
        (Some(_), Some(s)) if s != expected_state => Redirect::Denied("state mismatch".into()),
        (Some(_), None) => Redirect::Denied("state mismatch".into()),
        (Some(code), Some(_)) => Redirect::Code(code),
        (None, _) => Redirect::Ignored,
    }
}

/// First line of a callback request. `None` for silent, broken or
/// non-UTF-8 connections.
fn read_request_line(stream: &TcpStream) -> Option<String> {
    let mut line = Vec::new();
    match BufReader::new(stream)
        .take(CALLBACK_MAX_LINE)
        .read_until(b'\n', &mut line)
    {
        Ok(_) => String::from_utf8(line).ok(),
        Err(e) => {
            debug!("dropping callback connection: {}", e);
            None
        }
    }
}

fn wait_for_redirect(
    listener: &TcpListener,
    expected_state: &str,
    read_timeout: Duration,
) -> Result<String> {
    for stream in listener.incoming() {
        let mut stream = stream?;
        if let Err(e) = stream.set_read_timeout(Some(read_timeout)) {
            debug!("skipping callback connection: {}", e);
            continue;
        }

        let outcome = read_request_line(&stream)
            .map(|line| parse_redirect(&line, expected_state))
            .unwrap_or(Redirect::Ignored);
        let (status, message) = match &outcome {
            Redirect::Code(_) => ("200 OK", "Signed in. You can close this tab."),
            Redirect::Denied(_) => ("200 OK", "Sign-in did not complete. You can close this tab."),
            Redirect::Ignored => ("404 Not Found", ""),
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            message.len(),
            message
        );
        if let Err(e) = stream.write_all(response.as_bytes()) {
            debug!("failed to answer callback request: {}", e);
        }

        match outcome {
            Redirect::Code(code) => return Ok(code),
            Redirect::Denied(reason) => return Err(DriveError::LoginIncomplete(reason)),
            Redirect::Ignored => continue,
        }
    }
    Err(DriveError::LoginIncomplete("callback listener closed".into()))
}

/// Persist the token as JSON, readable by the owner only.
fn persist_token(path: &Path, token: &StoredToken) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(token)?)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn load_token(path: &Path) -> Result<Option<StoredToken>> {
    match std::fs::read_to_string(path) {
        Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
