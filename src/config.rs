// Configuration read from the environment at startup. Nothing here is
// validated: a missing value shows up later as a provider failure in the
// logs, the same way a misconfigured client id would.

use std::path::PathBuf;

pub const DEFAULT_API_URL: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3";
const TOKEN_FILE: &str = ".drivefolder_token.json";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub api_key: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Space-delimited OAuth scope URIs, passed through untouched.
    pub scopes: String,
    pub folder_id: String,
    pub api_url: String,
    pub upload_url: String,
    pub token_path: PathBuf,
    /// When set, downloads land here and upload paths are typed instead of
    /// picked from a native dialog.
    pub download_dir: Option<PathBuf>,
}

impl Config {
    /// Build the configuration from `API_KEY`, `CLIENT_ID`, `CLIENT_SECRET`,
    /// `SCOPES`, `FOLDER_ID`, `DRIVE_API_URL`, `DRIVE_UPLOAD_URL`,
    /// `TOKEN_PATH` and `DOWNLOAD_DIR`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` but reads values through `lookup`, which keeps
    /// tests away from the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let token_path = non_empty("TOKEN_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_token_path);

        Config {
            api_key: lookup("API_KEY").unwrap_or_default(),
            client_id: lookup("CLIENT_ID").unwrap_or_default(),
            client_secret: non_empty("CLIENT_SECRET"),
            scopes: lookup("SCOPES").unwrap_or_default(),
            folder_id: lookup("FOLDER_ID").unwrap_or_default(),
            api_url: non_empty("DRIVE_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.into())
                .trim_end_matches('/')
                .to_string(),
            upload_url: non_empty("DRIVE_UPLOAD_URL")
                .unwrap_or_else(|| DEFAULT_UPLOAD_URL.into())
                .trim_end_matches('/')
                .to_string(),
            token_path,
            download_dir: non_empty("DOWNLOAD_DIR").map(PathBuf::from),
        }
    }
}

fn default_token_path() -> PathBuf {
    let dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.join(TOKEN_FILE)
}
