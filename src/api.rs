// API client module: the remote Drive v3 surface this tool consumes
// (list, multipart upload, metadata, media). The `DriveApi` trait is the
// seam the adapter talks to; `HttpDriveApi` is the blocking reqwest
// implementation used by the binary.

use crate::error::{DriveError, Result};
use reqwest::blocking::{multipart, Client};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Fields requested for every listed file.
pub const LIST_FIELDS: &str = "files(id, name, mimeType, webViewLink, thumbnailLink)";

/// One file as returned by a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_link: Option<String>,
}

impl RemoteEntry {
    /// Link the name column points at: the preview page, or the thumbnail
    /// when Drive didn't return one.
    pub fn preview_link(&self) -> Option<&str> {
        self.web_view_link
            .as_deref()
            .or(self.thumbnail_link.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct FileList {
    files: Option<Vec<RemoteEntry>>,
}

/// Metadata part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadMetadata {
    pub name: String,
    pub parents: Vec<String>,
}

/// Descriptor Drive returns for a newly created file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// A local file ready to be sent as the binary part of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        UploadFile {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Read `path` into memory. The mime type is guessed from the extension
    /// and falls back to `application/octet-stream`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("upload")
            .to_string();
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();
        Ok(UploadFile {
            name,
            mime_type,
            bytes,
        })
    }
}

/// Whether a mime type passes the folder listing filter.
pub fn is_listable_mime(mime_type: &str) -> bool {
    mime_type.starts_with("image/") || mime_type == "application/pdf"
}

/// The folder listing query: direct children of one folder that are
/// images or PDFs and not trashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub folder_id: String,
}

impl ListQuery {
    pub fn new(folder_id: impl Into<String>) -> Self {
        ListQuery {
            folder_id: folder_id.into(),
        }
    }

    /// Render the Drive `q` parameter.
    pub fn to_drive_query(&self) -> String {
        format!(
            "'{}' in parents and (mimeType contains 'image/' or mimeType='application/pdf') and trashed = false",
            escape_query_literal(&self.folder_id)
        )
    }

    /// The same predicate the Drive query expresses, for in-process doubles
    /// and for filtering what comes back.
    pub fn matches(&self, parents: &[String], mime_type: &str, trashed: bool) -> bool {
        !trashed && parents.iter().any(|p| p == &self.folder_id) && is_listable_mime(mime_type)
    }
}

fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Remote operations against the storage provider. Every call takes the
/// bearer token explicitly so implementations stay stateless.
#[cfg_attr(test, mockall::automock)]
pub trait DriveApi: Send + Sync {
    fn list_files(&self, token: &str, query: &ListQuery) -> Result<Vec<RemoteEntry>>;

    fn create_multipart(
        &self,
        token: &str,
        metadata: &UploadMetadata,
        file: &UploadFile,
    ) -> Result<CreatedFile>;

    fn get_metadata(&self, token: &str, file_id: &str) -> Result<FileMetadata>;

    fn get_media(&self, token: &str, file_id: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP implementation of `DriveApi`.
#[derive(Clone)]
pub struct HttpDriveApi {
    client: Client,
    api_url: String,
    upload_url: String,
    api_key: Option<String>,
}

impl HttpDriveApi {
    pub fn new(client: Client, api_url: &str, upload_url: &str, api_key: &str) -> Self {
        HttpDriveApi {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            upload_url: upload_url.trim_end_matches('/').to_string(),
            api_key: Some(api_key.to_string()).filter(|k| !k.is_empty()),
        }
    }

    /// Authorization header map for a bearer token. Each operation maps a
    /// malformed token into its own failure.
    fn auth_headers(token: &str) -> std::result::Result<HeaderMap, String> {
        let mut headers = HeaderMap::new();
        let val = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| "access token is not a valid header value".to_string())?;
        headers.insert(AUTHORIZATION, val);
        Ok(headers)
    }

    /// `{api_url}/files/{file_id}` with the id as a single path segment.
    fn file_url(&self, file_id: &str) -> std::result::Result<Url, String> {
        let mut url = Url::parse(&self.api_url).map_err(|e| e.to_string())?;
        url.path_segments_mut()
            .map_err(|_| format!("{} cannot take path segments", self.api_url))?
            .push("files")
            .push(file_id);
        Ok(url)
    }

    fn key_param(&self) -> Vec<(&'static str, &str)> {
        self.api_key
            .as_deref()
            .map(|k| vec![("key", k)])
            .unwrap_or_default()
    }
}

impl DriveApi for HttpDriveApi {
    fn list_files(&self, token: &str, query: &ListQuery) -> Result<Vec<RemoteEntry>> {
        let url = format!("{}/files", self.api_url);
        let q = query.to_drive_query();
        debug!(%q, "listing folder");

        let res = self
            .client
            .get(&url)
            .headers(Self::auth_headers(token).map_err(DriveError::List)?)
            .query(&[("q", q.as_str()), ("fields", LIST_FIELDS)])
            .query(&self.key_param())
            .send()?;
        let status = res.status();
        let body = res.text().unwrap_or_default();
        if !status.is_success() {
            return Err(DriveError::List(format!("{} - {}", status, body)));
        }

        let page: FileList = serde_json::from_str(&body)?;
        page.files
            .ok_or_else(|| DriveError::List("response has no files array".into()))
    }

    fn create_multipart(
        &self,
        token: &str,
        metadata: &UploadMetadata,
        file: &UploadFile,
    ) -> Result<CreatedFile> {
        let url = format!("{}/files", self.upload_url);

        let meta_part = multipart::Part::text(serde_json::to_string(metadata)?)
            .mime_str("application/json")?;
        let file_part = multipart::Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)?;
        let form = multipart::Form::new()
            .part("metadata", meta_part)
            .part("file", file_part);

        let res = self
            .client
            .post(&url)
            .headers(Self::auth_headers(token).map_err(|_| DriveError::NotAuthenticated)?)
            .query(&[("uploadType", "multipart")])
            .multipart(form)
            .send()?;
        let status = res.status();
        let body = res.text().unwrap_or_default();
        if !status.is_success() {
            return Err(DriveError::UploadRejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn get_metadata(&self, token: &str, file_id: &str) -> Result<FileMetadata> {
        let url = self.file_url(file_id).map_err(DriveError::MetadataFetch)?;
        let res = self
            .client
            .get(url)
            .headers(Self::auth_headers(token).map_err(DriveError::MetadataFetch)?)
            .query(&self.key_param())
            .send()
            .map_err(|e| DriveError::MetadataFetch(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            let txt = res.text().unwrap_or_default();
            return Err(DriveError::MetadataFetch(format!("{} - {}", status, txt)));
        }
        res.json()
            .map_err(|e| DriveError::MetadataFetch(e.to_string()))
    }

    fn get_media(&self, token: &str, file_id: &str) -> Result<Vec<u8>> {
        let url = self.file_url(file_id).map_err(DriveError::ContentFetch)?;
        let res = self
            .client
            .get(url)
            .headers(Self::auth_headers(token).map_err(DriveError::ContentFetch)?)
            .query(&[("alt", "media")])
            .query(&self.key_param())
            .send()
            .map_err(|e| DriveError::ContentFetch(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            let txt = res.text().unwrap_or_default();
            return Err(DriveError::ContentFetch(format!("{} - {}", status, txt)));
        }
        let bytes = res
            .bytes()
            .map_err(|e| DriveError::ContentFetch(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
