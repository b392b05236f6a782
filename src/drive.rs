// The adapter the view talks to: one place for every call into the
// storage provider. Session operations are delegated to a
// `SessionProvider`, remote calls to a `DriveApi`.
//
// Listing never fails from the caller's point of view: any problem is
// logged and yields an empty vector, so the table keeps rendering.
// Upload and download return their errors after logging them.

use crate::api::{CreatedFile, DriveApi, ListQuery, RemoteEntry, UploadFile, UploadMetadata};
use crate::error::{DriveError, Result};
use crate::host::Host;
use crate::session::SessionProvider;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long exit waits for a logout's token revocation.
const REVOCATION_GRACE: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct DriveClient {
    session: Arc<dyn SessionProvider>,
    api: Arc<dyn DriveApi>,
}

impl DriveClient {
    pub fn new(session: Arc<dyn SessionProvider>, api: Arc<dyn DriveApi>) -> Self {
        DriveClient { session, api }
    }

    /// Set up the provider client. A failure is only logged; the caller
    /// sees it as "not signed in".
    pub fn initialize(&self) {
        if let Err(e) = self.session.initialize() {
            error!("Error initializing provider client: {}", e);
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn login(&self) -> Result<()> {
        self.session.login().map_err(|e| {
            error!("Error login: {}", e);
            match e {
                DriveError::LoginIncomplete(_) => e,
                other => DriveError::LoginIncomplete(other.to_string()),
            }
        })
    }

    /// Best effort; the session is gone locally once this returns.
    pub fn logout(&self) {
        self.session.logout();
    }

    /// Called once before the process exits, so background session work
    /// gets a bounded chance to finish.
    pub fn shutdown(&self) {
        self.session.finish_pending(REVOCATION_GRACE);
    }

    /// Images and PDFs directly inside `folder_id`, in provider order.
    pub fn list_entries(&self, folder_id: &str) -> Vec<RemoteEntry> {
        if folder_id.trim().is_empty() {
            warn!("no folder id configured, nothing to list");
            return Vec::new();
        }
        let token = match self.session.access_token() {
            Ok(token) => token,
            Err(e) => {
                error!("Error listing folder files: {}", e);
                return Vec::new();
            }
        };

        let query = ListQuery::new(folder_id);
        match self.api.list_files(&token, &query) {
            Ok(files) => {
                let total = files.len();
                let entries: Vec<RemoteEntry> = files
                    .into_iter()
                    .filter(|f| !f.id.is_empty() && crate::api::is_listable_mime(&f.mime_type))
                    .collect();
                if entries.len() != total {
                    debug!(dropped = total - entries.len(), "filtered listing");
                }
                info!(count = entries.len(), "fetched folder files");
                entries
            }
            Err(e) => {
                error!("Error listing folder files: {}", e);
                Vec::new()
            }
        }
    }

    pub fn upload_entry(&self, folder_id: &str, file: &UploadFile) -> Result<CreatedFile> {
        let result = self.session.access_token().and_then(|token| {
            let metadata = UploadMetadata {
                name: file.name.clone(),
                parents: vec![folder_id.to_string()],
            };
            self.api.create_multipart(&token, &metadata, file)
        });
        match &result {
            Ok(created) => info!(id = %created.id, name = %created.name, "File uploaded successfully"),
            Err(e) => error!("Error uploading file: {}", e),
        }
        result
    }

    /// Fetch metadata for the file name, then the content, then hand the
    /// bytes to `host`. Nothing is fetched or saved past the first failure.
    pub fn download_entry(&self, file_id: &str, host: &dyn Host) -> Result<()> {
        let result = self.fetch_and_save(file_id, host);
        if let Err(e) = &result {
            error!("Error downloading file: {}", e);
        }
        result
    }

    fn fetch_and_save(&self, file_id: &str, host: &dyn Host) -> Result<()> {
        let token = self
            .session
            .access_token()
            .map_err(|e| DriveError::MetadataFetch(e.to_string()))?;

        let metadata = self.api.get_metadata(&token, file_id)?;
        debug!(?metadata, "fetched metadata");
        let bytes = self.api.get_media(&token, file_id)?;

        let name = save_name(&metadata.name, file_id);
        let path = host
            .save_file(&name, &bytes)
            .map_err(|source| DriveError::Save { name, source })?;
        info!(path = %path.display(), "File downloaded successfully");
        Ok(())
    }
}

/// Last path component of the provider's file name, or the id when that
/// leaves nothing usable.
fn save_name(remote_name: &str, file_id: &str) -> String {
    let normalized = remote_name.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .and_then(|s| s.to_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(file_id)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{FileMetadata, MockDriveApi};
    use crate::session::MockSessionProvider;
    use mockall::predicate::eq;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::io;
    use std::path::PathBuf;

    #[derive(Default)]
    struct RecordingHost {
        saved: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl Host for RecordingHost {
        fn pick_file(&self) -> Option<PathBuf> {
            None
        }

        fn save_file(&self, file_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
            self.saved.lock().push((file_name.to_string(), bytes.to_vec()));
            Ok(PathBuf::from(file_name))
        }
    }

    fn signed_in_session() -> MockSessionProvider {
        let mut session = MockSessionProvider::new();
        session
            .expect_access_token()
            .returning(|| Ok("tok".to_string()));
        session
    }

    fn entry(id: &str, name: &str, mime: &str) -> RemoteEntry {
        RemoteEntry {
            id: id.into(),
            name: name.into(),
            mime_type: mime.into(),
            web_view_link: None,
            thumbnail_link: None,
        }
    }

    fn client(session: MockSessionProvider, api: MockDriveApi) -> DriveClient {
        DriveClient::new(Arc::new(session), Arc::new(api))
    }

    #[test]
    fn initialize_failure_is_swallowed() {
        let mut session = MockSessionProvider::new();
        session
            .expect_initialize()
            .times(1)
            .returning(|| Err(DriveError::Init("no client".into())));
        session.expect_is_authenticated().return_const(false);

        let drive = client(session, MockDriveApi::new());
        drive.initialize();
        assert!(!drive.is_authenticated());
    }

    #[test]
    fn shutdown_waits_a_bounded_time_for_the_session() {
        let mut session = MockSessionProvider::new();
        session
            .expect_finish_pending()
            .with(eq(REVOCATION_GRACE))
            .times(1)
            .return_const(());

        client(session, MockDriveApi::new()).shutdown();
    }

    #[test]
    fn login_failure_reports_incomplete() {
        let mut session = MockSessionProvider::new();
        session
            .expect_login()
            .returning(|| Err(DriveError::Token("400 - invalid_grant".into())));

        let drive = client(session, MockDriveApi::new());
        assert!(matches!(drive.login(), Err(DriveError::LoginIncomplete(_))));
    }

    #[test]
    fn list_sends_folder_query_with_token() {
        let mut api = MockDriveApi::new();
        api.expect_list_files()
            .withf(|token, query| token == "tok" && query.folder_id == "folder-1")
            .times(1)
            .returning(|_, _| Ok(vec![entry("1", "a.png", "image/png")]));

        let drive = client(signed_in_session(), api);
        assert_eq!(
            drive.list_entries("folder-1"),
            vec![entry("1", "a.png", "image/png")]
        );
    }

    #[test]
    fn list_drops_unlisted_mime_types_and_empty_ids() {
        let mut api = MockDriveApi::new();
        api.expect_list_files().returning(|_, _| {
            Ok(vec![
                entry("1", "a.png", "image/png"),
                entry("2", "b.txt", "text/plain"),
                entry("", "ghost.png", "image/png"),
                entry("3", "c.pdf", "application/pdf"),
            ])
        });

        let drive = client(signed_in_session(), api);
        let ids: Vec<String> = drive
            .list_entries("folder-1")
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["1".to_string(), "3".to_string()]);
    }

    #[test]
    fn list_transport_failure_yields_empty() {
        let mut api = MockDriveApi::new();
        api.expect_list_files()
            .returning(|_, _| Err(DriveError::List("503 - backend error".into())));

        let drive = client(signed_in_session(), api);
        assert!(drive.list_entries("folder-1").is_empty());
    }

    #[test]
    fn list_without_session_or_folder_skips_remote_call() {
        let mut session = MockSessionProvider::new();
        session
            .expect_access_token()
            .returning(|| Err(DriveError::NotAuthenticated));
        let mut api = MockDriveApi::new();
        api.expect_list_files().times(0);

        let drive = client(session, api);
        assert!(drive.list_entries("folder-1").is_empty());
        assert!(drive.list_entries("  ").is_empty());
    }

    #[test]
    fn upload_sends_name_and_parent() {
        let mut api = MockDriveApi::new();
        api.expect_create_multipart()
            .withf(|token, meta, file| {
                token == "tok"
                    && meta.name == "scan.pdf"
                    && meta.parents == vec!["folder-1".to_string()]
                    && file.bytes == b"%PDF".to_vec()
            })
            .times(1)
            .returning(|_, meta, file| {
                Ok(CreatedFile {
                    id: "new-id".into(),
                    name: meta.name.clone(),
                    mime_type: Some(file.mime_type.clone()),
                })
            });

        let drive = client(signed_in_session(), api);
        let file = UploadFile::new("scan.pdf", "application/pdf", b"%PDF".to_vec());
        let created = drive.upload_entry("folder-1", &file).unwrap();
        assert_eq!(created.id, "new-id");
        assert_eq!(created.mime_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn upload_rejection_is_returned() {
        let mut api = MockDriveApi::new();
        api.expect_create_multipart().returning(|_, _, _| {
            Err(DriveError::UploadRejected {
                status: 403,
                body: r#"{"error":{"code":403}}"#.into(),
            })
        });

        let drive = client(signed_in_session(), api);
        let file = UploadFile::new("a.png", "image/png", vec![1, 2, 3]);
        match drive.upload_entry("folder-1", &file) {
            Err(DriveError::UploadRejected { status, body }) => {
                assert_eq!(status, 403);
                assert!(body.contains("403"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn download_saves_under_metadata_name() {
        let mut api = MockDriveApi::new();
        api.expect_get_metadata()
            .with(eq("tok"), eq("id-7"))
            .times(1)
            .returning(|_, _| {
                Ok(FileMetadata {
                    id: "id-7".into(),
                    name: "holiday.jpg".into(),
                    mime_type: Some("image/jpeg".into()),
                })
            });
        api.expect_get_media()
            .with(eq("tok"), eq("id-7"))
            .times(1)
            .returning(|_, _| Ok(b"jpeg-bytes".to_vec()));

        let host = RecordingHost::default();
        let drive = client(signed_in_session(), api);
        drive.download_entry("id-7", &host).unwrap();
        assert_eq!(
            *host.saved.lock(),
            vec![("holiday.jpg".to_string(), b"jpeg-bytes".to_vec())]
        );
    }

    #[test]
    fn metadata_failure_never_requests_content() {
        let mut api = MockDriveApi::new();
        api.expect_get_metadata()
            .times(1)
            .returning(|_, _| Err(DriveError::MetadataFetch("401 Unauthorized".into())));
        api.expect_get_media().times(0);

        let host = RecordingHost::default();
        let drive = client(signed_in_session(), api);
        assert!(matches!(
            drive.download_entry("id-7", &host),
            Err(DriveError::MetadataFetch(_))
        ));
        assert!(host.saved.lock().is_empty());
    }

    #[test]
    fn missing_token_fails_as_metadata_fetch() {
        let mut session = MockSessionProvider::new();
        session
            .expect_access_token()
            .returning(|| Err(DriveError::NotAuthenticated));
        let mut api = MockDriveApi::new();
        api.expect_get_metadata().times(0);
        api.expect_get_media().times(0);

        let drive = client(session, api);
        assert!(matches!(
            drive.download_entry("id-7", &RecordingHost::default()),
            Err(DriveError::MetadataFetch(_))
        ));
    }

    #[test]
    fn content_failure_saves_nothing() {
        let mut api = MockDriveApi::new();
        api.expect_get_metadata().returning(|_, _| {
            Ok(FileMetadata {
                id: "id-7".into(),
                name: "a.png".into(),
                mime_type: None,
            })
        });
        api.expect_get_media()
            .returning(|_, _| Err(DriveError::ContentFetch("500".into())));

        let host = RecordingHost::default();
        let drive = client(signed_in_session(), api);
        assert!(drive.download_entry("id-7", &host).is_err());
        assert!(host.saved.lock().is_empty());
    }

    #[test]
    fn save_name_keeps_last_component() {
        assert_eq!(save_name("photo.png", "id"), "photo.png");
        assert_eq!(save_name("../../etc/passwd", "id"), "passwd");
        assert_eq!(save_name(r"dir\evil.pdf", "id"), "evil.pdf");
        assert_eq!(save_name("", "id-1"), "id-1");
        assert_eq!(save_name("..", "id-2"), "id-2");
    }
}
