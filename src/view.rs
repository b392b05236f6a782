// View state and controller. Everything the screen shows lives in one
// `ViewState` snapshot, and the only way to get a new snapshot is
// `update(state, msg)`. `App` wires user actions to the adapter and folds
// each outcome back through `update`.

use crate::api::{CreatedFile, RemoteEntry, UploadFile};
use crate::drive::DriveClient;
use crate::error::Result;
use crate::host::Host;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub authenticated: bool,
    pub entries: Vec<RemoteEntry>,
    /// Current value of the file picker.
    pub selected_file: Option<PathBuf>,
}

/// Which of the two screens to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    SignedOut,
    SignedIn,
}

impl ViewState {
    pub fn layout(&self) -> Layout {
        if self.authenticated {
            Layout::SignedIn
        } else {
            Layout::SignedOut
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    SessionChecked(bool),
    LoggedIn,
    LoggedOut,
    EntriesLoaded(Vec<RemoteEntry>),
    FileSelected(PathBuf),
    SelectionCleared,
}

pub fn update(state: ViewState, msg: Msg) -> ViewState {
    match msg {
        Msg::SessionChecked(authenticated) => ViewState {
            authenticated,
            ..state
        },
        Msg::LoggedIn => ViewState {
            authenticated: true,
            ..state
        },
        Msg::LoggedOut => ViewState {
            authenticated: false,
            entries: Vec::new(),
            selected_file: None,
        },
        // The latest listing replaces whatever was shown.
        Msg::EntriesLoaded(entries) => ViewState { entries, ..state },
        Msg::FileSelected(path) => ViewState {
            selected_file: Some(path),
            ..state
        },
        Msg::SelectionCleared => ViewState {
            selected_file: None,
            ..state
        },
    }
}

pub struct App {
    drive: DriveClient,
    host: Arc<dyn Host>,
    folder_id: String,
    state: ViewState,
}

impl App {
    pub fn new(drive: DriveClient, host: Arc<dyn Host>, folder_id: impl Into<String>) -> Self {
        App {
            drive,
            host,
            folder_id: folder_id.into(),
            state: ViewState::default(),
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn drive(&self) -> &DriveClient {
        &self.drive
    }

    pub fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    pub fn dispatch(&mut self, msg: Msg) {
        let current = std::mem::take(&mut self.state);
        self.state = update(current, msg);
    }

    fn refresh(&mut self) {
        let entries = self.drive.list_entries(&self.folder_id);
        self.dispatch(Msg::EntriesLoaded(entries));
    }

    /// Runs once when the screen comes up: initialize, check for a live
    /// session and list the folder if there is one.
    pub fn on_mount(&mut self) {
        self.drive.initialize();
        let authenticated = self.drive.is_authenticated();
        self.dispatch(Msg::SessionChecked(authenticated));
        if authenticated {
            self.refresh();
        }
    }

    pub fn on_login_clicked(&mut self) {
        // A failure is logged by the adapter and the login control stays.
        if self.drive.login().is_ok() {
            self.dispatch(Msg::LoggedIn);
            self.refresh();
        }
    }

    pub fn on_logout_clicked(&mut self) {
        self.drive.logout();
        self.dispatch(Msg::LoggedOut);
    }

    pub fn on_exit(&self) {
        self.drive.shutdown();
    }

    /// Upload the picked file, clear the picker, then re-list. The new file
    /// only shows up if the listing returns it.
    pub fn on_file_selected(&mut self, path: PathBuf) -> Result<CreatedFile> {
        info!(path = %path.display(), "Uploading file");
        self.dispatch(Msg::FileSelected(path.clone()));

        let result = UploadFile::from_path(&path)
            .map_err(|e| {
                error!("Error reading {}: {}", path.display(), e);
                e
            })
            .and_then(|file| self.drive.upload_entry(&self.folder_id, &file));

        self.dispatch(Msg::SelectionCleared);
        self.refresh();
        result
    }

    pub fn on_download_clicked(&self, entry_id: &str) -> Result<()> {
        self.drive.download_entry(entry_id, self.host.as_ref())
    }
}
