// Host platform hooks: picking a local file to upload and handing a
// downloaded file to the user. `NativeHost` uses the desktop's dialogs,
// `DirectoryHost` is the headless variant for terminals without one.

use dialoguer::Input;
use std::io;
use std::path::PathBuf;

/// Extensions offered by the upload picker: images and PDF.
const PICKER_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "tif", "tiff", "svg", "heic", "pdf",
];

pub trait Host: Send + Sync {
    /// Ask the user for a local file. `None` when the user backs out.
    fn pick_file(&self) -> Option<PathBuf>;

    /// Hand `bytes` to the user under `file_name`, returning where it went.
    fn save_file(&self, file_name: &str, bytes: &[u8]) -> io::Result<PathBuf>;
}

/// Native open/save dialogs.
pub struct NativeHost;

impl Host for NativeHost {
    fn pick_file(&self) -> Option<PathBuf> {
        rfd::FileDialog::new()
            .set_title("Upload to Drive folder")
            .add_filter("Images and PDF", PICKER_EXTENSIONS)
            .pick_file()
    }

    fn save_file(&self, file_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = rfd::FileDialog::new()
            .set_file_name(file_name)
            .save_file()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Interrupted, "save dialog cancelled"))?;
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

/// Saves into a fixed directory and asks for upload paths on the terminal.
pub struct DirectoryHost {
    dir: PathBuf,
}

impl DirectoryHost {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectoryHost { dir: dir.into() }
    }
}

impl Host for DirectoryHost {
    fn pick_file(&self) -> Option<PathBuf> {
        let path: String = Input::new()
            .with_prompt("File path (empty to cancel)")
            .allow_empty(true)
            .interact_text()
            .ok()?;
        let path = path.trim();
        if path.is_empty() {
            None
        } else {
            Some(PathBuf::from(path))
        }
    }

    fn save_file(&self, file_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file_name);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}
