// UI layer: an interactive menu using `dialoguer` on top of `App`.
// Signed out it offers only the login control; signed in it prints the
// folder table and offers upload, download and logout.

use crate::api::RemoteEntry;
use crate::view::{App, Layout};
use anyhow::Result;
use crossterm::style::Stylize;
use dialoguer::Select;

/// Marker drawn in the download column.
const DOWNLOAD_MARKER: &str = "⤓";

/// Main interactive menu. Mounts the app, then loops until the user
/// chooses "Exit", then lets pending session work finish.
pub fn main_menu(mut app: App) -> Result<()> {
    app.on_mount();
    loop {
        match app.state().layout() {
            Layout::SignedOut => {
                let items = ["Login with Google", "Exit"];
                let selection = Select::new().items(&items).default(0).interact()?;
                match selection {
                    0 => app.on_login_clicked(),
                    _ => break,
                }
            }
            Layout::SignedIn => {
                println!("{}", render_table(&app.state().entries));
                let items = ["Upload file", "Download file", "Logout", "Exit"];
                let selection = Select::new().items(&items).default(0).interact()?;
                match selection {
                    0 => {
                        // The picker returning nothing is a cancel, not an error.
                        if let Some(path) = app.host().pick_file() {
                            let _ = app.on_file_selected(path);
                        }
                    }
                    1 => handle_download(&app)?,
                    2 => app.on_logout_clicked(),
                    _ => break,
                }
            }
        }
    }
    app.on_exit();
    Ok(())
}

/// One row per entry; picking a row is the per-row download trigger.
fn handle_download(app: &App) -> Result<()> {
    let entries = &app.state().entries;
    if entries.is_empty() {
        println!("No files to download.");
        return Ok(());
    }
    let rows: Vec<String> = entries
        .iter()
        .map(|e| format!("{} {}", DOWNLOAD_MARKER, printable(&e.name)))
        .collect();
    let picked = Select::new()
        .with_prompt("Download")
        .items(&rows)
        .default(0)
        .interact_opt()?;
    if let Some(index) = picked {
        // Errors are logged by the adapter; the menu carries on.
        let _ = app.on_download_clicked(&entries[index].id);
    }
    Ok(())
}

/// Render the folder as a three-column table: download marker, name
/// (hyperlinked to the preview when there is one) and mime type.
pub fn render_table(entries: &[RemoteEntry]) -> String {
    let name_width = entries
        .iter()
        .map(|e| printable(&e.name).chars().count())
        .max()
        .unwrap_or(0)
        .max("File".len());

    let mut out = format!(
        "   {}  {}",
        format!("{:<width$}", "File", width = name_width).bold(),
        "Type".bold()
    );
    if entries.is_empty() {
        out.push_str("\n   (no images or PDFs in this folder)");
        return out;
    }
    for entry in entries {
        let name = printable(&entry.name);
        let pad = " ".repeat(name_width - name.chars().count());
        let link = entry.preview_link().map(printable);
        out.push_str(&format!(
            "\n{}  {}{}  {}",
            DOWNLOAD_MARKER,
            hyperlink(&name, link.as_deref()),
            pad,
            printable(&entry.mime_type)
        ));
    }
    out
}

/// Remote text with control characters (ESC included) replaced, so names
/// and links cannot smuggle escape sequences into the terminal.
fn printable(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { '\u{FFFD}' } else { c })
        .collect()
}

/// OSC 8 terminal hyperlink; plain text when there is no target.
fn hyperlink(text: &str, target: Option<&str>) -> String {
    match target {
        Some(url) => format!("\x1b]8;;{}\x1b\\{}\x1b]8;;\x1b\\", url, text),
        None => text.to_string(),
    }
}
