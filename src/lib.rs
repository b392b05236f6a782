// Library root
// ------------
// This crate exposes the pieces of the CLI as a library. The binary
// (`main.rs`) builds them from the environment and hands them to the menu.
//
// Module responsibilities:
// - `config`: environment configuration.
// - `session`: provider authentication (OAuth2 consent, token file).
// - `api`: the Drive v3 HTTP surface (list, upload, metadata, media).
// - `drive`: the adapter the view calls; owns the error policy.
// - `host`: file picker and save hooks of the hosting terminal/desktop.
// - `view`: view state, its update function and the controller.
// - `ui`: terminal rendering and the interactive menu.
pub mod api;
pub mod config;
pub mod drive;
pub mod error;
pub mod host;
pub mod session;
#[cfg(test)]
mod test_support;
pub mod ui;
pub mod view;
