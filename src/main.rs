// Entrypoint for the CLI application.
// - Sets up logging, reads the configuration from the environment and
//   wires the session, API client and host into the view controller.
// - Returns `anyhow::Result` so terminal errors end the program cleanly.

use anyhow::Context;
use drivefolder_cli::api::HttpDriveApi;
use drivefolder_cli::config::Config;
use drivefolder_cli::drive::DriveClient;
use drivefolder_cli::host::{DirectoryHost, Host, NativeHost};
use drivefolder_cli::session::GoogleSession;
use drivefolder_cli::ui::main_menu;
use drivefolder_cli::view::App;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drivefolder_cli=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    tracing::debug!(folder = %config.folder_id, api = %config.api_url, "configuration loaded");

    let http = reqwest::blocking::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let api = HttpDriveApi::new(http, &config.api_url, &config.upload_url, &config.api_key);
    let session = GoogleSession::from_config(&config);
    let drive = DriveClient::new(Arc::new(session), Arc::new(api));

    let host: Arc<dyn Host> = match &config.download_dir {
        Some(dir) => Arc::new(DirectoryHost::new(dir)),
        None => Arc::new(NativeHost),
    };

    // Blocks until the user exits the menu.
    main_menu(App::new(drive, host, config.folder_id.clone()))
}
