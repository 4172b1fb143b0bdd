use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use uniexplorer::chat::ChatRelay;
use uniexplorer::config::Config;
use uniexplorer::data::load_cached;
use uniexplorer::logging::{json_log, log, log_dataset_loaded, obj, v_num, v_str, Domain, Level};
use uniexplorer::map::{boundary, MapPresenter};
use uniexplorer::server::{self, AppState};

fn now_ts() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cfg = Config::from_env();

    // Startup precondition: a missing or malformed dataset aborts the process.
    let data_path = Path::new(&cfg.data_path);
    let dataset = load_cached(data_path).with_context(|| format!("loading {}", cfg.data_path))?;
    let manifest = dataset.manifest(now_ts())?;
    log_dataset_loaded(&cfg.data_path, dataset.len(), dataset.skipped_rows(), &manifest.hash_sha256);
    if manifest.rows_missing_coordinates > 0 {
        log(
            Level::Warn,
            Domain::Data,
            "rows_without_coordinates",
            obj(&[("count", v_num(manifest.rows_missing_coordinates as f64))]),
        );
    }

    if cfg.chat_api_key.is_none() {
        log(
            Level::Warn,
            Domain::Chat,
            "missing_api_key",
            obj(&[
                ("provider", v_str(cfg.chat_provider.as_str())),
                ("msg", v_str("chat requests will fail until a key is configured")),
            ]),
        );
    }
    let backend = cfg.chat_provider.build(&cfg);
    json_log(
        "chat_backend",
        obj(&[
            ("provider", v_str(backend.name())),
            ("model", v_str(&cfg.chat_model)),
        ]),
    );

    let presenter = MapPresenter::new(Arc::from(boundary::source_for(&cfg.boundary_url)), &cfg.map_style);
    let relay = ChatRelay::new(Arc::from(backend), &cfg.system_prompt);
    let state = Arc::new(
        AppState::new(dataset, presenter, relay).with_session_ttl(Duration::from_secs(cfg.session_ttl_secs)),
    );

    server::serve(&cfg.bind_addr, state).await
}
