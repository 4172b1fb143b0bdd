//! Writes `<dataset>.manifest.json` describing a university CSV: fingerprint,
//! row counts, schema check and completeness counts.

use serde_json::json;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use uniexplorer::config::DEFAULT_DATA_PATH;
use uniexplorer::data::{analyze_csv, default_manifest_path, REQUIRED_COLUMNS};

fn main() {
    let path = PathBuf::from(
        env::args()
            .nth(1)
            .or_else(|| env::var("DATA_PATH").ok())
            .unwrap_or_else(|| DEFAULT_DATA_PATH.to_string()),
    );

    let now_ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let manifest = match analyze_csv(&path, now_ts) {
        Ok(m) => m,
        Err(err) => {
            eprintln!("analysis failed: {:#}", err);
            std::process::exit(1);
        }
    };

    if !manifest.schema_ok() {
        eprintln!("missing columns: {:?}", manifest.missing_columns);
        eprintln!("required columns: {:?}", REQUIRED_COLUMNS);
        std::process::exit(2);
    }

    let out_path = default_manifest_path(&path);
    let payload = json!({ "manifest": manifest });
    let written = serde_json::to_string_pretty(&payload)
        .map_err(|e| e.to_string())
        .and_then(|text| fs::write(&out_path, text).map_err(|e| e.to_string()));
    if let Err(err) = written {
        eprintln!("failed to write {}: {}", out_path.display(), err);
        std::process::exit(3);
    }
    println!(
        "wrote manifest {} rows={} skipped={} missing_coordinates={}",
        out_path.display(),
        manifest.row_count,
        manifest.skipped_rows,
        manifest.rows_missing_coordinates
    );
}
