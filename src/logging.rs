//! Structured logging for the explorer service.
//!
//! Every record is a single JSON line carrying a run id, a sequence number,
//! the level, the emitting domain and an event name. Records go to stdout and,
//! when the run directory can be created, to `events.jsonl` / `trace.jsonl`
//! under `$LOG_DIR/$RUN_ID`.
//!
//! Filtering is read from the environment once, on the first record:
//! `LOG_LEVEL` (default `info`), `LOG_DOMAINS` (comma list or `all`) and
//! `PROFILE_SAMPLE` (fraction of profile scopes kept, default 1).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Levels and domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

const LEVELS: [(Level, &str); 6] = [
    (Level::Trace, "trace"),
    (Level::Debug, "debug"),
    (Level::Info, "info"),
    (Level::Warn, "warn"),
    (Level::Error, "error"),
    (Level::Fatal, "fatal"),
];

impl Level {
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        LEVELS
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(level, _)| *level)
    }

    pub fn as_str(&self) -> &'static str {
        LEVELS
            .iter()
            .find(|(level, _)| level == self)
            .map_or("info", |(_, n)| n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Data,    // dataset load, manifest
    Filter,  // criteria, sampling
    Map,     // anchor, layers, boundary fetch
    Chat,    // completion calls
    Http,    // requests, sessions
    System,  // startup
    Profile, // timing scopes
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Data => "data",
            Domain::Filter => "filter",
            Domain::Map => "map",
            Domain::Chat => "chat",
            Domain::Http => "http",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }
}

/// Which records get written.
#[derive(Debug, Clone, PartialEq)]
struct LogFilter {
    min_level: Level,
    /// `None` lets every domain through.
    domains: Option<Vec<String>>,
    profile_sample: f64,
}

impl LogFilter {
    fn from_env() -> Self {
        Self::parse(
            std::env::var("LOG_LEVEL").ok().as_deref(),
            std::env::var("LOG_DOMAINS").ok().as_deref(),
            std::env::var("PROFILE_SAMPLE").ok().as_deref(),
        )
    }

    fn parse(level: Option<&str>, domains: Option<&str>, sample: Option<&str>) -> Self {
        let domains = domains
            .map(str::trim)
            .filter(|d| !d.is_empty() && *d != "all")
            .map(|d| d.split(',').map(|s| s.trim().to_string()).collect());
        Self {
            min_level: level.and_then(Level::parse).unwrap_or(Level::Info),
            domains,
            profile_sample: sample
                .and_then(|v| v.trim().parse::<f64>().ok())
                .map_or(1.0, |p| p.clamp(0.0, 1.0)),
        }
    }

    fn allows(&self, level: Level, component: &str) -> bool {
        level >= self.min_level
            && self
                .domains
                .as_ref()
                .map_or(true, |list| list.iter().any(|d| d == component))
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

type Sink = Option<Mutex<BufWriter<File>>>;

#[derive(Debug)]
struct RunContext {
    run_id: String,
    filter: LogFilter,
    events: Sink,
    trace: Sink,
}

fn open_sink(path: PathBuf) -> Sink {
    File::create(&path)
        .map(|file| Mutex::new(BufWriter::new(file)))
        .map_err(|err| eprintln!("[log] cannot create {}: {}", path.display(), err))
        .ok()
}

fn write_run_manifest(run_dir: &Path, run_id: &str) {
    let manifest = json!({
        "run_id": run_id,
        "ts": ts_now(),
        "pid": process::id(),
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    });
    let _ = std::fs::write(run_dir.join("manifest.json"), manifest.to_string());
}

fn context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", Utc::now().timestamp_millis(), process::id()));
        let filter = LogFilter::from_env();
        let run_dir = PathBuf::from(std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string()))
            .join(&run_id);

        let (events, trace) = match create_dir_all(&run_dir) {
            Ok(()) => {
                write_run_manifest(&run_dir, &run_id);
                (
                    open_sink(run_dir.join("events.jsonl")),
                    open_sink(run_dir.join("trace.jsonl")),
                )
            }
            Err(err) => {
                eprintln!("[log] stdout only, cannot create {}: {}", run_dir.display(), err);
                (None, None)
            }
        };

        RunContext {
            run_id,
            filter,
            events,
            trace,
        }
    })
}

const REDACTED_KEYS: [&str; 4] = ["api_key", "authorization", "Authorization", "cookie"];
const TOP_LEVEL_KEYS: [&str; 2] = ["session_id", "corr_id"];

/// Builds one record. Credentials are masked; correlation ids sit beside
/// `event` instead of inside `data`.
fn build_record(run_id: &str, seq: u64, level: Level, component: &str, event: &str, mut fields: Map<String, Value>) -> Value {
    for key in REDACTED_KEYS {
        if let Some(v) = fields.get_mut(key) {
            *v = Value::String("[REDACTED]".to_string());
        }
    }

    let mut record = Map::new();
    record.insert("ts".into(), json!(ts_now()));
    record.insert("run_id".into(), json!(run_id));
    record.insert("seq".into(), json!(seq));
    record.insert("lvl".into(), json!(level.as_str().to_uppercase()));
    record.insert("component".into(), json!(component));
    record.insert("event".into(), json!(event));
    record.insert("msg".into(), fields.remove("msg").unwrap_or_else(|| json!("")));
    for key in TOP_LEVEL_KEYS {
        if let Some(v) = fields.remove(key) {
            record.insert(key.into(), v);
        }
    }
    record.insert("data".into(), Value::Object(fields));
    Value::Object(record)
}

fn emit(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = context();
    if !ctx.filter.allows(level, component) {
        return;
    }
    let seq = LOG_SEQ.fetch_add(1, Ordering::Relaxed);
    let line = build_record(&ctx.run_id, seq, level, component, event, fields).to_string();

    let sink = if level <= Level::Debug { &ctx.trace } else { &ctx.events };
    if let Some(Ok(mut w)) = sink.as_ref().map(Mutex::lock) {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
    println!("{}", line);
}

// =============================================================================
// Entry points
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    emit(level, domain.as_str(), event, fields);
}

/// Info record keyed by a free-form module name.
pub fn json_log(module: &str, fields: Map<String, Value>) {
    emit(Level::Info, module, module, fields);
}

pub fn log_dataset_loaded(path: &str, rows: usize, skipped: u64, hash: &str) {
    log(
        Level::Info,
        Domain::Data,
        "dataset_loaded",
        obj(&[
            ("path", v_str(path)),
            ("rows", json!(rows)),
            ("skipped_rows", json!(skipped)),
            ("hash_sha256", v_str(hash)),
        ]),
    );
}

pub fn log_filter_applied(session_id: &str, eligible: usize, shown: usize, sampled: bool) {
    log(
        Level::Info,
        Domain::Filter,
        "filter_applied",
        obj(&[
            ("session_id", v_str(session_id)),
            ("eligible", json!(eligible)),
            ("shown", json!(shown)),
            ("sampled", json!(sampled)),
        ]),
    );
}

pub fn log_boundary_skipped(state: &str, reason: &str) {
    log(
        Level::Warn,
        Domain::Map,
        "boundary_skipped",
        obj(&[("state", v_str(state)), ("reason", v_str(reason))]),
    );
}

pub fn log_chat_turn(session_id: &str, provider: &str, turns: usize, ok: bool, detail: &str) {
    log(
        if ok { Level::Info } else { Level::Warn },
        Domain::Chat,
        "chat_turn",
        obj(&[
            ("session_id", v_str(session_id)),
            ("provider", v_str(provider)),
            ("turns", json!(turns)),
            ("ok", json!(ok)),
            ("detail", v_str(detail)),
        ]),
    );
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling
// =============================================================================

/// Emits a `profile` trace record with the elapsed time when dropped.
pub struct ProfileScope {
    label: &'static str,
    started: Instant,
    /// `None` when this scope was not sampled.
    fields: Option<Map<String, Value>>,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self::with_context(label, &[])
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let sampled = sample_hit(context().filter.profile_sample, PROFILE_SEQ.fetch_add(1, Ordering::Relaxed));
        Self {
            label,
            started: Instant::now(),
            fields: sampled.then(|| obj(fields)),
        }
    }
}

/// Deterministic sampling over a rolling counter.
fn sample_hit(rate: f64, seq: u64) -> bool {
    rate >= 1.0 || ((seq % 10_000) as f64 / 10_000.0) < rate
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if let Some(mut fields) = self.fields.take() {
            fields.insert("label".into(), v_str(self.label));
            fields.insert("elapsed_ms".into(), v_num(self.started.elapsed().as_secs_f64() * 1000.0));
            log(Level::Trace, Domain::Profile, "profile", fields);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_and_order() {
        assert_eq!(Level::parse("WARN"), Some(Level::Warn));
        assert_eq!(Level::parse("verbose"), None);
        assert!(Level::Debug < Level::Info && Level::Error < Level::Fatal);
        assert_eq!(Level::Fatal.as_str(), "fatal");
    }

    #[test]
    fn filter_defaults_to_info_and_every_domain() {
        let f = LogFilter::parse(None, None, None);
        assert!(f.allows(Level::Info, "chat"));
        assert!(!f.allows(Level::Debug, "chat"));
        assert_eq!(f.profile_sample, 1.0);
    }

    #[test]
    fn domain_list_restricts_components() {
        let f = LogFilter::parse(Some("trace"), Some("data, map"), Some("2.5"));
        assert!(f.allows(Level::Trace, "map"));
        assert!(!f.allows(Level::Error, "chat"));
        assert_eq!(f.profile_sample, 1.0);
        assert_eq!(LogFilter::parse(None, Some("all"), None).domains, None);
    }

    #[test]
    fn record_redacts_and_lifts_session() {
        let fields = obj(&[
            ("api_key", v_str("sk-123")),
            ("session_id", v_str("abc")),
            ("msg", v_str("hello")),
            ("rows", json!(3)),
        ]);
        let rec = build_record("r-1", 7, Level::Warn, "chat", "chat_turn", fields);
        assert_eq!(rec["lvl"], "WARN");
        assert_eq!(rec["seq"], 7);
        assert_eq!(rec["session_id"], "abc");
        assert_eq!(rec["msg"], "hello");
        assert_eq!(rec["data"]["api_key"], "[REDACTED]");
        assert_eq!(rec["data"]["rows"], 3);
        assert!(rec["data"].get("session_id").is_none());
    }

    #[test]
    fn sampling_rate_bounds() {
        assert!(sample_hit(1.0, 9_999));
        assert!(!sample_hit(0.0, 0));
        let kept = (0..10_000).filter(|s| sample_hit(0.25, *s)).count();
        assert_eq!(kept, 2_500);
    }
}
