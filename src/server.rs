//! HTTP surface: the dashboard page plus JSON endpoints for filtering and
//! chat. Each request is handled end-to-end before it returns.

use anyhow::Result;
use axum::extract::State;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::chat::{render_transcript, ChatRelay, ChatSession, RelayState, SubmitOutcome, Transcript, Turn};
use crate::data::{Dataset, FilterBounds};
use crate::filter::{self, FilterCriteria, SizeRange, StateSelection, ALL_STATES};
use crate::logging::{self, log, obj, v_str, Domain, Level};
use crate::map::{DeckSpec, MapPresenter};
use crate::session::{session_id_from_cookie, SessionStore, SharedSession, SESSION_COOKIE};

const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");

pub struct AppState {
    pub dataset: Arc<Dataset>,
    pub bounds: FilterBounds,
    pub presenter: MapPresenter,
    pub relay: ChatRelay,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(dataset: Arc<Dataset>, presenter: MapPresenter, relay: ChatRelay) -> Self {
        let bounds = dataset.filter_bounds();
        Self {
            dataset,
            bounds,
            presenter,
            relay,
            sessions: SessionStore::default(),
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.sessions = SessionStore::new(ttl);
        self
    }

    /// Live session named by the request cookie. Read-only pages use this so
    /// cookieless visits do not allocate sessions.
    fn existing_session(&self, headers: &HeaderMap) -> Option<SharedSession> {
        self.sessions.get(cookie_session_id(headers))
    }

    /// Session named by the request cookie, plus a `Set-Cookie` value when a
    /// new one had to be created.
    fn session(&self, headers: &HeaderMap) -> (String, SharedSession, Option<HeaderValue>) {
        let (id, session, created) = self.sessions.get_or_create(cookie_session_id(headers));
        let set_cookie = if created {
            log(Level::Debug, Domain::Http, "session_created", obj(&[("session_id", v_str(&id))]));
            HeaderValue::from_str(&format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id)).ok()
        } else {
            None
        };
        (id, session, set_cookie)
    }
}

fn cookie_session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(session_id_from_cookie)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/api/options", get(options))
        .route("/api/filter", axum::routing::post(apply_filter))
        .route("/api/chat", get(chat_history).post(chat_submit))
        .route("/api/health", get(health))
        .with_state(state)
}

pub async fn serve(bind_addr: &str, state: Arc<AppState>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    log(
        Level::Info,
        Domain::System,
        "listening",
        obj(&[("addr", v_str(&listener.local_addr()?.to_string()))]),
    );
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn with_cookie(mut resp: Response, cookie: Option<HeaderValue>) -> Response {
    if let Some(cookie) = cookie {
        resp.headers_mut().insert(SET_COOKIE, cookie);
    }
    resp
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

// =============================================================================
// Page
// =============================================================================

fn state_options(bounds: &FilterBounds, selected: &StateSelection) -> String {
    let mut out = String::new();
    let all = std::iter::once(ALL_STATES).chain(bounds.states.iter().map(String::as_str));
    for state in all {
        let is_selected = match selected {
            StateSelection::All => state == ALL_STATES,
            StateSelection::Only(s) => s == state,
        };
        out.push_str(&format!(
            "<option value=\"{0}\"{1}>{0}</option>",
            html_escape(state),
            if is_selected { " selected" } else { "" }
        ));
    }
    out
}

async fn index_page(State(app): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let session = app.existing_session(&headers);
    let criteria = session
        .as_ref()
        .and_then(|s| s.criteria())
        .unwrap_or_else(|| FilterCriteria::defaults(&app.bounds));
    let chat_html = match &session {
        Some(s) => render_transcript(s.chat.lock().await.transcript()),
        None => render_transcript(&Transcript::new()),
    };
    let b = &app.bounds;

    let page = INDEX_TEMPLATE
        .replace("{{STATE_OPTIONS}}", &state_options(b, &criteria.state))
        .replace("{{KEYWORD}}", &html_escape(&criteria.keyword))
        .replace("{{SIZE_MIN}}", &b.size_min.to_string())
        .replace("{{SIZE_MAX}}", &b.size_max.to_string())
        .replace("{{SELECTED_SIZE_MIN}}", &criteria.size.min.to_string())
        .replace("{{SELECTED_SIZE_MAX}}", &criteria.size.max.to_string())
        .replace("{{BUDGET_MIN}}", &b.budget_min.to_string())
        .replace("{{BUDGET_MAX}}", &b.budget_max.to_string())
        .replace("{{BUDGET_STEP}}", &b.budget_step.to_string())
        .replace("{{SELECTED_BUDGET}}", &(criteria.max_total_cost.round() as u64).to_string())
        .replace("{{CHAT_HTML}}", &chat_html);

    Html(page).into_response()
}

async fn options(State(app): State<Arc<AppState>>) -> Json<FilterBounds> {
    Json(app.bounds.clone())
}

async fn health(State(app): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "records": app.dataset.len(),
        "sessions": app.sessions.len(),
    }))
}

// =============================================================================
// Filter
// =============================================================================

/// Form submission. Missing fields take the form defaults.
#[derive(Debug, Default, Deserialize)]
pub struct FilterRequest {
    pub state: Option<String>,
    pub keyword: Option<String>,
    pub size_min: Option<u64>,
    pub size_max: Option<u64>,
    pub budget: Option<u64>,
}

impl FilterRequest {
    pub fn into_criteria(self, bounds: &FilterBounds) -> FilterCriteria {
        FilterCriteria {
            state: self
                .state
                .map(StateSelection::from)
                .unwrap_or(StateSelection::All),
            keyword: self.keyword.unwrap_or_default(),
            size: SizeRange {
                min: self.size_min.unwrap_or(bounds.size_min),
                max: self.size_max.unwrap_or(bounds.size_max),
            },
            max_total_cost: self.budget.unwrap_or(bounds.budget_default) as f64,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FilterResponse {
    pub deck: DeckSpec,
    pub summary: String,
    pub count: usize,
    pub eligible: usize,
    pub applied: FilterCriteria,
}

async fn apply_filter(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<FilterRequest>,
) -> Response {
    let (sid, session, cookie) = app.session(&headers);
    let criteria = req.into_criteria(&app.bounds);

    let results = {
        let _scope = logging::ProfileScope::new("filter");
        filter::apply_filters(&app.dataset, &criteria)
    };
    logging::log_filter_applied(&sid, results.eligible_count(), results.len(), results.was_sampled());
    let view = app.presenter.present(&results, &criteria).await;

    session.remember_criteria(criteria.clone());

    let body = FilterResponse {
        deck: view.deck,
        summary: view.summary,
        count: view.count,
        eligible: results.eligible_count(),
        applied: criteria,
    };
    with_cookie(Json(body).into_response(), cookie)
}

// =============================================================================
// Chat
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub html: String,
    pub turns: Vec<Turn>,
    pub state: RelayState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SubmitOutcome>,
}

fn chat_response(chat: &ChatSession, outcome: Option<SubmitOutcome>) -> ChatResponse {
    ChatResponse {
        html: render_transcript(chat.transcript()),
        turns: chat.transcript().turns().to_vec(),
        state: chat.state(),
        outcome,
    }
}

async fn chat_history(State(app): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let body = match app.existing_session(&headers) {
        Some(session) => {
            let chat = session.chat.lock().await;
            chat_response(&chat, None)
        }
        None => chat_response(&ChatSession::new(), None),
    };
    Json(body).into_response()
}

async fn chat_submit(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Response {
    let (sid, session, cookie) = app.session(&headers);
    let mut chat = session.chat.lock().await;
    let outcome = app.relay.submit(&sid, &mut chat, &req.message).await;
    with_cookie(Json(chat_response(&chat, Some(outcome))).into_response(), cookie)
}
