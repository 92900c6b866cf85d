//! HTTP access boundary.

use std::sync::Arc;

use axum::extract::{Form, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use searchd_text::QueryServer;

use crate::error::{ApiError, ApiResult};
use crate::restricter::{build_requests, Restricter};

/// Authenticated caller, installed by the auth middleware in front of us.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserId(pub u64);

#[derive(Clone)]
pub struct AppState {
    pub queries: Arc<QueryServer>,
    pub restricter: Option<Arc<Restricter>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub meeting_id: Option<String>,
}

impl SearchParams {
    /// Body parameters take precedence over the query string.
    fn merge(self, body: Option<SearchParams>) -> SearchParams {
        match body {
            Some(body) => SearchParams { q: body.q.or(self.q), meeting_id: body.meeting_id.or(self.meeting_id) },
            None => self,
        }
    }

    fn question(&self) -> ApiResult<&str> {
        match self.q.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => Ok(q),
            _ => Err(ApiError::InvalidRequest("'q' parameter missing".into())),
        }
    }

    fn meeting_id(&self) -> ApiResult<i64> {
        match self.meeting_id.as_deref().map(str::trim) {
            None | Some("") => Ok(0),
            Some(raw) => raw
                .parse()
                .map_err(|_| ApiError::InvalidRequest(format!("'meeting_id' is not a number: {raw}"))),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/system/search", get(search).post(search))
        .route("/system/search/health", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
}

async fn search(
    State(state): State<AppState>,
    user: Option<Extension<UserId>>,
    Query(params): Query<SearchParams>,
    body: Option<Form<SearchParams>>,
) -> ApiResult<Response> {
    let params = params.merge(body.map(|Form(body)| body));
    let question = params.question()?;
    let meeting_id = params.meeting_id()?;
    let answers = state.queries.query(question, meeting_id).await?;

    let Some(restricter) = &state.restricter else {
        return Ok(Json(answers).into_response());
    };
    let requests = build_requests(answers.keys().map(String::as_str), |collection| {
        state.queries.request_fields(collection)
    });
    if requests.is_empty() {
        return Ok(Json(serde_json::Map::new()).into_response());
    }
    let UserId(user_id) = user.map(|Extension(user)| user).unwrap_or_default();
    let restricted = restricter.restrict(user_id, &requests).await?;
    Ok(Json(restricted).into_response())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub state: &'static str,
    pub documents: u64,
    pub available_slots: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let index = state.queries.index();
    let documents = index.snapshot().map_or(0, |generation| generation.num_docs());
    Json(HealthResponse {
        status: "ok",
        state: index.state().as_str(),
        documents,
        available_slots: state.queries.available(),
    })
}
