use chrono::{DateTime, Utc};
use hyper::{
    header::{ALLOW, CACHE_CONTROL, CONTENT_TYPE},
    Body, Method, Request, Response, StatusCode,
};
use serde::Serialize;
use tracing::{debug, error};

use super::{figure::Figure, DashboardState};
use crate::refresh::{ChartSnapshot, RefreshState};

const DASHBOARD_PAGE: &str = include_str!("../../assets/dashboard.html");

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartsResponse {
    pub generation: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub latest_date: Option<String>,
    pub poll_interval_secs: u64,
    pub instruction: Figure,
    pub branch: Figure,
    pub latest: Figure,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok` once charts have been published, `starting` before that.
    pub status: &'static str,
    pub generation: u64,
    pub refresh_state: RefreshState,
}

pub fn handle(state: &DashboardState, req: Request<Body>) -> Response<Body> {
    debug!(method = %req.method(), path = req.uri().path(), "Dashboard request");

    if req.method() != Method::GET {
        return Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(ALLOW, "GET")
            .body(Body::from("method not allowed"))
            .unwrap_or_else(|_| internal_error());
    }

    let path = req.uri().path().trim_end_matches('/');
    match path {
        "" => html(render_page(state)),
        "/api/charts" => {
            let snapshot = state.charts.snapshot();
            json(&charts_response(state, &snapshot))
        }
        "/api/charts/instruction" => json(&Figure::from_dataset(&state.charts.instruction())),
        "/api/charts/branch" => json(&Figure::from_dataset(&state.charts.branch())),
        "/api/charts/latest" => json(&Figure::from_dataset(&state.charts.latest())),
        "/healthz" => json(&health_response(state)),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("not found"))
            .unwrap_or_else(|_| internal_error()),
    }
}

pub fn charts_response(state: &DashboardState, snapshot: &ChartSnapshot) -> ChartsResponse {
    ChartsResponse {
        generation: snapshot.generation,
        refreshed_at: snapshot.refreshed_at,
        latest_date: snapshot.latest_date.map(coverage_core::codec::format_date),
        poll_interval_secs: state.poll_interval.as_secs(),
        instruction: Figure::from_dataset(&snapshot.instruction),
        branch: Figure::from_dataset(&snapshot.branch),
        latest: Figure::from_dataset(&snapshot.latest),
    }
}

pub fn health_response(state: &DashboardState) -> HealthResponse {
    let generation = state.charts.snapshot().generation;
    HealthResponse {
        status: if generation > 0 { "ok" } else { "starting" },
        generation,
        refresh_state: state.refresh.state(),
    }
}

pub fn render_page(state: &DashboardState) -> String {
    let poll_ms = state.poll_interval.as_millis().max(1000);
    DASHBOARD_PAGE
        .replace("{{TITLE}}", &escape_html(&state.title))
        .replace("{{POLL_INTERVAL_MS}}", &poll_ms.to_string())
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn html(page: String) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(page))
        .unwrap_or_else(|_| internal_error())
}

fn json<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .header(CACHE_CONTROL, "no-store")
            .body(Body::from(body))
            .unwrap_or_else(|_| internal_error()),
        Err(err) => {
            error!(error = %err, "Failed to serialize dashboard response");
            internal_error()
        }
    }
}

fn internal_error() -> Response<Body> {
    let mut response = Response::new(Body::from("internal server error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
