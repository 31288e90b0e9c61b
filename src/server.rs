use anyhow::{Context, Result};
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use log2::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::scraper::{ChannelSink, ProgressSink, ScrapeError, ScrapeReport, Scraper, SessionFactory};
use crate::storage::DomainStore;

/// Shared state of the HTTP service.
pub struct AppState<F: SessionFactory> {
    pub scraper: Scraper<F>,
    pub store: DomainStore,
}

pub type AppStateRef<F> = Arc<AppState<F>>;

#[derive(Debug, Deserialize)]
pub struct ScrapeParams {
    pub tld: String,
}

pub fn router<F: SessionFactory>(state: AppStateRef<F>) -> Router {
    Router::new()
        .route("/scrape", post(scrape_domains::<F>))
        .route("/domains", get(list_domains::<F>))
        .route("/domains/{tld}", get(list_domains_by_tld::<F>))
        .route("/ws/scrape/{tld}", get(scrape_socket::<F>))
        .with_state(state)
}

/// Serves the API on `addr` until the process is stopped.
pub async fn serve<F: SessionFactory>(addr: SocketAddr, state: AppStateRef<F>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);
    axum::serve(listener, router(state)).await.context("Server error")?;
    Ok(())
}

fn error_response(status: StatusCode, detail: impl ToString) -> Response {
    (status, Json(json!({ "detail": detail.to_string() }))).into_response()
}

fn scrape_error_response(e: &ScrapeError) -> Response {
    match e {
        ScrapeError::InvalidTld(_) => error_response(StatusCode::BAD_REQUEST, e),
        _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

fn store_error_response(e: &anyhow::Error) -> Response {
    match e.downcast_ref::<ScrapeError>() {
        Some(e) => scrape_error_response(e),
        None => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

async fn store_report<F: SessionFactory>(state: &AppState<F>, report: &ScrapeReport) -> Result<u64> {
    state.store.insert_domains(&report.tld, &report.domains).await
}

/// `POST /scrape?tld=.ir` runs a scrape to completion and stores the result.
async fn scrape_domains<F: SessionFactory>(
    State(state): State<AppStateRef<F>>,
    Query(params): Query<ScrapeParams>,
) -> Response {
    let report = match state.scraper.scrape(&params.tld).await {
        Ok(report) => report,
        Err(e) => {
            error!("Scrape request for {} failed: {}", params.tld, e);
            return scrape_error_response(&e);
        }
    };

    match store_report(&state, &report).await {
        Ok(inserted) => Json(json!({
            "message": format!("Successfully scraped {} domains for {}", report.domains.len(), report.tld),
            "tld": report.tld,
            "domains_found": report.domains.len(),
            "domains_inserted": inserted,
            "outcome": report.outcome,
        }))
        .into_response(),
        Err(e) => {
            error!("Failed to store domains for {}: {:#}", report.tld, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    }
}

async fn list_domains<F: SessionFactory>(State(state): State<AppStateRef<F>>) -> Response {
    match state.store.list_domains().await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => store_error_response(&e),
    }
}

async fn list_domains_by_tld<F: SessionFactory>(
    State(state): State<AppStateRef<F>>,
    Path(tld): Path<String>,
) -> Response {
    match state.store.list_domains_by_tld(&tld).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => store_error_response(&e),
    }
}

/// `GET /ws/scrape/{tld}` streams progress of a new run over a websocket.
/// Sending `cancel` (or closing the socket) cancels the run.
async fn scrape_socket<F: SessionFactory>(
    ws: WebSocketUpgrade,
    State(state): State<AppStateRef<F>>,
    Path(tld): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| run_socket(socket, state, tld))
}

async fn run_socket<F: SessionFactory>(mut socket: WebSocket, state: AppStateRef<F>, tld: String) {
    let (sink, mut updates) = ChannelSink::new();
    let sink: Arc<dyn ProgressSink> = Arc::new(sink);
    let handle = state.scraper.start_with_progress(&tld, Some(sink));
    let mut client_gone = false;

    // the channel closes once the run drops its sink
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                if client_gone {
                    continue;
                }
                let text = match serde_json::to_string(&update) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode progress update: {}", e);
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    debug!("Websocket for {} closed, cancelling run", tld);
                    client_gone = true;
                    handle.cancel();
                }
            }
            incoming = socket.recv(), if !client_gone => {
                match incoming {
                    Some(Ok(Message::Text(text))) if text.as_str().trim().eq_ignore_ascii_case("cancel") => {
                        info!("Cancel requested over websocket for {}", tld);
                        handle.cancel();
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        debug!("Websocket for {} closed, cancelling run", tld);
                        client_gone = true;
                        handle.cancel();
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let summary = match handle.join().await {
        Ok(report) => match store_report(&state, &report).await {
            Ok(inserted) => json!({
                "message": format!("Stored {} new domains for {}", inserted, report.tld),
                "progress": 1.0,
                "tld": report.tld,
                "domains_found": report.domains.len(),
                "domains_inserted": inserted,
                "outcome": report.outcome,
            }),
            Err(e) => {
                error!("Failed to store domains for {}: {:#}", report.tld, e);
                json!({ "message": format!("Error: {:#}", e), "progress": null })
            }
        },
        Err(e) => json!({ "message": format!("Error: {}", e), "progress": null }),
    };

    if !client_gone {
        let _ = socket.send(Message::Text(summary.to_string().into())).await;
        let _ = socket.send(Message::Close(None)).await;
    }
}
