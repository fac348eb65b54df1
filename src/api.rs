use axum::{extract::Query, response::Json, routing::get, Router};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::models::MonitoringSession;
use crate::recovery::RecoveryPlanner;
use crate::session::{SessionId, SessionManager};
use crate::store::TransferStore;
use alloy::primitives::Address;

#[derive(Deserialize)]
pub struct TransferQuery {
    pub token: Option<Address>,
    pub limit: Option<usize>, // defaults to 50
}

#[derive(Deserialize)]
pub struct RecentQuery {
    pub hours: Option<u64>, // defaults to 24
}

#[derive(Serialize)]
struct SessionView {
    id: SessionId,
    #[serde(flatten)]
    session: MonitoringSession,
}

/// Read-only JSON surface over the in-memory transfer set, session
/// counters and jar health. Mutation stays with the library callers.
pub async fn serve(
    port: u16,
    store: Arc<TransferStore>,
    planner: Arc<RecoveryPlanner>,
    sessions: Arc<SessionManager>,
) -> eyre::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "Jar monitor API running" }))
        .route(
            "/transfers",
            get({
                let store = Arc::clone(&store);
                move |q: Query<TransferQuery>| {
                    let store = Arc::clone(&store);
                    async move {
                        let limit = q.limit.unwrap_or(50);
                        let transfers = match q.token {
                            Some(token) => store.token_transfers(token),
                            None => store.latest(limit),
                        };
                        Json(transfers.into_iter().take(limit).collect::<Vec<_>>())
                    }
                }
            }),
        )
        .route(
            "/transfers/direct",
            get({
                let store = Arc::clone(&store);
                move || {
                    let store = Arc::clone(&store);
                    async move { Json(store.direct_transfers()) }
                }
            }),
        )
        .route(
            "/transfers/recent",
            get({
                let store = Arc::clone(&store);
                move |q: Query<RecentQuery>| {
                    let store = Arc::clone(&store);
                    async move { Json(store.recent_transfers(q.hours.unwrap_or(24))) }
                }
            }),
        )
        .route(
            "/jar/health",
            get({
                let planner = Arc::clone(&planner);
                move || {
                    let planner = Arc::clone(&planner);
                    async move { Json(planner.check_jar_health().await) }
                }
            }),
        )
        .route(
            "/sessions",
            get({
                let sessions = Arc::clone(&sessions);
                move || {
                    let sessions = Arc::clone(&sessions);
                    async move {
                        let views: Vec<SessionView> = sessions
                            .active_sessions()
                            .into_iter()
                            .map(|(id, session)| SessionView { id, session })
                            .collect();
                        Json(views)
                    }
                }
            }),
        )
        .layer(cors);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
