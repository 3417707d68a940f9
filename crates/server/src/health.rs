use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use supplyq_agent::AgentRuntime;
use supplyq_db::DbPool;

use crate::bootstrap::Readiness;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    runtime: Arc<AgentRuntime>,
    readiness: Readiness,
}

impl HealthState {
    pub fn new(db_pool: DbPool, runtime: Arc<AgentRuntime>, readiness: Readiness) -> Self {
        Self { db_pool, runtime, readiness }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

impl HealthCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: "ready", detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", detail: detail.into() }
    }

    fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub generation: HealthCheck,
    pub documents: HealthCheck,
    pub web_search: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let generation = if state.runtime.has_data_pipeline() {
        HealthCheck::ready("text generator configured")
    } else {
        HealthCheck::degraded("text generator could not be built")
    };
    let documents = match state.runtime.tools().documents() {
        Some(_) => HealthCheck::ready("retrieval service configured"),
        None => HealthCheck::degraded("retrieval service not configured"),
    };
    let web_search = match state.runtime.tools().web() {
        Some(_) => HealthCheck::ready("web search enabled"),
        None => HealthCheck::degraded("web search disabled"),
    };
    let service = match &state.readiness {
        Readiness::Ready => HealthCheck::ready("supplyq-server runtime initialized"),
        Readiness::Degraded { reasons } => {
            HealthCheck::degraded(format!("started degraded: {}", reasons.join("; ")))
        }
    };

    // Optional tools do not gate readiness.
    let ready = database.is_ready() && generation.is_ready();
    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service,
        database,
        generation,
        documents,
        web_search,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck::ready("database query succeeded"),
        Err(error) => HealthCheck::degraded(format!("database query failed: {error}")),
    }
}
