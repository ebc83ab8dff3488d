//! Health endpoint.

use axum::{extract::State, Json};
use hindsight_types::HealthReport;

use crate::state::AppState;

/// Get server and database health
///
/// Same report as the `health_check` tool, plus the number of open
/// streaming sessions.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    responses(
        (status = 200, description = "Server health", body = HealthReport)
    )
)]
pub async fn get_health(State(state): State<AppState>) -> Json<HealthReport> {
    let mut report = state.registry().health_check().await;
    report.sessions = Some(state.sessions().session_count().await);
    Json(report)
}
