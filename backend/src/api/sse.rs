//! Server-Sent Events transport for streaming sessions.

use axum::extract::State;
use axum::http::{HeaderName, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tracing::info;

use super::MCP_SESSION_ID_HEADER;
use crate::state::AppState;

/// Open a streaming session.
///
/// The stream carries one `init` event, one `catalog` event, then a `ping`
/// every keep-alive period. The session id is returned in the
/// `mcp-session-id` header and can be passed to `DELETE /mcp`.
///
/// Example usage from JavaScript:
/// ```javascript
/// const source = new EventSource('http://localhost:8099/sse');
/// source.addEventListener('ping', (event) => {
///     console.log('ping', JSON.parse(event.data).sequence);
/// });
/// ```
#[utoipa::path(
    get,
    path = "/sse",
    tag = "MCP",
    responses(
        (status = 200, description = "Event stream of init, catalog and ping events")
    )
)]
pub async fn events_stream(State(state): State<AppState>) -> Response {
    let stream = state.sessions().open().await;
    let session_id = stream.id().to_string();
    info!(
        "New streaming client connected (session {}, total: {})",
        session_id,
        state.sessions().session_count().await
    );

    let events = stream.map(|event| Event::default().event(event.name()).json_data(&event));
    let mut response = Sse::new(events).into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(MCP_SESSION_ID_HEADER), value);
    }
    response
}
