use super::auth::AuthUser;
use crate::server::AppContext;
use crate::state::{AppEvent, EventCategory};
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Extension, Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

pub fn sse_routes() -> Router<AppContext> {
    Router::new().route("/events", get(events_handler))
}

/// Whether `event` may be shown to a caller with the given admin flag.
pub fn visible_to(event: &AppEvent, is_admin: bool) -> bool {
    is_admin || event.category() == EventCategory::User
}

fn to_sse(event: &AppEvent) -> Event {
    let data = serde_json::to_string(event)
        .unwrap_or_else(|e| format!(r#"{{"error": "serialization failed: {}"}}"#, e));
    Event::default().event(event.event_type()).data(data)
}

pub async fn events_handler(
    State(ctx): State<AppContext>,
    Extension(user): Extension<AuthUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let is_admin = user.is_admin();
    let rx = ctx.state.subscribe();

    // Lagged receivers skip what they missed.
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .filter(move |event| visible_to(event, is_admin))
        .map(|event| Ok(to_sse(&event)));

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use stemforged_common::{JobId, PipelineSettings, Stage};

    #[test]
    fn test_admin_events_hidden_from_users() {
        let claimed = AppEvent::job_claimed(JobId::new(), Stage::Metadata, "w1".into());
        let settings = AppEvent::settings_updated(PipelineSettings::default());
        let failed = AppEvent::job_failed(JobId::new(), Some(Stage::Packaging), "boom".into());

        assert!(!visible_to(&claimed, false));
        assert!(!visible_to(&settings, false));
        assert!(visible_to(&failed, false));
        assert!(visible_to(&claimed, true));
    }
}
