use super::error::ApiError;
use crate::config::persist;
use crate::server::AppContext;
use axum::{extract::State, routing::get, Json, Router};
use stemforged_common::{PipelineSettings, SettingsUpdate};

/// Admin-only routes; the caller layers the admin check.
pub fn settings_routes() -> Router<AppContext> {
    Router::new().route("/settings", get(get_settings).post(update_settings))
}

async fn get_settings(State(ctx): State<AppContext>) -> Json<PipelineSettings> {
    Json(ctx.state.settings())
}

/// Validate and apply a partial update. Jobs already queued keep their
/// snapshot; only new intake sees the change.
async fn update_settings(
    State(ctx): State<AppContext>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<PipelineSettings>, ApiError> {
    let next = ctx.state.settings().merged(&update)?;

    if let Some(ref path) = ctx.config_path {
        let path = path.clone();
        let settings = next.clone();
        tokio::task::spawn_blocking(move || persist::update_pipeline(&path, &settings))
            .await
            .map_err(|e| ApiError::internal(format!("Settings task failed: {}", e)))??;
        tracing::info!("Pipeline settings saved to {:?}", ctx.config_path);
    }

    ctx.state.replace_settings(next.clone());
    Ok(Json(next))
}
