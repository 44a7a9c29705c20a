pub mod datasources;
pub mod upload;

use salvo::prelude::*;

use crate::utils::middleware::inject_state;
use crate::utils::{get_app_state, AppError, AppState};

/// Full HTTP surface: `/health` plus everything under `/api`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .hoop(inject_state(state))
        .push(Router::with_path("/health").get(health_check))
        .push(
            Router::with_path("/api")
                .push(Router::with_path("/health").get(health_check))
                .push(datasources::datasource_routes())
                .push(Router::with_path("/uploads").post(upload::upload_csv)),
        )
}

#[handler]
async fn health_check(res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    state
        .datasources
        .health_check()
        .await
        .map_err(|e| AppError::ServiceUnavailable(format!("store unavailable: {}", e)))?;

    res.render(Json(serde_json::json!({
        "status": "ok",
        "service": "datasource-hub-backend"
    })));
    Ok(())
}
