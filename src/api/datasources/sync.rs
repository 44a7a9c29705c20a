use salvo::prelude::*;

use super::types::{data_source_id, SyncAccepted};
use crate::utils::{get_app_state, AppError};

/// Queue a sync. The run continues after the response is sent.
#[handler]
pub async fn start_sync(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let id = data_source_id(req)?;

    let ticket = state.datasources.start_sync(id).await?;
    res.status_code(StatusCode::ACCEPTED);
    res.render(Json(SyncAccepted {
        job_id: ticket.job_id,
        data_source_id: ticket.data_source_id,
    }));
    Ok(())
}

#[handler]
pub async fn list_sync_logs(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let id = data_source_id(req)?;
    let limit = match req.query::<String>("limit") {
        Some(raw) => Some(
            raw.trim()
                .parse::<i64>()
                .map_err(|_| AppError::Validation(format!("limit must be a number, got '{}'", raw)))?,
        ),
        None => None,
    };

    let logs = state.datasources.sync_logs(id, limit).await?;
    res.render(Json(logs));
    Ok(())
}
