use salvo::prelude::*;
use serde_json::Value;

use super::types::{data_source_id, test_timeout, CancelTestResponse};
use crate::models::NewDataSource;
use crate::utils::{get_app_state, AppError};

/// Test a stored data source. A failed test is still a 200 with
/// `success: false`; the data source moves to `ERROR`.
#[handler]
pub async fn test_connection(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let id = data_source_id(req)?;
    let timeout = test_timeout(req)?;

    let result = state.datasources.test_connection(id, timeout).await?;
    res.render(Json(result));
    Ok(())
}

#[handler]
pub async fn cancel_test(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let id = data_source_id(req)?;

    let cancelled = state.datasources.cancel_test(id).await?;
    res.render(Json(CancelTestResponse { cancelled }));
    Ok(())
}

/// Test a configuration that has not been saved.
#[handler]
pub async fn test_connection_with_config(
    req: &mut Request,
    res: &mut Response,
    depot: &mut Depot,
) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let timeout = test_timeout(req)?;
    let body: Value = req
        .parse_json()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON: {}", e)))?;

    let result = state
        .datasources
        .test_unsaved(NewDataSource::from_body(body)?, timeout)
        .await?;
    res.render(Json(result));
    Ok(())
}
