use salvo::prelude::*;
use serde_json::Value;

use super::types::{data_source_id, list_filter, DeleteResponse};
use crate::models::{DataSourceChanges, NewDataSource};
use crate::utils::{get_app_state, AppError};

#[handler]
pub async fn list_data_sources(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let filter = list_filter(req)?;

    let data_sources = state.datasources.list(&filter).await?;
    res.render(Json(data_sources));
    Ok(())
}

#[handler]
pub async fn create_data_source(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let body: Value = req
        .parse_json()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON: {}", e)))?;

    let data_source = state.datasources.create(NewDataSource::from_body(body)?).await?;
    res.status_code(StatusCode::CREATED);
    res.render(Json(data_source));
    Ok(())
}

#[handler]
pub async fn get_data_source(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let id = data_source_id(req)?;

    let detail = state.datasources.detail(id).await?;
    res.render(Json(detail));
    Ok(())
}

#[handler]
pub async fn update_data_source(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let id = data_source_id(req)?;
    let body: Value = req
        .parse_json()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON: {}", e)))?;

    let data_source = state.datasources.update(id, DataSourceChanges::from_body(body)?).await?;
    res.render(Json(data_source));
    Ok(())
}

#[handler]
pub async fn delete_data_source(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let id = data_source_id(req)?;

    state.datasources.delete(id).await?;
    res.render(Json(DeleteResponse { deleted: true, id }));
    Ok(())
}

#[handler]
pub async fn disconnect_data_source(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let id = data_source_id(req)?;

    let data_source = state.datasources.disconnect(id).await?;
    res.render(Json(data_source));
    Ok(())
}
