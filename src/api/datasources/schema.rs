use salvo::prelude::*;

use super::types::data_source_id;
use crate::utils::{get_app_state, AppError};

#[handler]
pub async fn get_schema(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let id = data_source_id(req)?;

    let schema = state.datasources.schema(id).await?;
    res.render(Json(schema));
    Ok(())
}
