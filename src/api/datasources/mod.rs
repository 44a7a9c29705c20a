pub mod connection;
pub mod crud;
pub mod schema;
pub mod sync;
pub mod types;

use salvo::prelude::*;

pub fn datasource_routes() -> Router {
    Router::new()
        .push(
            Router::with_path("/data-sources")
                .get(crud::list_data_sources)
                .post(crud::create_data_source),
        )
        .push(
            Router::with_path("/data-sources/{id}")
                .get(crud::get_data_source)
                .put(crud::update_data_source)
                .delete(crud::delete_data_source),
        )
        .push(
            Router::with_path("/data-sources/{id}/test")
                .post(connection::test_connection)
                .delete(connection::cancel_test),
        )
        .push(Router::with_path("/data-sources/{id}/schema").get(schema::get_schema))
        .push(Router::with_path("/data-sources/{id}/sync").post(sync::start_sync))
        .push(Router::with_path("/data-sources/{id}/sync-logs").get(sync::list_sync_logs))
        .push(Router::with_path("/data-sources/{id}/disconnect").post(crud::disconnect_data_source))
        // Test arbitrary config
        .push(Router::with_path("/test-connection").post(connection::test_connection_with_config))
}
