use sea_orm_migration::prelude::*;

use super::m20251018_000001_create_data_sources::DataSources;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncLogs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncLogs::DataSourceId).uuid().not_null())
                    .col(ColumnDef::new(SyncLogs::Success).boolean().not_null())
                    .col(
                        ColumnDef::new(SyncLogs::RecordsSync)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncLogs::DurationMs).big_integer().not_null())
                    .col(ColumnDef::new(SyncLogs::ErrorMessage).text())
                    .col(
                        ColumnDef::new(SyncLogs::FailedBatches)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncLogs::Cursor).json_binary())
                    .col(
                        ColumnDef::new(SyncLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_logs_data_source")
                            .from(SyncLogs::Table, SyncLogs::DataSourceId)
                            .to(DataSources::Table, DataSources::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_logs_data_source_created")
                    .table(SyncLogs::Table)
                    .col(SyncLogs::DataSourceId)
                    .col(SyncLogs::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncLogs::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum SyncLogs {
    Table,
    Id,
    DataSourceId,
    Success,
    RecordsSync,
    DurationMs,
    ErrorMessage,
    FailedBatches,
    Cursor,
    CreatedAt,
}
