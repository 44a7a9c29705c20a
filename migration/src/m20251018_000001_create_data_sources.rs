use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DataSources::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DataSources::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DataSources::Name).text().not_null())
                    .col(ColumnDef::new(DataSources::Description).text())
                    .col(ColumnDef::new(DataSources::SourceType).text().not_null())
                    .col(
                        ColumnDef::new(DataSources::Status)
                            .text()
                            .not_null()
                            .default("CONFIGURING"),
                    )
                    .col(
                        ColumnDef::new(DataSources::ConnectionConfig)
                            .json_binary()
                            .not_null(),
                    )
                    // base64(nonce || AES-256-GCM ciphertext), never plaintext
                    .col(ColumnDef::new(DataSources::EncryptedCredentials).text())
                    .col(
                        ColumnDef::new(DataSources::CredentialFields)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'[]'::jsonb")),
                    )
                    .col(ColumnDef::new(DataSources::ConnectionError).text())
                    .col(ColumnDef::new(DataSources::LastConnectionTest).timestamp_with_time_zone())
                    .col(ColumnDef::new(DataSources::LastSuccessfulSync).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(DataSources::TotalRecords)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DataSources::TotalSyncs)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DataSources::FailedSyncs)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DataSources::SuccessfulTests)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(DataSources::AvgResponseTime).double())
                    .col(
                        ColumnDef::new(DataSources::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DataSources::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_data_sources_type_status")
                    .table(DataSources::Table)
                    .col(DataSources::SourceType)
                    .col(DataSources::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DataSources::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum DataSources {
    Table,
    Id,
    Name,
    Description,
    SourceType,
    Status,
    ConnectionConfig,
    EncryptedCredentials,
    CredentialFields,
    ConnectionError,
    LastConnectionTest,
    LastSuccessfulSync,
    TotalRecords,
    TotalSyncs,
    FailedSyncs,
    SuccessfulTests,
    AvgResponseTime,
    CreatedAt,
    UpdatedAt,
}
