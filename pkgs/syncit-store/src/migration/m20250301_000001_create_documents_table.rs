use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Documents {
    Table,
    Collection,
    DocId,
    Body,
    UpdatedAt,
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000001_create_documents_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Documents::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Documents::Collection).string().not_null())
                    .col(ColumnDef::new(Documents::DocId).string().not_null())
                    .col(ColumnDef::new(Documents::Body).text().not_null())
                    .col(
                        ColumnDef::new(Documents::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(Documents::Collection)
                            .col(Documents::DocId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_documents_collection_updated_at")
                    .table(Documents::Table)
                    .col(Documents::Collection)
                    .col(Documents::UpdatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Documents::Table).to_owned())
            .await
    }
}
