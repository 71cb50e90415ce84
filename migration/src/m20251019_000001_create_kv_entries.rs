use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One table holds every namespace (warranties, sessions, codes, ...).
        // `version` is bumped on each write and backs compare-and-swap.
        manager
            .create_table(
                Table::create()
                    .table(KvEntries::Table)
                    .if_not_exists()
                    .col(string(KvEntries::Namespace))
                    .col(string(KvEntries::Key))
                    .col(text(KvEntries::Value))
                    .col(
                        ColumnDef::new(KvEntries::Version)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(big_integer(KvEntries::UpdatedAt))
                    .primary_key(
                        Index::create()
                            .col(KvEntries::Namespace)
                            .col(KvEntries::Key),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_kv_entries_updated")
                    .table(KvEntries::Table)
                    .col(KvEntries::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(KvEntries::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum KvEntries {
    Table,
    Namespace,
    Key,
    Value,
    Version,
    UpdatedAt,
}
