use sea_orm_migration::prelude::*;

use super::m20240101_000001_init::Transactions;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum Extra {
    Tags,
    RecurrenceFrequency,
    RecurrenceEnd,
    SettledOverride,
}

async fn add_column_once(
    manager: &SchemaManager<'_>,
    name: &str,
    column: &mut ColumnDef,
) -> Result<(), DbErr> {
    if manager.has_column("transactions", name).await? {
        return Ok(());
    }
    manager
        .alter_table(
            Table::alter()
                .table(Transactions::Table)
                .add_column(column)
                .to_owned(),
        )
        .await
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // JSON array of tag strings.
        add_column_once(
            manager,
            "tags",
            ColumnDef::new(Extra::Tags)
                .string()
                .not_null()
                .default("[]"),
        )
        .await?;
        add_column_once(
            manager,
            "recurrence_frequency",
            ColumnDef::new(Extra::RecurrenceFrequency).string(),
        )
        .await?;
        add_column_once(
            manager,
            "recurrence_end",
            ColumnDef::new(Extra::RecurrenceEnd).date(),
        )
        .await?;
        add_column_once(
            manager,
            "settled_override",
            ColumnDef::new(Extra::SettledOverride)
                .boolean()
                .not_null()
                .default(false),
        )
        .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for column in [
            Extra::SettledOverride,
            Extra::RecurrenceEnd,
            Extra::RecurrenceFrequency,
            Extra::Tags,
        ] {
            manager
                .alter_table(
                    Table::alter()
                        .table(Transactions::Table)
                        .drop_column(column)
                        .to_owned(),
                )
                .await?;
        }
        Ok(())
    }
}
