use sea_orm::{ConnectionTrait, Statement};
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

const DEFAULTS: &[(&str, &str)] = &[
    ("Salary", "income"),
    ("Bonus", "income"),
    ("Investment", "income"),
    ("Other", "income"),
    ("Dining", "expense"),
    ("Shopping", "expense"),
    ("Entertainment", "expense"),
    ("Transport", "expense"),
    ("Other", "expense"),
];

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        let backend = db.get_database_backend();
        for (name, kind) in DEFAULTS {
            db.execute(Statement::from_sql_and_values(
                backend,
                "INSERT INTO categories (name, kind) VALUES (?, ?) ON CONFLICT DO NOTHING;",
                [(*name).into(), (*kind).into()],
            ))
            .await?;
        }
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        let backend = db.get_database_backend();
        for (name, kind) in DEFAULTS {
            // Categories already in use stay.
            db.execute(Statement::from_sql_and_values(
                backend,
                "DELETE FROM categories WHERE name = ? AND kind = ? \
                 AND id NOT IN (SELECT category_id FROM transactions \
                 WHERE category_id IS NOT NULL);",
                [(*name).into(), (*kind).into()],
            ))
            .await?;
        }
        Ok(())
    }
}
