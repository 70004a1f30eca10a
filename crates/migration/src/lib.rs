pub use sea_orm_migration::prelude::*;

mod m20240101_000001_init;
mod m20240301_000001_tags_recurrence;
mod m20240415_000001_default_categories;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_init::Migration),
            Box::new(m20240301_000001_tags_recurrence::Migration),
            Box::new(m20240415_000001_default_categories::Migration),
        ]
    }
}
