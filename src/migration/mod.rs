//! SeaORM database migrations.

pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_projects;
mod m20260301_000002_create_screenshot_buckets;
mod m20260301_000003_create_builds;
mod m20260301_000005_create_screenshot_diffs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_projects::Migration),
            Box::new(m20260301_000002_create_screenshot_buckets::Migration),
            Box::new(m20260301_000003_create_builds::Migration),
            Box::new(m20260301_000004_create_tests::Migration),
            Box::new(m20260301_000005_create_screenshot_diffs::Migration),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_unique() {
        let names: Vec<String> = Migrator::migrations()
            .iter()
            .map(|m| m.name().to_string())
            .collect();

        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(names, sorted, "migrations must be listed in name order");
    }
}
