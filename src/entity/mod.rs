//! SeaORM entity definitions for PostgreSQL database.

pub mod build;
pub mod project;
pub mod screenshot;
pub mod screenshot_bucket;
pub mod screenshot_diff;
pub mod test_stats_change;
