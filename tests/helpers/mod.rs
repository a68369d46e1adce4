pub mod builders;
pub mod db;
pub mod fixtures;

pub use builders::EntityBuilder;
pub use db::TestDb;
pub use fixtures::{blog_engine, blog_state, uid, BLOG_SCHEMA};
