pub mod db;
pub mod models;
pub mod repositories;

pub use db::create_pool;
