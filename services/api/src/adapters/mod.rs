pub mod db;
pub mod listener;
pub mod queries;

pub use db::DbAdapter;
