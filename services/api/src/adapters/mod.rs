pub mod db;
pub mod roster;

pub use db::DbAdapter;
pub use roster::PgRoster;
