pub mod app;
pub mod builders;
pub mod db;

pub use app::{TestApp, TestResponse};
pub use builders::RequestBuilder;
pub use db::TestDb;
