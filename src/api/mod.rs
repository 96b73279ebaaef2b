pub mod accounts;
pub mod exports;

pub use accounts::{account_routes, AppState};
pub use exports::export_routes;
