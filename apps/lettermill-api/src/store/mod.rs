//! SQLite persistence: catalog tables, dynamic row tables, and email jobs.

pub mod jobs;
pub mod rows;
pub mod tabs;

pub use jobs::JobStore;
pub use rows::RowStore;
pub use tabs::TabStore;
