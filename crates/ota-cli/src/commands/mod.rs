//! Command implementations for ota-cli

pub mod check;
pub mod download;
pub mod info;
pub mod list;
pub mod update;
pub mod upload;

pub use check::check;
pub use download::download;
pub use info::info;
pub use list::list;
pub use update::update;
pub use upload::upload;
