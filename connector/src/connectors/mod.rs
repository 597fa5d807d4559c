pub mod drive;
pub mod error;
pub mod factory;
pub mod file;
pub mod google_drive;
pub mod microsoft;
pub mod nop;
pub mod onedrive;
pub mod teams;
pub mod traits;
pub mod types;
pub mod web;
pub mod youtube;

pub use error::ConnectorError;
pub use factory::{build, ConnectorContext};
pub use traits::{Connector, TaskSink};
pub use types::*;
