pub mod backup;
pub mod data_access;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod models;
pub mod profiles;
pub mod settings;

pub use backup::*;
pub use data_access::DataAccess;
pub use errors::*;
pub use events::*;
pub use lifecycle::*;
pub use models::*;
pub use profiles::*;
pub use settings::{memory::MemorySettings, SettingsStore};
