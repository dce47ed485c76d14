use cairn_core::data_access::GLOBAL_SETTINGS_FILE;
use directories::ProjectDirs;
use std::path::PathBuf;

pub fn data_root() -> PathBuf {
    if let Some(pd) = ProjectDirs::from("com", "cairn", "Cairn") {
        pd.data_dir().join("user-settings")
    } else {
        // Fallback: current dir
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join("user-settings")
    }
}

pub fn default_settings_file() -> PathBuf {
    data_root().join(GLOBAL_SETTINGS_FILE)
}
