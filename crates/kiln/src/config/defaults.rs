use std::path::PathBuf;

pub fn default_root_directory() -> PathBuf {
    PathBuf::from(".")
}

pub fn default_server_build_path() -> PathBuf {
    PathBuf::from("build/index.html")
}

pub fn default_assets_build_directory() -> PathBuf {
    PathBuf::from("public/build")
}

pub fn default_public_path() -> String {
    "/build/".to_string()
}

pub fn default_dev_server_port() -> u16 {
    8002
}

pub fn default_build_command() -> String {
    "npm run build".to_string()
}

pub fn default_watch_ignore() -> Vec<String> {
    vec![
        "node_modules".to_string(),
        "build".to_string(),
        "public/build".to_string(),
        "*.log".to_string(),
    ]
}

pub fn default_debounce_ms() -> u64 {
    100
}
