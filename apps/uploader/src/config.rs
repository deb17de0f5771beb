use std::{collections::HashMap, fs, path::Path, path::PathBuf};

pub const CONFIG_FILE: &str = "uploader.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub download_dir: PathBuf,
    pub render_delay_ms: u64,
    pub retry_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            download_dir: PathBuf::from("./downloads"),
            render_delay_ms: 1000,
            retry_delay_ms: 2000,
        }
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(CONFIG_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the flat TOML file, then environment.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            Ok(file_cfg) => apply_file_config(&mut settings, &file_cfg),
            Err(err) => tracing::warn!("ignoring unreadable {}: {err}", path.display()),
        }
    }

    if let Some(v) = env("DETECT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__DOWNLOAD_DIR") {
        settings.download_dir = PathBuf::from(v);
    }
    if let Some(v) = env("APP__RENDER_DELAY_MS").and_then(|v| v.parse().ok()) {
        settings.render_delay_ms = v;
    }
    if let Some(v) = env("APP__RETRY_DELAY_MS").and_then(|v| v.parse().ok()) {
        settings.retry_delay_ms = v;
    }

    settings.server_url = normalize_server_url(&settings.server_url);
    settings
}

fn apply_file_config(settings: &mut Settings, file_cfg: &HashMap<String, toml::Value>) {
    if let Some(v) = file_cfg.get("server_url").and_then(toml::Value::as_str) {
        settings.server_url = v.to_string();
    }
    if let Some(v) = file_cfg.get("download_dir").and_then(toml::Value::as_str) {
        settings.download_dir = PathBuf::from(v);
    }
    if let Some(v) = file_cfg.get("render_delay_ms").and_then(as_millis) {
        settings.render_delay_ms = v;
    }
    if let Some(v) = file_cfg.get("retry_delay_ms").and_then(as_millis) {
        settings.retry_delay_ms = v;
    }
}

fn as_millis(value: &toml::Value) -> Option<u64> {
    match value {
        toml::Value::Integer(v) => u64::try_from(*v).ok(),
        toml::Value::String(v) => v.trim().parse().ok(),
        _ => None,
    }
}

pub fn normalize_server_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Settings::default().server_url;
    }
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_without_file_or_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load_settings_from(&dir.path().join(CONFIG_FILE), no_env);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn file_values_apply_and_env_overrides_them() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            "server_url = \"detector.local:8080/\"\ndownload_dir = \"out\"\nrender_delay_ms = 250\nretry_delay_ms = \"500\"\n",
        )
        .expect("write config");

        let settings = load_settings_from(&path, no_env);
        assert_eq!(settings.server_url, "http://detector.local:8080");
        assert_eq!(settings.download_dir, PathBuf::from("out"));
        assert_eq!(settings.render_delay_ms, 250);
        assert_eq!(settings.retry_delay_ms, 500);

        let settings = load_settings_from(&path, |key| match key {
            "APP__SERVER_URL" => Some("https://detector.example".to_string()),
            "APP__RETRY_DELAY_MS" => Some("not-a-number".to_string()),
            _ => None,
        });
        assert_eq!(settings.server_url, "https://detector.example");
        assert_eq!(settings.retry_delay_ms, 500);
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "this is = = not toml").expect("write config");
        assert_eq!(load_settings_from(&path, no_env), Settings::default());
    }

    #[test]
    fn normalizes_server_urls() {
        assert_eq!(normalize_server_url(" localhost:5000/ "), "http://localhost:5000");
        assert_eq!(normalize_server_url("https://a.b/"), "https://a.b");
        assert_eq!(normalize_server_url(""), "http://127.0.0.1:5000");
    }
}
