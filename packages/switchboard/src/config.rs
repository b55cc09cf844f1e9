use backplane::BackplaneFileConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

// =============================================================================
// Unified config (figment-deserialized from defaults / switchboard.toml / env vars)
// =============================================================================
//
//   switchboard.toml:  [backplane]
//                      heartbeat_interval_secs = 10
//
//   env var:           SWITCHBOARD_BACKPLANE__HEARTBEAT_INTERVAL_SECS=10
//
//   (double underscore = nesting, single underscore stays within field names)

pub const DEFAULT_CONFIG_FILE: &str = "switchboard.toml";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7070;
pub const DEFAULT_HUB: &str = "chat";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub backplane: BackplaneFileConfig,
}

/// Listener settings (lives under `[server]`). CLI flags take priority.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Hub served on `/ws`
    #[serde(default)]
    pub hub: Option<String>,
}

/// Build a figment that layers: defaults → config file → SWITCHBOARD_* env vars.
///
/// A missing config file is not an error; its layer is simply empty.
pub fn load_config(config_file: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_file))
        .merge(Env::prefixed("SWITCHBOARD_").split("__"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(&tmp.path().join(DEFAULT_CONFIG_FILE))
            .extract()
            .unwrap();
        assert!(fc.server.host.is_none());
        assert!(fc.server.port.is_none());
        assert_eq!(fc.backplane.broadcast_provider, "default");
        assert_eq!(fc.backplane.heartbeat_interval_secs, 30);
    }

    #[test]
    fn test_load_config_from_toml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
[server]
port = 9100
hub = "game"

[backplane]
broadcast_provider_name = "fleet-a"
heartbeat_interval_secs = 5
reap_dead_after_secs = 600
"#,
        )
        .unwrap();

        let fc: FileConfig = load_config(&path).extract().unwrap();
        assert_eq!(fc.server.port, Some(9100));
        assert_eq!(fc.server.hub.as_deref(), Some("game"));
        assert_eq!(fc.backplane.heartbeat_interval_secs, 5);
        // untouched keys keep their defaults
        assert_eq!(fc.backplane.dead_server_timeout_secs, 90);

        let resolved = backplane::BackplaneConfig::from_file(&fc.backplane);
        assert_eq!(resolved.provider, "fleet-a");
        assert_eq!(
            resolved.reap_dead_after,
            Some(std::time::Duration::from_secs(600))
        );
    }

    #[test]
    fn test_load_config_rejects_bad_types() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "[server]\nport = \"not a port\"\n").unwrap();

        let result: Result<FileConfig, _> = load_config(&path).extract();
        assert!(result.is_err());
    }
}
