use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration, environment-driven with defaults:
///
/// - `WAYGATE_BIND_ADDR`      (default: "0.0.0.0")
/// - `WAYGATE_PORT`           (default: "8787")
/// - `WAYGATE_DATA_DIR`       (default: "data")
/// - `WAYGATE_INTERNAL_SECRET` (no default; internal plane refuses all
///   requests while unset)
/// - `WAYGATE_PUBLIC_URL`     (default: "http://localhost:<port>")
/// - `WAYGATE_ROOM_IDLE_SECS` (default: "60")
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub internal_secret: String,
    pub public_url: String,
    pub room_idle_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let bind_addr =
            env::var("WAYGATE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env_or("WAYGATE_PORT", 8787u16);
        let data_dir = PathBuf::from(
            env::var("WAYGATE_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
        );
        let internal_secret = env::var("WAYGATE_INTERNAL_SECRET").unwrap_or_default();
        let public_url = env::var("WAYGATE_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port));
        let room_idle_secs = env_or("WAYGATE_ROOM_IDLE_SECS", 60u64);

        Self {
            bind_addr,
            port,
            data_dir,
            internal_secret,
            public_url,
            room_idle_secs,
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn room_idle(&self) -> Duration {
        Duration::from_secs(self.room_idle_secs)
    }

    /// The WebSocket URL advertised to clients for a freshly created room.
    pub fn ws_url(&self, room_code: &str) -> String {
        let base = self.public_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{base}/v1/rooms/{room_code}/ws")
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => match value.parse() {
            Ok(parsed) => parsed,
            Err(err) => panic!("Invalid {key}: {err}"),
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            bind_addr: "127.0.0.1".into(),
            port: 8787,
            data_dir: "data".into(),
            internal_secret: String::new(),
            public_url: "http://localhost:8787".into(),
            room_idle_secs: 60,
        }
    }

    #[test]
    fn ws_url_swaps_schemes() {
        let mut config = base_config();
        assert_eq!(config.ws_url("HQK3"), "ws://localhost:8787/v1/rooms/HQK3/ws");

        config.public_url = "https://relay.example.com/".into();
        assert_eq!(
            config.ws_url("HQK3"),
            "wss://relay.example.com/v1/rooms/HQK3/ws"
        );
    }
}
