//! Environment-driven server configuration.

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port for the HTTP/WebSocket listener.
    pub port: u16,
    /// Postgres connection string for the usage-totals sink.
    /// Absent means totals are disabled.
    pub database_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            database_url: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("PORT") {
            match port.parse::<u16>() {
                Ok(parsed) => config.port = parsed,
                Err(_) => {
                    tracing::warn!(value = %port, "Invalid PORT, using default");
                }
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.database_url = Some(url);
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3001);
        assert!(config.database_url.is_none());
    }
}
