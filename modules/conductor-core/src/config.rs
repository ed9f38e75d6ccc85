use std::env;

/// Router configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Message bus
    pub amqp_url: String,

    // Harbor registry
    pub harbor_url: String,
    pub harbor_user: String,
    pub harbor_password: String,

    // Vault (route storage)
    pub vault_url: String,
    pub vault_token: String,

    // Redis (runtime train state)
    pub redis_host: String,

    // Behavior flags
    pub auto_start: bool,
    pub demonstration_mode: bool,

    // Interop registry (cross-registry transfer, optional)
    pub interop_registry_url: Option<String>,
    pub interop_registry_user: Option<String>,
    pub interop_registry_password: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            amqp_url: required_env("AMQP_URL"),
            harbor_url: required_env("HARBOR_URL")
                .trim_end_matches('/')
                .to_string(),
            harbor_user: required_env("HARBOR_USER"),
            harbor_password: required_env("HARBOR_PW"),
            vault_url: required_env("VAULT_URL").trim_end_matches('/').to_string(),
            vault_token: required_env("VAULT_TOKEN"),
            redis_host: required_env("REDIS_HOST"),
            auto_start: flag_env("AUTO_START"),
            demonstration_mode: flag_env("DEMONSTRATION_MODE"),
            interop_registry_url: env::var("INTEROP_REGISTRY_URL").ok(),
            interop_registry_user: env::var("INTEROP_REGISTRY_USER").ok(),
            interop_registry_password: env::var("INTEROP_REGISTRY_PASSWORD").ok(),
        }
    }

    /// Log the presence and length of each sensitive variable for debugging,
    /// never the value itself.
    pub fn log_redacted(&self) {
        let vars = [
            ("AMQP_URL", &self.amqp_url),
            ("HARBOR_URL", &self.harbor_url),
            ("HARBOR_USER", &self.harbor_user),
            ("HARBOR_PW", &self.harbor_password),
            ("VAULT_URL", &self.vault_url),
            ("VAULT_TOKEN", &self.vault_token),
            ("REDIS_HOST", &self.redis_host),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
        tracing::info!(
            auto_start = self.auto_start,
            demonstration_mode = self.demonstration_mode,
            "Behavior flags"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn flag_env(key: &str) -> bool {
    env::var(key).map(|v| v == "true").unwrap_or(false)
}
