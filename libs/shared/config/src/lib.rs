use std::env;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Supabase,
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub store_backend: StoreBackend,
    /// Enables matching of 1C cell pushes against local applications and the
    /// "already gone upstream" cancellation resolver.
    pub onec_reconciliation_enabled: bool,
    /// Delete a local application when 1C reports its slot freed.
    pub onec_auto_delete_freed: bool,
    pub onec_request_timeout_secs: u64,
    pub slot_cache_ttl_secs: u64,
    pub server_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let supabase_url = env::var("SUPABASE_URL")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_URL not set, using empty value");
                String::new()
            });

        let store_backend = match env::var("SCHEDULING_STORE").ok().as_deref() {
            Some("supabase") => StoreBackend::Supabase,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                warn!("Unknown SCHEDULING_STORE '{}', falling back to memory", other);
                StoreBackend::Memory
            }
            None if !supabase_url.is_empty() => StoreBackend::Supabase,
            None => {
                warn!("SCHEDULING_STORE not set and Supabase not configured, using memory store");
                StoreBackend::Memory
            }
        };

        let config = Self {
            supabase_url,
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            store_backend,
            onec_reconciliation_enabled: env_flag("ONEC_RECONCILIATION_ENABLED", true),
            onec_auto_delete_freed: env_flag("ONEC_AUTO_DELETE_FREED", true),
            onec_request_timeout_secs: env_number("ONEC_REQUEST_TIMEOUT_SECS", 15),
            slot_cache_ttl_secs: env_number("SLOT_CACHE_TTL_SECS", 60),
            server_port: env_number("SERVER_PORT", 3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        let store_ready = match self.store_backend {
            StoreBackend::Supabase => !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty(),
            StoreBackend::Memory => true,
        };

        store_ready && !self.supabase_jwt_secret.is_empty()
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_number<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", key, value);
            default
        }),
        Err(_) => default,
    }
}
