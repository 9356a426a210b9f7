//! Environment-driven configuration (spec.md §6's "Environment surface").
//!
//! The teacher loads one TOML file and validates it before opening any
//! ports; this gateway's external interface is environment-variable driven
//! instead, but keeps the same "fail fast on a nonsensical config" posture —
//! [`Config::load`] is the single entry point `main` calls before the state
//! store or listener exist.

use std::path::PathBuf;

use anyhow::Context;

/// Which backend the state store prefers (spec.md §4.1). The non-preferred
/// backend is always kept around as the fallback — this only decides write
/// order and which one `Load` tries first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourcePreference {
    Redis,
    Filesystem,
}

impl std::str::FromStr for DataSourcePreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "filesystem" | "file" => Ok(Self::Filesystem),
            other => anyhow::bail!("DATA_SOURCE_PREFERENCE must be 'redis' or 'filesystem', got '{other}'"),
        }
    }
}

/// Connection parameters for the networked backend (spec.md §4.1, §6).
#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
    pub tls: bool,
}

/// Per-vendor router mount toggles (`ENABLE_<VENDOR>_ROUTES`). All default to
/// enabled so a fresh checkout serves every vendor-shaped surface spec.md §6
/// describes; operators narrow the attack surface by disabling what they
/// don't need.
#[derive(Debug, Clone)]
pub struct VendorRoutes {
    pub openai: bool,
    pub azure: bool,
    pub anthropic: bool,
    pub gemini: bool,
    pub groq: bool,
    pub openrouter: bool,
    pub ollama: bool,
}

impl Default for VendorRoutes {
    fn default() -> Self {
        Self {
            openai: true,
            azure: true,
            anthropic: true,
            gemini: true,
            groq: true,
            openrouter: true,
            ollama: true,
        }
    }
}

/// Admin bootstrap identity (spec.md §6's `DEFAULT_ADMIN_USER_ID` /
/// `DEFAULT_ADMIN_API_KEY`). When both are set and no user with that id
/// exists yet, `main` seeds one admin key at startup so a fresh deployment
/// has a way in.
#[derive(Debug, Clone)]
pub struct AdminBootstrap {
    pub user_id: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_source_preference: DataSourcePreference,
    pub redis: Option<RedisSettings>,
    pub vendor_routes: VendorRoutes,
    pub admin_bootstrap: Option<AdminBootstrap>,
    pub log_level: Option<String>,
    /// Directory the file backend's three documents live under. Defaults to
    /// the process CWD per spec.md §6's "Persisted layout".
    pub data_dir: PathBuf,
    /// Capacity of the in-memory traffic log (ambient addition, SPEC_FULL §10).
    pub traffic_log_capacity: usize,
}

impl Config {
    /// Reads every recognized environment variable, applies defaults, and
    /// validates the combination before returning. Invalid configuration
    /// (e.g. `DATA_SOURCE_PREFERENCE=redis` with no `REDIS_URL`) fails fast
    /// rather than falling back silently — matching the teacher's
    /// `Config::load`'s "parse then validate" contract.
    pub fn load() -> anyhow::Result<Self> {
        let port = env_parsed("PORT", 8080u16)?;

        let data_source_preference = std::env::var("DATA_SOURCE_PREFERENCE")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or(DataSourcePreference::Filesystem);

        let redis = redis_settings_from_env()?;

        if matches!(data_source_preference, DataSourcePreference::Redis) && redis.is_none() {
            anyhow::bail!("DATA_SOURCE_PREFERENCE=redis requires REDIS_URL to be set");
        }

        let vendor_routes = VendorRoutes {
            openai: vendor_flag("ENABLE_OPENAI_ROUTES", true)?,
            azure: vendor_flag("ENABLE_AZURE_ROUTES", true)?,
            anthropic: vendor_flag("ENABLE_ANTHROPIC_ROUTES", true)?,
            gemini: vendor_flag("ENABLE_GEMINI_ROUTES", true)?,
            groq: vendor_flag("ENABLE_GROQ_ROUTES", true)?,
            openrouter: vendor_flag("ENABLE_OPENROUTER_ROUTES", true)?,
            ollama: vendor_flag("ENABLE_OLLAMA_ROUTES", true)?,
        };

        let admin_bootstrap = match (
            std::env::var("DEFAULT_ADMIN_USER_ID").ok().filter(|s| !s.is_empty()),
            std::env::var("DEFAULT_ADMIN_API_KEY").ok().filter(|s| !s.is_empty()),
        ) {
            (Some(user_id), Some(api_key)) => Some(AdminBootstrap { user_id, api_key }),
            (None, None) => None,
            _ => anyhow::bail!(
                "DEFAULT_ADMIN_USER_ID and DEFAULT_ADMIN_API_KEY must be set together, or not at all"
            ),
        };

        let log_level = std::env::var("LOG_LEVEL").ok().filter(|s| !s.is_empty());

        let data_dir = std::env::var("LMG_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let traffic_log_capacity = env_parsed("LMG_TRAFFIC_LOG_CAPACITY", 500usize)?;

        Ok(Self {
            port,
            data_source_preference,
            redis,
            vendor_routes,
            admin_bootstrap,
            log_level,
            data_dir,
            traffic_log_capacity,
        })
    }
}

fn redis_settings_from_env() -> anyhow::Result<Option<RedisSettings>> {
    let Some(url) = std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    Ok(Some(RedisSettings {
        url,
        username: std::env::var("REDIS_USERNAME").ok().filter(|s| !s.is_empty()),
        password: std::env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty()),
        db: env_parsed("REDIS_DB", 0i64)?,
        tls: vendor_flag("REDIS_TLS", false)?,
    }))
}

fn vendor_flag(var: &str, default: bool) -> anyhow::Result<bool> {
    match std::env::var(var).ok().filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => anyhow::bail!("{var} must be 'true' or 'false', got '{other}'"),
        },
    }
}

fn env_parsed<T: std::str::FromStr>(var: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(var).ok().filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e| anyhow::anyhow!("{var}: {e}")).with_context(|| format!("parsing {var}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn data_source_preference_parses_case_insensitively() {
        assert_eq!(DataSourcePreference::from_str("Redis").unwrap(), DataSourcePreference::Redis);
        assert_eq!(DataSourcePreference::from_str("FILESYSTEM").unwrap(), DataSourcePreference::Filesystem);
        assert!(DataSourcePreference::from_str("carrier-pigeon").is_err());
    }

    #[test]
    fn vendor_routes_default_to_enabled() {
        let routes = VendorRoutes::default();
        assert!(routes.openai && routes.azure && routes.anthropic && routes.gemini);
        assert!(routes.groq && routes.openrouter && routes.ollama);
    }
}
