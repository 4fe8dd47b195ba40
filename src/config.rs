use std::path::PathBuf;

use anyhow::{bail, Context};

use crate::auth::MIN_SECRET_LEN;
use crate::slug::DEFAULT_SLUG_LEN;

/// Process configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub port: u16,
    pub frontend_url: Option<String>,
    pub database_url: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub slug_length: usize,
    /// Startup refill triggers below this many unused identifiers.
    pub pool_low_watermark: usize,
    pub pool_refill_batch: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        fn parse<T: std::str::FromStr>(
            get: &impl Fn(&str) -> Option<String>,
            name: &str,
            default: T,
        ) -> anyhow::Result<T>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            match get(name) {
                Some(v) => v.parse().with_context(|| format!("invalid {name}: {v:?}")),
                None => Ok(default),
            }
        }

        match get("JWT_SECRET") {
            None => bail!("JWT_SECRET must be set"),
            Some(s) if s.len() < MIN_SECRET_LEN => {
                bail!("JWT_SECRET must be at least {MIN_SECRET_LEN} characters long")
            }
            Some(_) => {}
        }

        let slug_length: usize = parse(&get, "SLUG_LENGTH", DEFAULT_SLUG_LEN)?;
        if slug_length == 0 {
            bail!("SLUG_LENGTH must be positive");
        }

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&get, "PORT", 8080)?,
            frontend_url: get("FRONTEND_URL"),
            database_url: get("DATABASE_URL"),
            data_dir: get("COMMIC8_DATA_DIR").map(PathBuf::from),
            slug_length,
            pool_low_watermark: parse(&get, "POOL_LOW_WATERMARK", 100)?,
            pool_refill_batch: parse(&get, "POOL_REFILL_BATCH", 1000)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k: &str| map.get(k).cloned()
    }

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn defaults_apply() {
        let cfg = AppConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET)])).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.slug_length, DEFAULT_SLUG_LEN);
        assert_eq!(cfg.pool_refill_batch, 1000);
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn short_or_missing_secret_is_rejected() {
        assert!(AppConfig::from_lookup(lookup(&[])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("JWT_SECRET", "short")])).is_err());
    }

    #[test]
    fn bad_numbers_are_reported() {
        let err = AppConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET), ("PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
        assert!(AppConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET), ("SLUG_LENGTH", "0")])).is_err());
    }
}
