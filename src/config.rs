use anyhow::{Context, Result};
use std::env;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            _ => Self::Dev,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub server_addr: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,

    // CORS
    pub cors_allow_origins: Vec<String>,

    // Auth
    pub jwt_jwks_url: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwks_cache_ttl_seconds: u64,

    // Outbound notifications
    pub email_service_url: Option<String>,
    pub email_service_token: String,
    pub notification_timeout_seconds: u64,
    pub notification_max_retry_seconds: u64,

    // Quote subsystem
    pub quote_service_url: Option<String>,

    // Invitations
    pub portal_base_url: String,
    pub default_invitation_days: i64,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (the process environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let parsed_or = |key: &str, default: u64| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let env = Environment::from_str(&var_or("ENV", "dev"));
        let server_addr = var_or("SERVER_ADDR", "0.0.0.0:8080");

        // Database
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_connections = parsed_or("DATABASE_MAX_CONNECTIONS", 10) as u32;
        let run_migrations = !matches!(
            var_or("RUN_MIGRATIONS", "true").to_lowercase().as_str(),
            "false" | "0" | "no"
        );

        // CORS
        let cors_allow_origins = var_or("CORS_ALLOW_ORIGINS", "http://localhost:3000")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Auth
        let jwt_jwks_url = lookup("AUTH_JWKS_URL").context("AUTH_JWKS_URL must be set")?;
        validate_url("AUTH_JWKS_URL", &jwt_jwks_url)?;
        let jwt_issuer = lookup("AUTH_JWT_ISSUER").context("AUTH_JWT_ISSUER must be set")?;
        let jwt_audience = var_or("AUTH_JWT_AUDIENCE", "authenticated");
        let jwks_cache_ttl_seconds = parsed_or("JWKS_CACHE_TTL_SECONDS", 1800); // 30 minutes default

        // Outbound notifications (unset URL keeps notifications in-app only)
        let email_service_url = optional_url(&lookup, "EMAIL_SERVICE_URL")?;
        let email_service_token = var_or("EMAIL_SERVICE_TOKEN", "");
        let notification_timeout_seconds = parsed_or("NOTIFICATION_TIMEOUT_SECONDS", 10);
        let notification_max_retry_seconds = parsed_or("NOTIFICATION_MAX_RETRY_SECONDS", 30);

        let quote_service_url = optional_url(&lookup, "QUOTE_SERVICE_URL")?;

        let portal_base_url = var_or("PORTAL_BASE_URL", "http://localhost:3000");
        validate_url("PORTAL_BASE_URL", &portal_base_url)?;
        let default_invitation_days = parsed_or("DEFAULT_INVITATION_DAYS", 7).max(1) as i64;

        Ok(Settings {
            env,
            server_addr,
            database_url,
            database_max_connections,
            run_migrations,
            cors_allow_origins,
            jwt_jwks_url,
            jwt_issuer,
            jwt_audience,
            jwks_cache_ttl_seconds,
            email_service_url,
            email_service_token,
            notification_timeout_seconds,
            notification_max_retry_seconds,
            quote_service_url,
            portal_base_url: portal_base_url.trim_end_matches('/').to_string(),
            default_invitation_days,
        })
    }
}

fn validate_url(key: &str, value: &str) -> Result<()> {
    Url::parse(value).with_context(|| format!("{key} is not a valid URL"))?;
    Ok(())
}

fn optional_url<F>(lookup: &F, key: &str) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|s| s.trim().to_string()) {
        Some(value) if !value.is_empty() => {
            validate_url(key, &value)?;
            Ok(Some(value.trim_end_matches('/').to_string()))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("DATABASE_URL", "postgres://localhost/ff"),
        ("AUTH_JWKS_URL", "https://auth.example.com/.well-known/jwks.json"),
        ("AUTH_JWT_ISSUER", "https://auth.example.com"),
    ];

    #[test]
    fn defaults_apply_when_only_required_values_are_set() {
        let settings = Settings::from_lookup(lookup_from(REQUIRED)).unwrap();

        assert_eq!(settings.env, Environment::Dev);
        assert_eq!(settings.server_addr, "0.0.0.0:8080");
        assert_eq!(settings.database_max_connections, 10);
        assert!(settings.run_migrations);
        assert_eq!(settings.jwt_audience, "authenticated");
        assert_eq!(settings.email_service_url, None);
        assert_eq!(settings.quote_service_url, None);
        assert_eq!(settings.default_invitation_days, 7);
        assert_eq!(settings.cors_allow_origins, vec!["http://localhost:3000"]);
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = Settings::from_lookup(lookup_from(&REQUIRED[1..])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn invalid_email_service_url_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("EMAIL_SERVICE_URL", "not a url"));
        let err = Settings::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("EMAIL_SERVICE_URL"));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend_from_slice(&[
            ("ENV", "production"),
            ("RUN_MIGRATIONS", "false"),
            ("CORS_ALLOW_ORIGINS", "https://a.example.com, https://b.example.com,"),
            ("EMAIL_SERVICE_URL", "https://mail.example.com/send/"),
            ("DEFAULT_INVITATION_DAYS", "14"),
        ]);
        let settings = Settings::from_lookup(lookup_from(&pairs)).unwrap();

        assert_eq!(settings.env, Environment::Prod);
        assert!(!settings.run_migrations);
        assert_eq!(settings.cors_allow_origins.len(), 2);
        assert_eq!(
            settings.email_service_url.as_deref(),
            Some("https://mail.example.com/send")
        );
        assert_eq!(settings.default_invitation_days, 14);
    }
}
