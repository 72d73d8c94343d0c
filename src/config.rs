use std::collections::HashSet;
use std::path::PathBuf;

/// Runtime configuration, read once from the environment at startup.
///
/// Upstream origins and the OIDC JWKS URL carry production defaults and are
/// plain fields so integration tests can point them at local doubles.
#[derive(Debug, Clone)]
pub struct Config {
    /// HS256 signing secret for identity tokens. Required.
    pub secret: String,
    /// Server-held provider keys. A missing key disables identity-token
    /// requests for that provider (native keys still pass through).
    pub openai_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    /// Emails allowed to call the /admin endpoints.
    pub admin_emails: HashSet<String>,
    /// Bind address.
    pub listen: String,
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Upstream origins (no trailing slash).
    pub openai_base: String,
    pub openrouter_base: String,
    pub gemini_base: String,
    /// JWKS document of the OIDC issuer that signs login credentials.
    pub oidc_certs_url: String,
}

impl Config {
    /// Read configuration from the environment.
    ///
    /// Fails when `AIPIPE_SECRET` is absent; everything else has a default
    /// or is optional.
    pub fn from_env() -> anyhow::Result<Self> {
        let secret = std::env::var("AIPIPE_SECRET")
            .map_err(|_| anyhow::anyhow!("AIPIPE_SECRET must be set"))?;

        let mut config = Self::with_secret(secret);
        config.openai_api_key = env_opt("OPENAI_API_KEY");
        config.openrouter_api_key = env_opt("OPENROUTER_API_KEY");
        config.gemini_api_key = env_opt("GEMINI_API_KEY");
        if let Ok(raw) = std::env::var("ADMIN_EMAILS") {
            config.admin_emails = parse_admin_emails(&raw);
        }
        if let Ok(listen) = std::env::var("AIPIPE_LISTEN") {
            config.listen = listen;
        }
        if let Ok(path) = std::env::var("AIPIPE_DB") {
            config.db_path = PathBuf::from(path);
        }
        Ok(config)
    }

    /// A config with production upstream defaults and the given secret.
    /// Used by tests, which then override the origins.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            openai_api_key: None,
            openrouter_api_key: None,
            gemini_api_key: None,
            admin_emails: HashSet::new(),
            listen: "0.0.0.0:8787".to_string(),
            db_path: PathBuf::from("aipipe.sqlite3"),
            openai_base: "https://api.openai.com".to_string(),
            openrouter_base: "https://openrouter.ai".to_string(),
            gemini_base: "https://generativelanguage.googleapis.com".to_string(),
            oidc_certs_url: "https://www.googleapis.com/oauth2/v3/certs".to_string(),
        }
    }

}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Parse the `ADMIN_EMAILS` value: comma and/or whitespace separated.
fn parse_admin_emails(raw: &str) -> HashSet<String> {
    raw.split([',', ' ', '\t', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_admin_emails_commas_and_whitespace() {
        let set = parse_admin_emails("a@x.com, b@y.com\n c@z.com");
        assert_eq!(set.len(), 3);
        assert!(set.contains("a@x.com"));
        assert!(set.contains("b@y.com"));
        assert!(set.contains("c@z.com"));
    }

    #[test]
    fn test_parse_admin_emails_lowercases() {
        let set = parse_admin_emails("Admin@Example.COM");
        assert!(set.contains("admin@example.com"));
    }

    #[test]
    fn test_parse_admin_emails_empty() {
        assert!(parse_admin_emails("").is_empty());
        assert!(parse_admin_emails(" , ").is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = Config::with_secret("s");
        assert_eq!(config.openai_base, "https://api.openai.com");
        assert_eq!(config.openrouter_base, "https://openrouter.ai");
        assert!(config.listen.ends_with(":8787"));
    }
}
