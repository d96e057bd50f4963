use std::time::Duration;

/// Runtime settings, read from the environment with sensible defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root of the mutable project workspace inside a sandbox
    pub workspace_root: String,
    /// Port the sandbox dev server listens on for preview/validation
    pub preview_port: u16,
    /// Base image template used when creating a new sandbox
    pub sandbox_template: String,
    /// Idle lifetime of a pooled sandbox
    pub sandbox_ttl: Duration,
    /// Upper bound on concurrently pooled sandboxes
    pub max_sandboxes: usize,
    /// Model used for generative calls
    pub model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace_root: "/home/user".to_string(),
            preview_port: 5173,
            sandbox_template: "vite-react-base".to_string(),
            sandbox_ttl: Duration::from_secs(30 * 60),
            max_sandboxes: 32,
            model: "gpt-4o".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        Self {
            workspace_root: std::env::var("WEBWRIGHT_WORKSPACE_ROOT")
                .unwrap_or(defaults.workspace_root),
            preview_port: std::env::var("WEBWRIGHT_PREVIEW_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.preview_port),
            sandbox_template: std::env::var("WEBWRIGHT_SANDBOX_TEMPLATE")
                .unwrap_or(defaults.sandbox_template),
            sandbox_ttl: std::env::var("WEBWRIGHT_SANDBOX_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.sandbox_ttl),
            max_sandboxes: std::env::var("WEBWRIGHT_MAX_SANDBOXES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_sandboxes),
            model: std::env::var("WEBWRIGHT_MODEL").unwrap_or(defaults.model),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.workspace_root, "/home/user");
        assert_eq!(settings.preview_port, 5173);
        assert_eq!(settings.sandbox_ttl, Duration::from_secs(1800));
    }
}
