//! Project settings (`strata.toml`)

use anyhow::{Context, Result};
use declarative::{DriftPolicy, ExecuteOptions, PollConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            backoff_factor: defaults.backoff_factor,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        let defaults = PollConfig::default();
        Self {
            interval_ms: defaults.interval.as_millis() as u64,
            timeout_ms: defaults.timeout.as_millis() as u64,
        }
    }
}

/// Settings for one project directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Resources changed in parallel
    pub jobs: usize,
    /// Directory for the state file, relative to the project
    pub state_path: Option<String>,
    pub drift: DriftPolicy,
    /// Schema files loaded into the registry, relative to the project
    pub schemas: Vec<String>,
    /// Inventory file of the simulated cloud
    pub cloud_path: Option<String>,
    pub retry: RetrySettings,
    pub poll: PollSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jobs: ExecuteOptions::default().jobs,
            state_path: None,
            drift: DriftPolicy::default(),
            schemas: vec!["schemas.toml".to_string()],
            cloud_path: None,
            retry: RetrySettings::default(),
            poll: PollSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        if settings.jobs == 0 {
            anyhow::bail!("{}: jobs must be at least 1", path.display());
        }
        let factor = settings.retry.backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            anyhow::bail!(
                "{}: retry.backoff_factor must be a finite number of at least 1.0, got {factor}",
                path.display()
            );
        }
        Ok(settings)
    }

    pub fn execute_options(&self, jobs: Option<usize>) -> ExecuteOptions {
        ExecuteOptions {
            jobs: jobs.unwrap_or(self.jobs).max(1),
            retry: RetryConfig {
                max_attempts: self.retry.max_attempts,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
                backoff_factor: self.retry.backoff_factor,
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
            },
            poll: PollConfig {
                interval: Duration::from_millis(self.poll.interval_ms),
                timeout: Duration::from_millis(self.poll.timeout_ms),
            },
            ..ExecuteOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::load(&temp.path().join("strata.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.execute_options(None).jobs, 4);
    }

    #[test]
    fn test_partial_settings() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("strata.toml");
        fs::write(
            &path,
            r#"
jobs = 8
drift = "reconcile"

[retry]
max_attempts = 6
base_delay_ms = 250
"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.drift, DriftPolicy::Reconcile);
        let options = settings.execute_options(Some(2));
        assert_eq!(options.jobs, 2);
        assert_eq!(options.retry.max_attempts, 6);
        assert_eq!(options.retry.base_delay, Duration::from_millis(250));
        assert_eq!(options.retry.backoff_factor, 2.0);
        assert_eq!(options.poll, PollConfig::default());
    }

    #[test]
    fn test_zero_jobs_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("strata.toml");
        fs::write(&path, "jobs = 0\n").unwrap();
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn test_bad_backoff_factor_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("strata.toml");
        for factor in ["-2.0", "0.5", "nan", "inf"] {
            fs::write(&path, format!("[retry]\nbackoff_factor = {factor}\n")).unwrap();
            let err = Settings::load(&path).unwrap_err();
            assert!(err.to_string().contains("backoff_factor"), "{factor}: {err}");
        }

        fs::write(&path, "[retry]\nbackoff_factor = 1.0\n").unwrap();
        assert!(Settings::load(&path).is_ok());
    }
}
