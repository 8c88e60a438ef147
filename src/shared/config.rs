use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub mutation: MutationConfig,
    pub autosave: AutosaveConfig,
    pub pagination: PaginationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub journal_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosaveConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub database_url: String,
    pub storage_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    pub default_take: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "https://bravoadmin.uplms.org/api".to_string(),
                request_timeout_secs: 30,
                language: "az".to_string(),
            },
            mutation: MutationConfig {
                timeout_secs: 30,
                max_retries: 3,
                journal_capacity: 64,
            },
            autosave: AutosaveConfig {
                enabled: true,
                interval_secs: 5,
                database_url: default_database_url(),
                storage_key: "course_draft".to_string(),
            },
            pagination: PaginationConfig { default_take: 10 },
        }
    }
}

impl MutationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AutosaveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlays values returned by `lookup` on top of the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("LMS_API_BASE_URL") {
            let trimmed = v.trim().trim_end_matches('/');
            if !trimmed.is_empty() {
                cfg.api.base_url = trimmed.to_string();
            }
        }
        if let Some(v) = lookup("LMS_API_TIMEOUT_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.api.request_timeout_secs = value;
        }
        if let Some(v) = lookup("LMS_API_LANGUAGE")
            && !v.trim().is_empty()
        {
            cfg.api.language = v.trim().to_string();
        }

        if let Some(v) = lookup("LMS_MUTATION_TIMEOUT_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.mutation.timeout_secs = value;
        }
        if let Some(v) = lookup("LMS_MUTATION_MAX_RETRIES")
            && let Some(value) = parse_u64(&v)
        {
            cfg.mutation.max_retries = u32::try_from(value).unwrap_or(u32::MAX);
        }
        if let Some(v) = lookup("LMS_MUTATION_JOURNAL_CAPACITY")
            && let Some(value) = parse_u64(&v)
        {
            cfg.mutation.journal_capacity = usize::try_from(value).unwrap_or(usize::MAX);
        }

        if let Some(v) = lookup("LMS_AUTOSAVE_ENABLED") {
            cfg.autosave.enabled = parse_bool(&v, cfg.autosave.enabled);
        }
        if let Some(v) = lookup("LMS_AUTOSAVE_INTERVAL_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.autosave.interval_secs = value;
        }
        if let Some(v) = lookup("LMS_AUTOSAVE_DATABASE_URL")
            && !v.trim().is_empty()
        {
            cfg.autosave.database_url = v.trim().to_string();
        }
        if let Some(v) = lookup("LMS_AUTOSAVE_STORAGE_KEY")
            && !v.trim().is_empty()
        {
            cfg.autosave.storage_key = v.trim().to_string();
        }

        if let Some(v) = lookup("LMS_PAGE_TAKE")
            && let Some(value) = parse_u64(&v)
        {
            cfg.pagination.default_take = u32::try_from(value).unwrap_or(u32::MAX);
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.api.base_url.starts_with("http://") || self.api.base_url.starts_with("https://"))
        {
            return Err(format!(
                "API base_url must be an http(s) URL, got {}",
                self.api.base_url
            ));
        }
        if self.api.request_timeout_secs == 0 {
            return Err("API request_timeout_secs must be greater than 0".to_string());
        }
        if self.mutation.timeout_secs == 0 {
            return Err("Mutation timeout_secs must be greater than 0".to_string());
        }
        if self.mutation.journal_capacity == 0 {
            return Err("Mutation journal_capacity must be greater than 0".to_string());
        }
        if self.autosave.enabled && self.autosave.interval_secs == 0 {
            return Err("Autosave interval_secs must be greater than 0".to_string());
        }
        if self.pagination.default_take == 0 {
            return Err("Pagination default_take must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn default_database_url() -> String {
    match dirs::data_dir() {
        Some(dir) => format!(
            "sqlite://{}?mode=rwc",
            dir.join("lms-sync").join("drafts.db").display()
        ),
        None => "sqlite:data/drafts.db?mode=rwc".to_string(),
    }
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}
