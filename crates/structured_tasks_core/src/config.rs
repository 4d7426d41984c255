use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::wikitext::{DEFAULT_INTERLANGUAGE_PREFIXES, WikitextOptions};

pub const DEFAULT_MINIMUM_SCORE: f64 = 0.6;
pub const DEFAULT_MAXIMUM_LINKS: usize = 10;
pub const DEFAULT_MINIMUM_LINKS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Desktop,
    Mobile,
}

impl Platform {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "desktop" => Ok(Self::Desktop),
            "mobile" => Ok(Self::Mobile),
            other => bail!("unsupported platform: {other} (expected desktop or mobile)"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct TaskConfig {
    #[serde(default)]
    pub links: LinksSection,
    #[serde(default)]
    pub review: ReviewSection,
    #[serde(default)]
    pub wikitext: WikitextSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct LinksSection {
    pub minimum_score: Option<f64>,
    pub maximum_links_per_task: Option<usize>,
    pub minimum_links_per_task: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ReviewSection {
    pub auto_advance: Option<bool>,
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikitextSection {
    #[serde(default)]
    pub interlanguage_prefixes: Vec<String>,
}

/// Thresholds applied to link suggestions before they reach the matcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkFilter {
    pub minimum_score: f64,
    pub maximum_links: usize,
    pub minimum_links: usize,
}

impl Default for LinkFilter {
    fn default() -> Self {
        Self {
            minimum_score: DEFAULT_MINIMUM_SCORE,
            maximum_links: DEFAULT_MAXIMUM_LINKS,
            minimum_links: DEFAULT_MINIMUM_LINKS,
        }
    }
}

impl TaskConfig {
    /// Resolve link thresholds: env > config > defaults.
    pub fn link_filter(&self) -> Result<LinkFilter> {
        self.link_filter_with_lookup(|key| env::var(key).ok())
    }

    pub fn link_filter_with_lookup<F>(&self, lookup_env: F) -> Result<LinkFilter>
    where
        F: Fn(&str) -> Option<String>,
    {
        let minimum_score = match env_value(&lookup_env, "STRUCTURED_TASKS_MIN_SCORE") {
            Some(value) => value
                .parse::<f64>()
                .with_context(|| format!("invalid STRUCTURED_TASKS_MIN_SCORE: {value}"))?,
            None => self.links.minimum_score.unwrap_or(DEFAULT_MINIMUM_SCORE),
        };
        let maximum_links = match env_value(&lookup_env, "STRUCTURED_TASKS_MAX_LINKS") {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("invalid STRUCTURED_TASKS_MAX_LINKS: {value}"))?,
            None => self
                .links
                .maximum_links_per_task
                .unwrap_or(DEFAULT_MAXIMUM_LINKS),
        };
        let minimum_links = self
            .links
            .minimum_links_per_task
            .unwrap_or(DEFAULT_MINIMUM_LINKS);

        if !(0.0..=1.0).contains(&minimum_score) {
            bail!("minimum_score must be between 0 and 1 (got {minimum_score})");
        }
        if maximum_links == 0 {
            bail!("maximum_links_per_task must be at least 1");
        }
        if minimum_links > maximum_links {
            bail!(
                "minimum_links_per_task ({minimum_links}) exceeds maximum_links_per_task ({maximum_links})"
            );
        }
        Ok(LinkFilter {
            minimum_score,
            maximum_links,
            minimum_links,
        })
    }

    /// Resolve the review platform: env STRUCTURED_TASKS_PLATFORM > config > desktop.
    pub fn platform(&self) -> Result<Platform> {
        self.platform_with_lookup(|key| env::var(key).ok())
    }

    pub fn platform_with_lookup<F>(&self, lookup_env: F) -> Result<Platform>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = env_value(&lookup_env, "STRUCTURED_TASKS_PLATFORM") {
            return Platform::parse(&value);
        }
        match self.review.platform.as_deref() {
            Some(value) => Platform::parse(value),
            None => Ok(Platform::Desktop),
        }
    }

    pub fn auto_advance(&self) -> bool {
        self.review.auto_advance.unwrap_or(true)
    }

    pub fn wikitext_options(&self) -> WikitextOptions {
        if self.wikitext.interlanguage_prefixes.is_empty() {
            return WikitextOptions::default();
        }
        WikitextOptions {
            interlanguage_prefixes: self
                .wikitext
                .interlanguage_prefixes
                .iter()
                .map(|prefix| prefix.trim().to_ascii_lowercase())
                .filter(|prefix| !prefix.is_empty())
                .collect(),
        }
    }
}

fn env_value<F>(lookup_env: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup_env(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Load and parse a TaskConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<TaskConfig> {
    if !config_path.exists() {
        return Ok(TaskConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: TaskConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_default_config() -> String {
    let prefixes = DEFAULT_INTERLANGUAGE_PREFIXES
        .iter()
        .map(|prefix| format!("\"{prefix}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "# structured-tasks configuration (materialized by `structured-tasks init`)\n# Environment overrides: STRUCTURED_TASKS_MIN_SCORE, STRUCTURED_TASKS_MAX_LINKS, STRUCTURED_TASKS_PLATFORM\n\n[links]\nminimum_score = {DEFAULT_MINIMUM_SCORE:?}\nmaximum_links_per_task = {DEFAULT_MAXIMUM_LINKS}\nminimum_links_per_task = {DEFAULT_MINIMUM_LINKS}\n\n[review]\n# Move to the next suggestion after accepting or rejecting one.\nauto_advance = true\n# desktop | mobile\nplatform = \"desktop\"\n\n[wikitext]\n# Link prefixes treated as interlanguage links rather than article links.\ninterlanguage_prefixes = [{prefixes}]\n"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_uses_builtin_thresholds() {
        let config = TaskConfig::default();
        let filter = config.link_filter_with_lookup(|_| None).expect("filter");
        assert_eq!(filter, LinkFilter::default());
        assert!(config.auto_advance());
        assert_eq!(
            config.platform_with_lookup(|_| None).expect("platform"),
            Platform::Desktop
        );
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, TaskConfig::default());
    }

    #[test]
    fn load_config_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[links]
minimum_score = 0.75
maximum_links_per_task = 4

[review]
auto_advance = false
platform = "mobile"

[wikitext]
interlanguage_prefixes = ["DE", "fr"]
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        let filter = config.link_filter_with_lookup(|_| None).expect("filter");
        assert_eq!(filter.minimum_score, 0.75);
        assert_eq!(filter.maximum_links, 4);
        assert_eq!(filter.minimum_links, DEFAULT_MINIMUM_LINKS);
        assert!(!config.auto_advance());
        assert_eq!(
            config.platform_with_lookup(|_| None).expect("platform"),
            Platform::Mobile
        );
        assert_eq!(
            config.wikitext_options().interlanguage_prefixes,
            vec!["de".to_string(), "fr".to_string()]
        );
    }

    #[test]
    fn env_overrides_config_values() {
        let config = TaskConfig {
            links: LinksSection {
                minimum_score: Some(0.9),
                maximum_links_per_task: Some(3),
                minimum_links_per_task: None,
            },
            review: ReviewSection {
                auto_advance: None,
                platform: Some("desktop".to_string()),
            },
            ..TaskConfig::default()
        };
        let env = HashMap::from([
            ("STRUCTURED_TASKS_MIN_SCORE".to_string(), "0.5".to_string()),
            ("STRUCTURED_TASKS_MAX_LINKS".to_string(), " 7 ".to_string()),
            ("STRUCTURED_TASKS_PLATFORM".to_string(), "Mobile".to_string()),
        ]);
        let filter = config
            .link_filter_with_lookup(|key| env.get(key).cloned())
            .expect("filter");
        assert_eq!(filter.minimum_score, 0.5);
        assert_eq!(filter.maximum_links, 7);
        assert_eq!(
            config
                .platform_with_lookup(|key| env.get(key).cloned())
                .expect("platform"),
            Platform::Mobile
        );
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        let env = HashMap::from([(
            "STRUCTURED_TASKS_MIN_SCORE".to_string(),
            "high".to_string(),
        )]);
        let error = TaskConfig::default()
            .link_filter_with_lookup(|key| env.get(key).cloned())
            .expect_err("must fail");
        assert!(error.to_string().contains("STRUCTURED_TASKS_MIN_SCORE"));

        let config = TaskConfig {
            links: LinksSection {
                minimum_score: None,
                maximum_links_per_task: Some(2),
                minimum_links_per_task: Some(3),
            },
            ..TaskConfig::default()
        };
        assert!(config.link_filter_with_lookup(|_| None).is_err());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[links\nminimum_score = 1").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn rendered_default_config_round_trips() {
        let parsed: TaskConfig = toml::from_str(&render_default_config()).expect("parse rendered");
        assert_eq!(parsed.links.minimum_score, Some(DEFAULT_MINIMUM_SCORE));
        assert_eq!(parsed.review.platform.as_deref(), Some("desktop"));
        assert_eq!(
            parsed.wikitext.interlanguage_prefixes.len(),
            DEFAULT_INTERLANGUAGE_PREFIXES.len()
        );
    }

    #[test]
    fn unknown_platform_is_an_error() {
        assert!(Platform::parse("tablet").is_err());
        assert_eq!(Platform::parse(" DESKTOP ").expect("parse"), Platform::Desktop);
    }
}
