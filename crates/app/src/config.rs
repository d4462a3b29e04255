use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use cartledger_core::{default_categories, Category, Money, Provider};
use cartledger_reconcile::{CategoryRule, ProviderSettings, RuleClassifier};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "cartledger.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderOverride {
    pub amount_tolerance: Option<Money>,
    pub date_tolerance_days: Option<i64>,
    /// Added to the provider's built-in merchant keywords.
    pub merchant_keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub dry_run: bool,
    pub force: bool,
    pub lookback_days: u64,
    pub providers: BTreeMap<String, ProviderOverride>,
    pub categories: Vec<Category>,
    pub rules: Vec<CategoryRule>,
    /// Category id used when no rule matches an item.
    pub fallback: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("cartledger.db"),
            dry_run: false,
            force: false,
            lookback_days: 0,
            providers: BTreeMap::new(),
            categories: Vec::new(),
            rules: Vec::new(),
            fallback: None,
        }
    }
}

impl Config {
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content).context("invalid config")?;
        for name in config.providers.keys() {
            if name.parse::<Provider>().is_err() {
                bail!("unknown provider in config: [providers.{name}]");
            }
        }
        Ok(config)
    }

    /// Loads `path`, or `cartledger.toml` from the working directory when no
    /// path is given. A missing default file yields the defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        if !explicit && !path.exists() {
            tracing::debug!("no {DEFAULT_CONFIG_FILE} found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("in {}", path.display()))
    }

    pub fn categories(&self) -> Vec<Category> {
        if self.categories.is_empty() {
            default_categories()
        } else {
            self.categories.clone()
        }
    }

    pub fn provider_settings(&self, provider: Provider) -> ProviderSettings {
        let mut settings = ProviderSettings::new(provider);
        settings.lookback_days = self.lookback_days;
        if let Some(over) = self.providers.get(provider.as_str()) {
            if let Some(tolerance) = over.amount_tolerance {
                settings.matcher.amount_tolerance = tolerance;
            }
            if let Some(days) = over.date_tolerance_days {
                settings.matcher.date_tolerance_days = days;
            }
            settings
                .merchant_keywords
                .extend(over.merchant_keywords.iter().cloned());
        }
        settings
    }

    pub fn classifier(&self) -> anyhow::Result<RuleClassifier> {
        RuleClassifier::new(self.rules.clone(), self.fallback.clone()).context("invalid classification rules")
    }
}
