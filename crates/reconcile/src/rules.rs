use std::fmt;
use std::str::FromStr;

use cartledger_core::{find_category, Category, Money, OrderItem};
use serde::{Deserialize, Serialize};

use crate::classify::{CategoryAssignments, ClassifierError, ItemClassifier};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    pub pattern: String,
    #[serde(default)]
    pub match_type: MatchType,
    /// Category id or name.
    pub category: String,
    pub price_min: Option<Money>,
    pub price_max: Option<Money>,
}

/// How a rule's pattern is compared with an item name. Written in rule files
/// as `contains`, `exact`, `regex` or `fuzzy:<threshold>`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MatchType {
    #[default]
    Contains,
    Exact,
    Regex,
    /// Minimum similarity in `0.0..=1.0`.
    Fuzzy(f32),
}

impl FromStr for MatchType {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        if let Some(threshold) = key.strip_prefix("fuzzy:") {
            return match threshold.trim().parse::<f32>() {
                Ok(t) if (0.0..=1.0).contains(&t) => Ok(MatchType::Fuzzy(t)),
                _ => Err(ClassifierError::InvalidRules(format!(
                    "fuzzy threshold must be between 0 and 1, got '{threshold}'"
                ))),
            };
        }
        match key.as_str() {
            "contains" => Ok(MatchType::Contains),
            "exact" => Ok(MatchType::Exact),
            "regex" => Ok(MatchType::Regex),
            _ => Err(ClassifierError::InvalidRules(format!("unknown match type '{s}'"))),
        }
    }
}

impl TryFrom<String> for MatchType {
    type Error = ClassifierError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Contains => f.write_str("contains"),
            MatchType::Exact => f.write_str("exact"),
            MatchType::Regex => f.write_str("regex"),
            MatchType::Fuzzy(t) => write!(f, "fuzzy:{t}"),
        }
    }
}

impl From<MatchType> for String {
    fn from(m: MatchType) -> Self {
        m.to_string()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<CategoryRule>,
    fallback: Option<String>,
}

/// Internal pairing of a rule with its precompiled regex (if applicable).
struct CompiledRule {
    rule: CategoryRule,
    compiled_regex: Option<regex::Regex>,
}

/// Keyword rules over item names, highest priority first, with an
/// optional catch-all category.
pub struct RuleClassifier {
    rules: Vec<CompiledRule>,
    fallback: Option<String>,
}

impl RuleClassifier {
    pub fn new(rules: Vec<CategoryRule>, fallback: Option<String>) -> Result<Self, ClassifierError> {
        let mut compiled = rules
            .into_iter()
            .map(|rule| {
                let compiled_regex = match rule.match_type {
                    MatchType::Regex => Some(regex::Regex::new(&rule.pattern).map_err(|e| {
                        ClassifierError::InvalidRules(format!("rule '{}': {e}", rule.name))
                    })?),
                    _ => None,
                };
                Ok(CompiledRule { rule, compiled_regex })
            })
            .collect::<Result<Vec<_>, ClassifierError>>()?;
        // Stable, so equal priorities keep file order.
        compiled.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
        Ok(Self {
            rules: compiled,
            fallback,
        })
    }

    /// Reads `[[rules]]` tables and an optional top-level `fallback`.
    pub fn from_toml(toml_content: &str) -> Result<Self, ClassifierError> {
        let file: RuleFile = toml::from_str(toml_content)
            .map_err(|e| ClassifierError::InvalidRules(format!("Failed to parse TOML: {e}")))?;
        Self::new(file.rules, file.fallback)
    }

    pub fn find_matching_rule(&self, item: &OrderItem) -> Option<&CategoryRule> {
        self.rules
            .iter()
            .find(|cr| rule_matches(cr, item))
            .map(|cr| &cr.rule)
    }

    fn category_key_for(&self, item: &OrderItem) -> Result<&str, ClassifierError> {
        self.find_matching_rule(item)
            .map(|r| r.category.as_str())
            .or(self.fallback.as_deref())
            .ok_or_else(|| ClassifierError::Unclassified(item.name.clone()))
    }

    pub fn classify(
        &self,
        items: &[OrderItem],
        available: &[Category],
    ) -> Result<CategoryAssignments, ClassifierError> {
        let categories = items
            .iter()
            .map(|item| {
                let key = self.category_key_for(item)?;
                find_category(available, key)
                    .cloned()
                    .ok_or_else(|| ClassifierError::UnknownCategory(key.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CategoryAssignments::new(categories))
    }
}

impl ItemClassifier for RuleClassifier {
    async fn categorize_items(
        &self,
        items: &[OrderItem],
        available: &[Category],
    ) -> Result<CategoryAssignments, ClassifierError> {
        self.classify(items, available)
    }
}

fn rule_matches(cr: &CompiledRule, item: &OrderItem) -> bool {
    let rule = &cr.rule;

    if let Some(min) = rule.price_min {
        if item.price < min {
            return false;
        }
    }
    if let Some(max) = rule.price_max {
        if item.price > max {
            return false;
        }
    }

    let text = item.name.to_lowercase();
    let pattern = rule.pattern.to_lowercase();

    match rule.match_type {
        MatchType::Contains => text.contains(&pattern),
        MatchType::Exact => text == pattern,
        MatchType::Regex => cr
            .compiled_regex
            .as_ref()
            .is_some_and(|re| re.is_match(&item.name)),
        MatchType::Fuzzy(threshold) => fuzzy_score(&text, &pattern) >= threshold,
    }
}

/// Similarity in `0.0..=1.0` from the edit distance, over chars.
fn fuzzy_score(s1: &str, s2: &str) -> f32 {
    let max_len = s1.chars().count().max(s2.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (edit_distance(s1, s2) as f32 / max_len as f32)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diag = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == *cb {
                diag
            } else {
                1 + diag.min(above).min(row[j])
            };
            diag = above;
        }
    }
    row[b.len()]
}
