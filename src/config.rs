//! The `%config` section: run policy read by the runner and the regression
//! layer.

use std::time::Duration;

use indexmap::IndexMap;

use crate::error::{Location, SpecError};
use crate::section::VariableSection;
use crate::tags::TagSet;
use crate::variable::{Variable, VariableSet};

/// A config lookup: one value, or several when the entry is a list.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Single(String),
    Many(Vec<String>),
}

/// Result of reading a mapping-shaped entry.
#[derive(Debug, Clone, PartialEq)]
pub enum DictLookup {
    Mapping(IndexMap<String, String>),
    /// The entry is not a mapping; it is wrapped as `{key: first value}`.
    Degraded(IndexMap<String, String>),
}

impl DictLookup {
    pub fn is_degraded(&self) -> bool {
        matches!(self, DictLookup::Degraded(_))
    }

    pub fn into_map(self) -> IndexMap<String, String> {
        match self {
            DictLookup::Mapping(map) | DictLookup::Degraded(map) => map,
        }
    }
}

/// Variable section pre-seeded with behavioral defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSection {
    section: VariableSection,
}

impl Default for ConfigSection {
    fn default() -> Self {
        let mut vars = VariableSet::new();
        let scalar = |v: &str| Variable::Scalar(v.to_owned());
        let mapping = |pairs: &[(&str, &str)]| {
            Variable::Mapping(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            )
        };
        vars.insert("accept_outliers_mult", scalar("1"));
        vars.insert("accept_variance", scalar("1"));
        vars.insert("timeout", scalar("30"));
        vars.insert("acceptable", scalar("0.01"));
        vars.insert("n_runs", scalar("3"));
        vars.insert("n_retry", scalar("0"));
        vars.insert("zero_is_error", scalar("true"));
        vars.insert("n_supplementary_runs", scalar("3"));
        vars.insert("var_names", mapping(&[]));
        vars.insert("var_unit", mapping(&[("result", "BPS")]));
        vars.insert("legend_loc", scalar("best"));
        vars.insert("var_hide", mapping(&[]));
        vars.insert("var_log", Variable::List(Vec::new()));
        vars.insert("autokill", scalar("true"));
        vars.insert("require_tags", Variable::List(Vec::new()));
        Self {
            section: VariableSection::from_set(vars),
        }
    }
}

impl ConfigSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_content(
        &mut self,
        content: &str,
        tags: &TagSet,
        first_line: &Location,
    ) -> Result<(), SpecError> {
        self.section.apply_content(content, tags, first_line)
    }

    pub fn override_var(&mut self, name: impl Into<String>, variable: Variable) {
        self.section.override_var(name, variable);
    }

    pub fn override_all<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (String, Variable)>,
    {
        self.section.override_all(overrides);
    }

    /// Set a scalar entry.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.override_var(key, Variable::Scalar(value.into()));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.section.get(key).is_some()
    }

    pub fn vars(&self) -> &VariableSet {
        self.section.vars()
    }

    /// The single value when the entry has exactly one, else all values.
    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        let mut values = self.section.get(key)?.values();
        if values.len() == 1 {
            values.pop().map(ConfigValue::Single)
        } else {
            Some(ConfigValue::Many(values))
        }
    }

    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.section
            .get(key)
            .map(Variable::values)
            .unwrap_or_default()
    }

    /// Read a mapping-shaped entry.
    ///
    /// A non-mapping value is not an error: it comes back as
    /// [`DictLookup::Degraded`] and the caller decides how loudly to report it.
    pub fn get_dict(&self, key: &str) -> Option<DictLookup> {
        let variable = self.section.get(key)?;
        Some(match variable.as_mapping() {
            Some(mapping) => DictLookup::Mapping(mapping.clone()),
            None => {
                let first = variable.values().into_iter().next().unwrap_or_default();
                DictLookup::Degraded(IndexMap::from([(key.to_owned(), first)]))
            }
        })
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            ConfigValue::Single(value) => Some(value),
            ConfigValue::Many(_) => None,
        }
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_str(key)?.parse().ok()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get_str(key)?.parse().ok()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        parse_bool(&self.get_str(key)?)
    }

    /// Entry in seconds, fractional values allowed.
    pub fn get_duration(&self, key: &str) -> Option<Duration> {
        self.get_f64(key)
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Per-command timeout. A non-positive `timeout` disables it.
    pub fn timeout(&self) -> Option<Duration> {
        self.get_duration("timeout").filter(|t| !t.is_zero())
    }

    pub fn n_runs(&self) -> u64 {
        self.get_u64("n_runs").unwrap_or(1).max(1)
    }

    /// Display name of a variable, through `var_names`.
    pub fn var_name(&self, key: &str) -> String {
        self.get_dict("var_names")
            .map(DictLookup::into_map)
            .and_then(|names| names.get(key).cloned())
            .unwrap_or_else(|| key.to_owned())
    }

    /// Tags listed in `require_tags` that are not active.
    pub fn missing_required_tags(&self, tags: &TagSet) -> Vec<String> {
        self.get_list("require_tags")
            .into_iter()
            .filter(|t| !tags.contains(t))
            .collect()
    }
}

/// Parse `true`/`false` style flags.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_use_defaults_when_section_empty() {
        let cfg = ConfigSection::default();
        assert_eq!(cfg.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.n_runs(), 3);
        assert_eq!(cfg.get_u64("n_retry"), Some(0));
        assert_eq!(cfg.get_bool("autokill"), Some(true));
        assert_eq!(cfg.get_f64("acceptable"), Some(0.01));
        assert!(cfg.get_list("require_tags").is_empty());
        assert_eq!(cfg.get("legend_loc"), Some(ConfigValue::Single("best".into())));
    }

    #[test]
    fn should_return_list_when_cardinality_above_one() {
        let mut cfg = ConfigSection::default();
        cfg.override_var("var_log", Variable::parse("rate,size").unwrap());
        assert_eq!(
            cfg.get("var_log"),
            Some(ConfigValue::Many(vec!["rate".into(), "size".into()]))
        );
    }

    #[test]
    fn should_override_from_content() {
        let mut cfg = ConfigSection::default();
        cfg.apply_content("timeout=5\nn_runs=1\n", &TagSet::new(), &Location::new("t", 1))
            .unwrap();
        assert_eq!(cfg.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(cfg.n_runs(), 1);
    }

    #[test]
    fn should_degrade_dict_lookup_on_scalar() {
        let mut cfg = ConfigSection::default();
        cfg.set("var_unit", "BPS");
        let lookup = cfg.get_dict("var_unit").unwrap();
        assert!(lookup.is_degraded());
        assert_eq!(lookup.into_map()["var_unit"], "BPS");
    }

    #[test]
    fn should_resolve_var_names() {
        let mut cfg = ConfigSection::default();
        cfg.override_var("var_names", Variable::parse("{rate:Rate (Gbps)}").unwrap());
        assert_eq!(cfg.var_name("rate"), "Rate (Gbps)");
        assert_eq!(cfg.var_name("size"), "size");
    }

    #[test]
    fn should_list_missing_required_tags() {
        let mut cfg = ConfigSection::default();
        cfg.override_var("require_tags", Variable::parse("dpdk,ipv6").unwrap());
        let missing = cfg.missing_required_tags(&TagSet::from_iter(["ipv6"]));
        assert_eq!(missing, vec!["dpdk"]);
    }

    #[test]
    fn should_disable_timeout_when_zero() {
        let mut cfg = ConfigSection::default();
        cfg.set("timeout", "0");
        assert_eq!(cfg.timeout(), None);
    }
}
