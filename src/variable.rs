//! Variables, their value domains and variable sets.
//!
//! A variable with a single value is *static*: it is substituted but never
//! multiplies the number of runs. A variable with two or more values is
//! *dynamic* and becomes one axis of the run matrix.

use std::fmt;
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::error::VariableError;
use crate::tags::TagSet;

/// How a range advances from one value to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// `[lo-hi#step]`
    Add(i64),
    /// `[lo*hi]`, doubling.
    Mul(i64),
}

/// Largest number of values a range may expand to.
pub const MAX_RANGE_VALUES: usize = 100_000;

/// The domain of a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Variable {
    Scalar(String),
    List(Vec<String>),
    Range { start: i64, end: i64, step: Step },
    /// Key/value mapping; the whole mapping is a single value.
    Mapping(IndexMap<String, String>),
}

/// Static or dynamic, derived from the cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableClass {
    Static,
    Dynamic,
}

fn range_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[\s*(?P<start>-?[0-9]+)\s*(?P<op>[-*])\s*(?P<end>-?[0-9]+)\s*(?:#\s*(?P<step>[0-9]+)\s*)?\]$")
            .expect("range pattern is valid")
    })
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("name pattern is valid"))
}

impl Variable {
    /// Parse the right-hand side of a `name=value` declaration.
    pub fn parse(value: &str) -> Result<Self, VariableError> {
        let value = value.trim();
        if let Some(captures) = range_pattern().captures(value) {
            let bad = || VariableError::InvalidRange(value.to_owned());
            let start: i64 = captures["start"].parse().map_err(|_| bad())?;
            let end: i64 = captures["end"].parse().map_err(|_| bad())?;
            let step = match &captures["op"] {
                "*" => {
                    if start <= 0 || captures.name("step").is_some() {
                        return Err(bad());
                    }
                    Step::Mul(2)
                }
                _ => {
                    let step = match captures.name("step") {
                        Some(step) => step.as_str().parse().map_err(|_| bad())?,
                        None => 1,
                    };
                    if step == 0 {
                        return Err(bad());
                    }
                    Step::Add(step)
                }
            };
            let count = range_len(start, end, step);
            if count > MAX_RANGE_VALUES {
                return Err(VariableError::RangeTooLarge(value.to_owned(), count));
            }
            return Ok(Variable::Range { start, end, step });
        }
        if value == "[]" {
            return Ok(Variable::List(Vec::new()));
        }
        if let Some(inner) = value.strip_prefix('{').and_then(|v| v.strip_suffix('}')) {
            let items: Vec<&str> = inner
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            if items.is_empty() {
                return Ok(Variable::Mapping(IndexMap::new()));
            }
            if items.iter().all(|item| item.contains(':')) {
                let mapping = items
                    .iter()
                    .filter_map(|item| item.split_once(':'))
                    .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
                    .collect();
                return Ok(Variable::Mapping(mapping));
            }
            return Ok(Variable::List(items.into_iter().map(str::to_owned).collect()));
        }
        if value.contains(',') {
            return Ok(Variable::List(
                value.split(',').map(|s| s.trim().to_owned()).collect(),
            ));
        }
        Ok(Variable::Scalar(value.to_owned()))
    }

    /// Number of values the variable contributes.
    pub fn count(&self) -> usize {
        match self {
            Variable::Scalar(_) | Variable::Mapping(_) => 1,
            Variable::List(values) => values.len(),
            Variable::Range { start, end, step } => range_len(*start, *end, *step),
        }
    }

    /// `Err` when the domain is empty.
    pub fn class(&self, name: &str) -> Result<VariableClass, VariableError> {
        match self.count() {
            0 => Err(VariableError::EmptyDomain(name.to_owned())),
            1 => Ok(VariableClass::Static),
            _ => Ok(VariableClass::Dynamic),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.count() > 1
    }

    /// Materialize the value set in declaration order.
    pub fn values(&self) -> Vec<String> {
        match self {
            Variable::Scalar(value) => vec![value.clone()],
            Variable::List(values) => values.clone(),
            Variable::Mapping(_) => vec![self.to_string()],
            Variable::Range { start, end, step } => {
                let mut values = Vec::new();
                let mut current = *start;
                while current <= *end {
                    values.push(current.to_string());
                    let next = match step {
                        Step::Add(n) => current.checked_add(*n),
                        Step::Mul(n) => current.checked_mul(*n),
                    };
                    match next {
                        Some(next) => current = next,
                        None => break,
                    }
                }
                values
            }
        }
    }

    /// Whether every value parses as a number.
    pub fn is_numeric(&self) -> bool {
        match self {
            Variable::Range { .. } => true,
            Variable::Mapping(_) => false,
            _ => self.values().iter().all(|v| v.parse::<f64>().is_ok()),
        }
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, String>> {
        match self {
            Variable::Mapping(mapping) => Some(mapping),
            _ => None,
        }
    }
}

/// Cardinality of a range without walking it. Saturates at `usize::MAX`.
fn range_len(start: i64, end: i64, step: Step) -> usize {
    if start > end {
        return 0;
    }
    match step {
        Step::Add(n) => {
            let span = (i128::from(end) - i128::from(start)) / i128::from(n) + 1;
            usize::try_from(span).unwrap_or(usize::MAX)
        }
        Step::Mul(n) => {
            let mut count = 1;
            let mut current = start;
            while let Some(next) = current.checked_mul(n).filter(|next| *next <= end) {
                current = next;
                count += 1;
            }
            count
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Scalar(value) => f.write_str(value),
            Variable::List(values) => write!(f, "{{{}}}", values.join(",")),
            Variable::Range {
                start,
                end,
                step: Step::Add(step),
            } => write!(f, "[{start}-{end}#{step}]"),
            Variable::Range { start, end, .. } => write!(f, "[{start}*{end}]"),
            Variable::Mapping(mapping) => {
                let pairs: Vec<_> = mapping.iter().map(|(k, v)| format!("{k}:{v}")).collect();
                write!(f, "{{{}}}", pairs.join(","))
            }
        }
    }
}

/// Parse one `[tag:]name=value` line.
///
/// Returns `Ok(None)` for blank lines, comments and lines whose tag scope
/// is not satisfied by `tags`.
pub fn parse_declaration(
    line: &str,
    tags: &TagSet,
) -> Result<Option<(String, Variable)>, VariableError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let Some((lhs, rhs)) = line.split_once('=') else {
        return Err(VariableError::MissingAssignment(line.to_owned()));
    };
    let name = match lhs.trim().split_once(':') {
        Some((scope, name)) => {
            if !tags.satisfies_scope(scope.trim()) {
                return Ok(None);
            }
            name.trim()
        }
        None => lhs.trim(),
    };
    if !name_pattern().is_match(name) {
        return Err(VariableError::InvalidName(name.to_owned()));
    }
    Ok(Some((name.to_owned(), Variable::parse(rhs)?)))
}

/// Insertion-ordered set of named variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableSet {
    vars: IndexMap<String, Variable>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare or replace a variable. A replaced variable keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, variable: Variable) {
        self.vars.insert(name.into(), variable);
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.vars.iter()
    }

    /// Variables with exactly one value.
    pub fn statics(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.vars.iter().filter(|(_, v)| v.count() == 1)
    }

    /// Variables with more than one value.
    pub fn dynamics(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.vars.iter().filter(|(_, v)| v.is_dynamic())
    }

    /// First variable with an empty domain, if any.
    pub fn find_empty(&self) -> Option<&str> {
        self.vars
            .iter()
            .find(|(_, v)| v.count() == 0)
            .map(|(name, _)| name.as_str())
    }

    pub fn sort(&mut self) {
        self.vars.sort_keys();
    }
}
