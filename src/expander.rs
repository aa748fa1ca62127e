//! Cartesian expansion of variables and `$name` substitution.

use indexmap::IndexMap;
use regex::{Captures, Regex};
use tracing::warn;

use crate::variable::Variable;

/// One point of the run matrix: variable name to concrete value.
pub type Assignment = IndexMap<String, String>;

/// Builds the full matrix of assignments up front.
///
/// Variables are taken in the given order. For every variable the running
/// set of partial assignments is crossed with its values, the outer loop
/// walking the new values, so the first variable varies fastest. The result
/// only depends on the input order and is reproducible across runs.
#[derive(Debug, Clone)]
pub struct MatrixExpander {
    expanded: Vec<Assignment>,
}

impl MatrixExpander {
    pub fn new<'a, I>(variables: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a Variable)>,
    {
        let mut expanded = vec![Assignment::new()];
        for (name, variable) in variables {
            let values = variable.values();
            let mut next = Vec::with_capacity(expanded.len() * values.len());
            for value in &values {
                for partial in &expanded {
                    let mut point = partial.clone();
                    point.insert(name.clone(), value.clone());
                    next.push(point);
                }
            }
            expanded = next;
        }
        Self { expanded }
    }

    pub fn len(&self) -> usize {
        self.expanded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expanded.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Assignment> {
        self.expanded.iter()
    }

    pub fn into_vec(self) -> Vec<Assignment> {
        self.expanded
    }
}

impl IntoIterator for MatrixExpander {
    type Item = Assignment;
    type IntoIter = std::vec::IntoIter<Assignment>;

    fn into_iter(self) -> Self::IntoIter {
        self.expanded.into_iter()
    }
}

/// Replace `$name` and `${name}` references to the given values.
///
/// When names share a prefix the longest one wins, `$rates` is not read as
/// `$rate` followed by `s` if `rates` is defined. Unknown names are left
/// untouched.
pub fn substitute<'a, I>(text: &str, values: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let values: IndexMap<&str, &str> = values.into_iter().collect();
    if values.is_empty() || !text.contains('$') {
        return text.to_owned();
    }
    let mut names: Vec<&str> = values.keys().copied().collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    let alternation = names
        .iter()
        .map(|n| regex::escape(n))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(r"\$(?:\{{({alternation})\}}|({alternation}))");
    let regex = match Regex::new(&pattern) {
        Ok(regex) => regex,
        Err(error) => {
            warn!(%error, "unable to build substitution pattern, text left as is");
            return text.to_owned();
        }
    };
    regex
        .replace_all(text, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            values.get(name).copied().unwrap_or_default().to_owned()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::VariableSet;

    fn set(decls: &[(&str, &str)]) -> VariableSet {
        let mut set = VariableSet::new();
        for (name, value) in decls {
            set.insert(*name, Variable::parse(value).unwrap());
        }
        set
    }

    #[test]
    fn should_multiply_by_dynamic_cardinalities_only() {
        let vars = set(&[("a", "1,2,3"), ("b", "x,y"), ("c", "static")]);
        let matrix = MatrixExpander::new(vars.iter());
        assert_eq!(matrix.len(), 6);
        assert!(matrix.iter().all(|p| p["c"] == "static"));
    }

    #[test]
    fn should_vary_first_variable_fastest() {
        let vars = set(&[("a", "1,2"), ("b", "x,y")]);
        let points: Vec<_> = MatrixExpander::new(vars.iter())
            .into_iter()
            .map(|p| format!("{}{}", p["a"], p["b"]))
            .collect();
        assert_eq!(points, vec!["1x", "2x", "1y", "2y"]);
    }

    #[test]
    fn should_produce_single_empty_point_without_variables() {
        let matrix = MatrixExpander::new(VariableSet::new().iter());
        assert_eq!(matrix.len(), 1);
        assert!(matrix.iter().next().unwrap().is_empty());
    }

    #[test]
    fn should_be_deterministic() {
        let vars = set(&[("rate", "[1-5]"), ("size", "64,1500"), ("proto", "tcp,udp")]);
        let first = MatrixExpander::new(vars.iter()).into_vec();
        let second = MatrixExpander::new(vars.iter()).into_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn should_prefer_longest_name() {
        let out = substitute("$rate $rates ${rate}s", [("rate", "1"), ("rates", "2")]);
        assert_eq!(out, "1 2 1s");
    }

    #[test]
    fn should_leave_unknown_names() {
        let out = substitute("echo $HOME $size", [("size", "64")]);
        assert_eq!(out, "echo $HOME 64");
    }
}
