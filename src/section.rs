//! Sections of a test specification.
//!
//! A header line (`%` followed by `[tags:]keyword[@role][ key=value...]`)
//! opens a section; every following line up to the next header is its raw
//! content. [`Section::build`] turns a header and its content into one typed
//! variant, or into [`Section::Null`] when the header's tags are not active.

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use indexmap::IndexMap;
use regex::Regex;

use crate::config::ConfigSection;
use crate::error::{Location, SpecError};
use crate::expander::{substitute, Assignment, MatrixExpander};
use crate::tags::TagSet;
use crate::variable::{parse_declaration, Variable, VariableSet};

/// Marks a header line.
pub const HEADER_PREFIX: char = '%';

/// Section keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Info,
    Config,
    Variables,
    Script,
    File,
    Require,
}

impl SectionKind {
    /// `script` and `file` may appear any number of times.
    pub fn is_repeatable(self) -> bool {
        matches!(self, SectionKind::Script | SectionKind::File)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SectionKind::Info => "info",
            SectionKind::Config => "config",
            SectionKind::Variables => "variables",
            SectionKind::Script => "script",
            SectionKind::File => "file",
            SectionKind::Require => "require",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            r"^(?:(?P<tags>[a-zA-Z0-9_]+(?:,[a-zA-Z0-9_]+)*):)?",
            r"(?P<name>info|config|variables|require|file[ \t]+(?P<file>[a-zA-Z0-9_.-]+)|script(?:@(?P<role>[a-zA-Z0-9_]+))?)",
            r"(?P<params>(?:[ \t]+[a-zA-Z0-9_:]+=[a-zA-Z0-9_./:-]+)+)?[ \t]*$",
        ))
        .expect("header pattern is valid")
    })
}

fn param_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([a-zA-Z0-9_:]+)=([a-zA-Z0-9_./:-]+)").expect("param pattern is valid")
    })
}

/// A parsed header line.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionHeader {
    pub kind: SectionKind,
    pub tags: Vec<String>,
    pub role: Option<String>,
    pub file_name: Option<String>,
    pub params: IndexMap<String, String>,
    pub location: Location,
}

impl SectionHeader {
    /// Parse the text of a header line, without the leading `%`.
    pub fn parse(text: &str, location: Location) -> Result<Self, SpecError> {
        let text = text.trim();
        let Some(captures) = header_pattern().captures(text) else {
            return Err(SpecError::UnknownSection {
                location,
                header: text.to_owned(),
            });
        };
        let tags = captures
            .name("tags")
            .map(|t| t.as_str().split(',').map(str::to_owned).collect())
            .unwrap_or_default();
        let name = &captures["name"];
        let kind = if name.starts_with("script") {
            SectionKind::Script
        } else if name.starts_with("file") {
            SectionKind::File
        } else {
            match name {
                "info" => SectionKind::Info,
                "config" => SectionKind::Config,
                "variables" => SectionKind::Variables,
                _ => SectionKind::Require,
            }
        };
        let params: IndexMap<String, String> = captures
            .name("params")
            .map(|p| {
                param_pattern()
                    .captures_iter(p.as_str())
                    .map(|c| (c[1].to_owned(), c[2].to_owned()))
                    .collect()
            })
            .unwrap_or_default();
        if kind != SectionKind::Script && !params.is_empty() {
            return Err(SpecError::UnexpectedArguments {
                location,
                kind: kind.to_string(),
                params: captures["params"].trim().to_owned(),
            });
        }
        Ok(Self {
            kind,
            tags,
            role: captures.name("role").map(|r| r.as_str().to_owned()),
            file_name: captures.name("file").map(|f| f.as_str().to_owned()),
            params,
            location,
        })
    }
}

/// A finalized section.
#[derive(Debug, Clone)]
pub enum Section {
    /// Excluded by tags; its content is dropped.
    Null,
    Info(InfoSection),
    Config(ConfigSection),
    Variables(VariableSection),
    Script(ScriptSection),
    File(FileSection),
    Require(RequireSection),
}

impl Section {
    /// Build the typed section for `header` with its raw `content`.
    pub fn build(header: &SectionHeader, content: &str, tags: &TagSet) -> Result<Self, SpecError> {
        if !tags.admits(&header.tags) {
            return Ok(Section::Null);
        }
        let content = content.to_owned();
        let first_line = Location::new(header.location.file.clone(), header.location.line + 1);
        Ok(match header.kind {
            SectionKind::Info => Section::Info(InfoSection { content }),
            SectionKind::Require => Section::Require(RequireSection { content }),
            SectionKind::Variables => {
                let mut section = VariableSection::new();
                section.apply_content(&content, tags, &first_line)?;
                Section::Variables(section)
            }
            SectionKind::Config => {
                let mut section = ConfigSection::new();
                section.apply_content(&content, tags, &first_line)?;
                Section::Config(section)
            }
            SectionKind::Script => Section::Script(ScriptSection {
                role: header.role.clone(),
                params: header.params.clone(),
                content,
            }),
            SectionKind::File => Section::File(FileSection {
                name: header.file_name.clone().unwrap_or_default(),
                content,
            }),
        })
    }
}

/// Free-form description of the test.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoSection {
    pub content: String,
}

impl InfoSection {
    /// First non-empty line.
    pub fn title(&self) -> Option<&str> {
        self.content.lines().map(str::trim).find(|l| !l.is_empty())
    }
}

/// Commands that must succeed for a run to be valid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequireSection {
    pub content: String,
}

impl RequireSection {
    /// Requirements are checked on the default role only.
    pub fn role(&self) -> &'static str {
        "default"
    }
}

/// A shell script run on every node of its role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptSection {
    pub role: Option<String>,
    pub params: IndexMap<String, String>,
    pub content: String,
}

impl ScriptSection {
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    /// Time to wait before starting the script, from the `delay` parameter.
    pub fn delay(&self) -> Duration {
        self.params
            .get("delay")
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_default()
    }
}

/// A file written to the experiment path before each run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSection {
    pub name: String,
    pub content: String,
}

/// A section of `name=value` declarations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableSection {
    vars: VariableSet,
}

impl VariableSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_set(vars: VariableSet) -> Self {
        Self { vars }
    }

    /// Parse the declarations of `content`, then sort by name.
    pub fn apply_content(
        &mut self,
        content: &str,
        tags: &TagSet,
        first_line: &Location,
    ) -> Result<(), SpecError> {
        for (offset, line) in content.lines().enumerate() {
            let declaration = parse_declaration(line, tags).map_err(|source| SpecError::Variable {
                location: Location::new(first_line.file.clone(), first_line.line + offset),
                source,
            })?;
            if let Some((name, variable)) = declaration {
                self.vars.insert(name, variable);
            }
        }
        self.vars.sort();
        Ok(())
    }

    pub fn vars(&self) -> &VariableSet {
        &self.vars
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.vars.get(name)
    }

    /// Replace the whole domain of `name`.
    pub fn override_var(&mut self, name: impl Into<String>, variable: Variable) {
        self.vars.insert(name, variable);
    }

    pub fn override_all<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (String, Variable)>,
    {
        for (name, variable) in overrides {
            self.override_var(name, variable);
        }
    }

    pub fn is_numeric(&self, name: &str) -> bool {
        self.vars.get(name).map_or(true, Variable::is_numeric)
    }

    /// All points of the matrix, statics included with their single value.
    pub fn expand(&self) -> Result<Vec<Assignment>, SpecError> {
        if let Some(name) = self.vars.find_empty() {
            return Err(SpecError::EmptyDomain(name.to_owned()));
        }
        Ok(MatrixExpander::new(self.vars.iter()).into_vec())
    }

    /// Substitute statics over the whole text.
    pub fn substitute_statics(&self, text: &str) -> String {
        let statics: Vec<(String, String)> = self
            .vars
            .statics()
            .map(|(name, var)| (name.clone(), var.values().remove(0)))
            .collect();
        substitute(text, statics.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Render `text` for one matrix point: statics first, then the point.
    pub fn render(&self, text: &str, assignment: &Assignment) -> String {
        let text = self.substitute_statics(text);
        substitute(&text, assignment.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Every rendering of `text`, one per combination of the dynamics.
    pub fn replace_all(&self, text: &str) -> Result<Vec<String>, SpecError> {
        if let Some(name) = self.vars.find_empty() {
            return Err(SpecError::EmptyDomain(name.to_owned()));
        }
        let text = self.substitute_statics(text);
        Ok(MatrixExpander::new(self.vars.dynamics())
            .into_iter()
            .map(|point| substitute(&text, point.iter().map(|(k, v)| (k.as_str(), v.as_str()))))
            .collect())
    }
}
