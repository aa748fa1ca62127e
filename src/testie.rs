//! Test specifications ("testies").
//!
//! A testie is a plain text file made of sections:
//!
//! ```text
//! %info
//! Forwarding throughput
//!
//! %variables
//! rate=[1-10]
//! ipv6:addr=fe80::1
//!
//! %script@client delay=1
//! iperf3 -c ${server:0:ip} -b ${rate}G
//!
//! %script@server
//! iperf3 -s -1
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ConfigSection;
use crate::error::{Location, SpecError};
use crate::expander::Assignment;
use crate::section::{
    FileSection, InfoSection, RequireSection, ScriptSection, Section, SectionHeader, SectionKind,
    VariableSection, HEADER_PREFIX,
};
use crate::tags::TagSet;
use crate::variable::{parse_declaration, Variable};

/// One declarative benchmark definition.
#[derive(Debug, Clone)]
pub struct TestSpecification {
    name: String,
    path: Option<PathBuf>,
    tags: TagSet,
    pub info: Option<InfoSection>,
    pub config: ConfigSection,
    pub variables: VariableSection,
    pub require: Option<RequireSection>,
    pub scripts: Vec<ScriptSection>,
    pub files: Vec<FileSection>,
    declared: HashSet<SectionKind>,
}

impl TestSpecification {
    fn empty(name: String, tags: TagSet) -> Self {
        Self {
            name,
            path: None,
            tags,
            info: None,
            config: ConfigSection::default(),
            variables: VariableSection::default(),
            require: None,
            scripts: Vec::new(),
            files: Vec::new(),
            declared: HashSet::new(),
        }
    }

    /// Parse a specification from its text.
    ///
    /// `name` is used in error locations. Sections whose tags do not
    /// intersect `tags` are dropped.
    pub fn parse(name: impl Into<String>, source: &str, tags: &TagSet) -> Result<Self, SpecError> {
        let name = name.into();
        let mut spec = Self::empty(name.clone(), tags.clone());
        let mut pending: Option<(SectionHeader, String)> = None;
        for (index, line) in source.lines().enumerate() {
            if let Some(header) = line.strip_prefix(HEADER_PREFIX) {
                if let Some((header, content)) = pending.take() {
                    spec.finish_section(&header, &content)?;
                }
                let header = SectionHeader::parse(header, Location::new(name.clone(), index + 1))?;
                pending = Some((header, String::new()));
            } else if let Some((_, content)) = pending.as_mut() {
                content.push_str(line);
                content.push('\n');
            }
        }
        if let Some((header, content)) = pending.take() {
            spec.finish_section(&header, &content)?;
        }
        debug!(
            testie = %spec.name,
            scripts = spec.scripts.len(),
            files = spec.files.len(),
            variables = spec.variables.vars().len(),
            "parsed test specification"
        );
        Ok(spec)
    }

    /// Read and parse a specification file.
    pub fn from_file(path: impl AsRef<Path>, tags: &TagSet) -> Result<Self, SpecError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| SpecError::Io {
            path: path.to_owned(),
            source,
        })?;
        let mut spec = Self::parse(path.display().to_string(), &source, tags)?;
        spec.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        spec.path = Some(path.to_owned());
        Ok(spec)
    }

    fn finish_section(&mut self, header: &SectionHeader, content: &str) -> Result<(), SpecError> {
        let section = Section::build(header, content, &self.tags)?;
        if matches!(section, Section::Null) {
            return Ok(());
        }
        if !header.kind.is_repeatable() && !self.declared.insert(header.kind) {
            return Err(SpecError::DuplicateSection {
                location: header.location.clone(),
                kind: header.kind.to_string(),
            });
        }
        match section {
            Section::Null => {}
            Section::Info(info) => self.info = Some(info),
            Section::Config(config) => self.config = config,
            Section::Variables(variables) => self.variables = variables,
            Section::Require(require) => self.require = Some(require),
            Section::Script(script) => self.scripts.push(script),
            Section::File(file) => self.files.push(file),
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Apply command line overrides, resolved against this testie's tags.
    pub fn apply_overrides(&mut self, overrides: &Overrides) -> Result<(), SpecError> {
        let variables = overrides.resolve_variables(&self.tags)?;
        let config = overrides.resolve_config(&self.tags)?;
        self.variables.override_all(variables);
        self.config.override_all(config);
        Ok(())
    }

    /// The ordered matrix of assignments.
    pub fn expand(&self) -> Result<Vec<Assignment>, SpecError> {
        self.variables.expand()
    }

    /// `require_tags` entries that are not active.
    pub fn missing_required_tags(&self) -> Vec<String> {
        self.config.missing_required_tags(&self.tags)
    }
}

/// `name=value` overrides from the command line or a caller.
///
/// Entries may be scoped as `tag:name=value` or `-tag:name=value`. Within
/// one batch the last entry for a name wins.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub variables: Vec<String>,
    pub config: Vec<String>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variable(mut self, line: impl Into<String>) -> Self {
        self.variables.push(line.into());
        self
    }

    pub fn config(mut self, line: impl Into<String>) -> Self {
        self.config.push(line.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.config.is_empty()
    }

    fn resolve(lines: &[String], tags: &TagSet) -> Result<Vec<(String, Variable)>, SpecError> {
        let mut resolved = Vec::new();
        for line in lines {
            if let Some(entry) = parse_declaration(line, tags).map_err(SpecError::Override)? {
                resolved.push(entry);
            }
        }
        Ok(resolved)
    }

    pub fn resolve_variables(&self, tags: &TagSet) -> Result<Vec<(String, Variable)>, SpecError> {
        Self::resolve(&self.variables, tags)
    }

    pub fn resolve_config(&self, tags: &TagSet) -> Result<Vec<(String, Variable)>, SpecError> {
        Self::resolve(&self.config, tags)
    }
}
