use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

mod version;

pub use version::{Version, VersionConstraint};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecParseError {
    #[error("empty spec string")]
    Empty,
    #[error("invalid package name {name:?} in spec {input:?}")]
    InvalidName { input: String, name: String },
    #[error("invalid version {input:?}: {message}")]
    InvalidVersion { input: String, message: String },
    #[error("version given twice in spec {input:?}")]
    DuplicateVersion { input: String },
    #[error("unexpected {found:?} at offset {offset} in spec {input:?}")]
    UnexpectedToken {
        input: String,
        found: String,
        offset: usize,
    },
    #[error("unterminated quote in spec {input:?}")]
    UnterminatedQuote { input: String },
}

impl SpecParseError {
    pub fn code(&self) -> &'static str {
        match self {
            SpecParseError::Empty => "spec.empty",
            SpecParseError::InvalidName { .. } => "spec.invalid_name",
            SpecParseError::InvalidVersion { .. } => "spec.invalid_version",
            SpecParseError::DuplicateVersion { .. } => "spec.duplicate_version",
            SpecParseError::UnexpectedToken { .. } => "spec.unexpected_token",
            SpecParseError::UnterminatedQuote { .. } => "spec.unterminated_quote",
        }
    }
}

pub(crate) fn package_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").expect("valid name regex"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantValue {
    Bool(bool),
    /// Comma-separated multi-value variants keep their original order.
    Values(Vec<String>),
}

impl VariantValue {
    fn from_assignment(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "true" => VariantValue::Bool(true),
            "false" => VariantValue::Bool(false),
            _ => VariantValue::Values(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }

    /// Pattern-side check: booleans must match, value lists must be a subset.
    fn admits(&self, candidate: &VariantValue) -> bool {
        match (self, candidate) {
            (VariantValue::Bool(a), VariantValue::Bool(b)) => a == b,
            (VariantValue::Values(want), VariantValue::Values(have)) => {
                want.iter().all(|w| have.contains(w))
            }
            _ => false,
        }
    }
}

/// A parsed spec string: `name[@versions] [+flag|~flag|key=value ...] [%dep] [^dep]`.
///
/// The same type is used for patterns (`gcc@11:`) and for the identity of
/// a candidate (an external entry, or a concrete node via [`Spec::concrete`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spec {
    pub name: String,
    pub versions: Option<VersionConstraint>,
    pub variants: BTreeMap<String, VariantValue>,
    /// `%` / `^` constraints, kept verbatim and compared textually.
    pub dependencies: Vec<String>,
}

impl Spec {
    pub fn parse(input: &str) -> Result<Self, SpecParseError> {
        SpecParser::new(input).parse()
    }

    pub fn concrete(
        name: impl Into<String>,
        version: Version,
        variants: BTreeMap<String, VariantValue>,
    ) -> Self {
        Self {
            name: name.into(),
            versions: Some(VersionConstraint::exact(version)),
            variants,
            dependencies: vec![],
        }
    }

    /// Whether `self` (a candidate) falls inside `pattern`.
    pub fn satisfies(&self, pattern: &Spec) -> bool {
        if self.name != pattern.name {
            return false;
        }
        if let Some(want) = &pattern.versions {
            match &self.versions {
                Some(have) if have.is_within(want) => {}
                _ => return false,
            }
        }
        let variants_ok = pattern.variants.iter().all(|(key, want)| {
            self.variants
                .get(key)
                .is_some_and(|have| want.admits(have))
        });
        variants_ok
            && pattern
                .dependencies
                .iter()
                .all(|d| self.dependencies.contains(d))
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(v) = &self.versions {
            write!(f, "@{v}")?;
        }
        for (key, value) in &self.variants {
            match value {
                VariantValue::Bool(true) => write!(f, "+{key}")?,
                VariantValue::Bool(false) => write!(f, "~{key}")?,
                VariantValue::Values(vals) => write!(f, " {key}={}", vals.join(","))?,
            }
        }
        for dep in &self.dependencies {
            write!(f, " {dep}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Spec {
    type Err = SpecParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Spec::parse(s)
    }
}

struct SpecParser<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

impl<'a> SpecParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|(i, _)| *i)
            .unwrap_or(self.input.len())
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        out
    }

    fn unexpected(&self) -> SpecParseError {
        SpecParseError::UnexpectedToken {
            input: self.input.to_string(),
            found: self.peek().map(String::from).unwrap_or_default(),
            offset: self.offset(),
        }
    }

    fn parse(mut self) -> Result<Spec, SpecParseError> {
        if self.input.trim().is_empty() {
            return Err(SpecParseError::Empty);
        }
        self.take_while(char::is_whitespace);

        let name = self.take_while(is_ident_char);
        if name.is_empty() || !package_name_regex().is_match(&name) {
            return Err(SpecParseError::InvalidName {
                input: self.input.to_string(),
                name,
            });
        }

        let mut spec = Spec {
            name,
            versions: None,
            variants: BTreeMap::new(),
            dependencies: vec![],
        };

        while let Some(c) = self.peek() {
            match c {
                c if c.is_whitespace() => {
                    self.pos += 1;
                }
                '@' => {
                    self.pos += 1;
                    let raw = self.take_while(|c| is_ident_char(c) || matches!(c, ':' | ',' | '='));
                    if spec.versions.is_some() {
                        return Err(SpecParseError::DuplicateVersion {
                            input: self.input.to_string(),
                        });
                    }
                    spec.versions = Some(VersionConstraint::parse(&raw)?);
                }
                '+' | '~' => {
                    let enabled = c == '+';
                    self.pos += 1;
                    // `++x` / `~~x` propagate to dependencies; the flag itself is the same.
                    if self.peek() == Some(c) {
                        self.pos += 1;
                    }
                    let key = self.take_while(is_ident_char);
                    if key.is_empty() {
                        return Err(self.unexpected());
                    }
                    spec.variants.insert(key, VariantValue::Bool(enabled));
                }
                '%' | '^' => {
                    let start = self.pos;
                    self.pos += 1;
                    let body = self.take_while(|c| !c.is_whitespace());
                    if body.is_empty() {
                        self.pos = start;
                        return Err(self.unexpected());
                    }
                    spec.dependencies.push(format!("{c}{body}"));
                }
                c if is_ident_char(c) => {
                    let key = self.take_while(is_ident_char);
                    self.expect_assignment()?;
                    let value = self.read_value()?;
                    spec.variants
                        .insert(key, VariantValue::from_assignment(&value));
                }
                _ => return Err(self.unexpected()),
            }
        }

        Ok(spec)
    }

    /// Accepts `=`, `==` and `:=`.
    fn expect_assignment(&mut self) -> Result<(), SpecParseError> {
        match self.peek() {
            Some('=') => {
                self.pos += 1;
                if self.peek() == Some('=') {
                    self.pos += 1;
                }
                Ok(())
            }
            Some(':') => {
                self.pos += 1;
                if self.peek() == Some('=') {
                    self.pos += 1;
                    Ok(())
                } else {
                    Err(self.unexpected())
                }
            }
            _ => Err(self.unexpected()),
        }
    }

    fn read_value(&mut self) -> Result<String, SpecParseError> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                let value = self.take_while(|c| c != q);
                if self.peek() != Some(q) {
                    return Err(SpecParseError::UnterminatedQuote {
                        input: self.input.to_string(),
                    });
                }
                self.pos += 1;
                Ok(value)
            }
            _ => {
                let value = self.take_while(|c| !c.is_whitespace());
                if value.is_empty() {
                    return Err(self.unexpected());
                }
                Ok(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(s: &str) -> Spec {
        Spec::parse(s).expect("parse spec")
    }

    #[test]
    fn parses_name_version_and_variants() {
        let s = spec("zlib@1.3:+shared~pic");
        assert_eq!(s.name, "zlib");
        assert_eq!(s.versions.as_ref().map(|v| v.to_string()).as_deref(), Some("1.3:"));
        assert_eq!(s.variants.get("shared"), Some(&VariantValue::Bool(true)));
        assert_eq!(s.variants.get("pic"), Some(&VariantValue::Bool(false)));
    }

    #[test]
    fn parses_quoted_multi_value_assignment() {
        let s = spec("gcc@=11.2.0 languages:='c,c++,fortran'");
        assert_eq!(
            s.variants.get("languages"),
            Some(&VariantValue::Values(vec![
                "c".to_string(),
                "c++".to_string(),
                "fortran".to_string()
            ]))
        );
        assert_eq!(s.versions.as_ref().map(|v| v.to_string()).as_deref(), Some("=11.2.0"));
    }

    #[test]
    fn boolean_assignments_normalize_to_flags() {
        assert_eq!(
            spec("hdf5 shared=True").variants.get("shared"),
            Some(&VariantValue::Bool(true))
        );
    }

    #[test]
    fn rejects_malformed_specs() {
        assert_eq!(Spec::parse("   "), Err(SpecParseError::Empty));
        assert!(matches!(
            Spec::parse("@1.2"),
            Err(SpecParseError::InvalidName { .. })
        ));
        assert!(matches!(
            Spec::parse("gcc@1@2"),
            Err(SpecParseError::DuplicateVersion { .. })
        ));
        assert!(matches!(
            Spec::parse("gcc +"),
            Err(SpecParseError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            Spec::parse("gcc langs='c"),
            Err(SpecParseError::UnterminatedQuote { .. })
        ));
        assert!(Spec::parse("gcc@").is_err());
    }

    #[test]
    fn pattern_without_version_matches_any_version() {
        assert!(spec("gcc@11.2.0").satisfies(&spec("gcc")));
        assert!(!spec("clang@14").satisfies(&spec("gcc")));
    }

    #[test]
    fn version_satisfaction_is_prefix_and_range_aware() {
        assert!(spec("gcc@11.2.0").satisfies(&spec("gcc@11")));
        assert!(spec("gcc@=11.2.0").satisfies(&spec("gcc@11.2.0")));
        assert!(spec("gcc@11.2.0").satisfies(&spec("gcc@10:")));
        assert!(!spec("gcc@10.3.0").satisfies(&spec("gcc@11.2.0")));
        assert!(!spec("gcc").satisfies(&spec("gcc@11")));
    }

    #[test]
    fn variant_constraints_must_be_present_on_candidate() {
        assert!(spec("gcc@11+binutils").satisfies(&spec("gcc+binutils")));
        assert!(!spec("gcc@11").satisfies(&spec("gcc+binutils")));
        assert!(spec("gcc languages=c,c++").satisfies(&spec("gcc languages=c")));
        assert!(!spec("gcc languages=c").satisfies(&spec("gcc languages=c,fortran")));
    }

    #[test]
    fn concrete_specs_satisfy_matching_patterns() {
        let v = Version::parse("11.2.0").expect("version");
        let node = Spec::concrete("gcc", v, BTreeMap::new());
        assert!(node.satisfies(&spec("gcc@11.2.0")));
        assert!(node.satisfies(&spec("gcc@=11.2.0")));
        assert!(!node.satisfies(&spec("gcc@999.0.0")));
    }

    #[test]
    fn dependency_constraints_compare_textually() {
        assert!(spec("mpich %gcc@11").satisfies(&spec("mpich %gcc@11")));
        assert!(!spec("mpich").satisfies(&spec("mpich %gcc@11")));
    }
}
