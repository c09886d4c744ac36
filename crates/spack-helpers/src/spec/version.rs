use super::SpecParseError;
use std::cmp::Ordering;
use std::fmt;

/// Words that sort above every numbered release.
const INFINITY_WORDS: [&str; 6] = ["develop", "main", "master", "head", "trunk", "stable"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Num(u64),
    Alpha(String),
}

impl Component {
    fn infinity_rank(&self) -> Option<usize> {
        match self {
            Component::Alpha(s) => INFINITY_WORDS
                .iter()
                .position(|w| w.eq_ignore_ascii_case(s))
                // develop > main > master > ...
                .map(|idx| INFINITY_WORDS.len() - idx),
            Component::Num(_) => None,
        }
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.infinity_rank(), other.infinity_rank()) {
            (Some(a), Some(b)) => return a.cmp(&b),
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (None, None) => {}
        }
        match (self, other) {
            (Component::Num(a), Component::Num(b)) => a.cmp(b),
            (Component::Alpha(a), Component::Alpha(b)) => a.cmp(b),
            (Component::Num(_), Component::Alpha(_)) => Ordering::Greater,
            (Component::Alpha(_), Component::Num(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A single package version such as `11.2.0`, `1.2rc1` or `develop`.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    components: Vec<Component>,
}

impl Version {
    pub fn parse(raw: &str) -> Result<Self, SpecParseError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SpecParseError::InvalidVersion {
                input: raw.to_string(),
                message: "empty version".to_string(),
            });
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        {
            return Err(SpecParseError::InvalidVersion {
                input: raw.to_string(),
                message: format!("unexpected character {bad:?}"),
            });
        }

        let mut components: Vec<Component> = vec![];
        for segment in raw.split(['.', '-', '_']) {
            if segment.is_empty() {
                return Err(SpecParseError::InvalidVersion {
                    input: raw.to_string(),
                    message: "empty version component".to_string(),
                });
            }
            split_alnum_runs(segment, &mut components);
        }

        Ok(Self {
            raw: raw.to_string(),
            components,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when `self` names `other` or one of its ancestors (`11` for `11.2.0`).
    pub fn is_prefix_of(&self, other: &Version) -> bool {
        self.components.len() <= other.components.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }
}

fn split_alnum_runs(segment: &str, out: &mut Vec<Component>) {
    let mut current = String::new();
    let mut current_is_digit: Option<bool> = None;
    for c in segment.chars() {
        let is_digit = c.is_ascii_digit();
        if current_is_digit.is_some_and(|d| d != is_digit) {
            out.push(make_component(&current));
            current.clear();
        }
        current.push(c);
        current_is_digit = Some(is_digit);
    }
    if !current.is_empty() {
        out.push(make_component(&current));
    }
}

fn make_component(s: &str) -> Component {
    match s.parse::<u64>() {
        Ok(n) => Component::Num(n),
        Err(_) => Component::Alpha(s.to_ascii_lowercase()),
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for Version {}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum VersionAlternative {
    Exact(Version),
    /// `11.2` matches `11.2` and every `11.2.x`.
    Prefix(Version),
    Range {
        lo: Option<Version>,
        hi: Option<Version>,
    },
}

impl VersionAlternative {
    fn contains(&self, v: &Version) -> bool {
        match self {
            VersionAlternative::Exact(exact) => exact == v,
            VersionAlternative::Prefix(p) => p.is_prefix_of(v),
            VersionAlternative::Range { lo, hi } => {
                lo.as_ref().is_none_or(|lo| v >= lo)
                    && hi.as_ref().is_none_or(|hi| v <= hi || hi.is_prefix_of(v))
            }
        }
    }

    /// Whether every version in `lo:hi` falls inside this one alternative.
    fn covers_range(&self, lo: &Version, hi: &Version) -> bool {
        match self {
            VersionAlternative::Exact(_) => false,
            VersionAlternative::Prefix(p) => p.is_prefix_of(lo) && p.is_prefix_of(hi),
            VersionAlternative::Range { .. } => self.contains(lo) && self.contains(hi),
        }
    }
}

impl fmt::Display for VersionAlternative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionAlternative::Exact(v) => write!(f, "={v}"),
            VersionAlternative::Prefix(v) => write!(f, "{v}"),
            VersionAlternative::Range { lo, hi } => {
                if let Some(lo) = lo {
                    write!(f, "{lo}")?;
                }
                f.write_str(":")?;
                if let Some(hi) = hi {
                    write!(f, "{hi}")?;
                }
                Ok(())
            }
        }
    }
}

/// Right-hand side of `name@...`: one or more comma-separated alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    alternatives: Vec<VersionAlternative>,
}

impl VersionConstraint {
    pub fn parse(raw: &str) -> Result<Self, SpecParseError> {
        let mut alternatives = vec![];
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(SpecParseError::InvalidVersion {
                    input: raw.to_string(),
                    message: "empty version alternative".to_string(),
                });
            }
            let alt = if let Some(exact) = part.strip_prefix('=') {
                VersionAlternative::Exact(Version::parse(exact)?)
            } else if let Some((lo, hi)) = part.split_once(':') {
                let lo = if lo.is_empty() {
                    None
                } else {
                    Some(Version::parse(lo)?)
                };
                let hi = if hi.is_empty() {
                    None
                } else {
                    Some(Version::parse(hi)?)
                };
                if let (Some(l), Some(h)) = (&lo, &hi)
                    && l > h
                    && !h.is_prefix_of(l)
                {
                    return Err(SpecParseError::InvalidVersion {
                        input: raw.to_string(),
                        message: format!("empty range {l}:{h}"),
                    });
                }
                VersionAlternative::Range { lo, hi }
            } else {
                VersionAlternative::Prefix(Version::parse(part)?)
            };
            alternatives.push(alt);
        }
        Ok(Self { alternatives })
    }

    pub fn exact(version: Version) -> Self {
        Self {
            alternatives: vec![VersionAlternative::Exact(version)],
        }
    }

    pub fn contains(&self, v: &Version) -> bool {
        self.alternatives.iter().any(|alt| alt.contains(v))
    }

    /// True when every version admitted by `self` is also admitted by `other`.
    ///
    /// Single versions are checked directly. A bounded range must fit inside
    /// one alternative of `other`. Unbounded ranges are never considered a subset.
    pub fn is_within(&self, other: &VersionConstraint) -> bool {
        self.alternatives.iter().all(|alt| match alt {
            VersionAlternative::Exact(v) | VersionAlternative::Prefix(v) => other.contains(v),
            VersionAlternative::Range {
                lo: Some(lo),
                hi: Some(hi),
            } => other
                .alternatives
                .iter()
                .any(|candidate| candidate.covers_range(lo, hi)),
            VersionAlternative::Range { .. } => false,
        })
    }

    /// The pinned version, when the constraint names exactly one.
    pub fn single(&self) -> Option<&Version> {
        match self.alternatives.as_slice() {
            [VersionAlternative::Exact(v)] | [VersionAlternative::Prefix(v)] => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, alt) in self.alternatives.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{alt}")?;
        }
        Ok(())
    }
}
