//! Action and object-path patterns.
//!
//! Object paths are slash-delimited (`organization/acme/project/survey-1`),
//! actions are dotted (`project.update`). Patterns are parsed once when a
//! policy is loaded; matching never fails, it only answers yes or no.
//!
//! # Path pattern segments
//!
//! - `literal` matches exactly that segment (case-sensitive)
//! - `*` matches any single non-empty segment
//! - `{name}` matches any single non-empty segment and binds it to `name`
//! - `**` (last segment only) matches one or more remaining segments
//!
//! # Action pattern segments
//!
//! - `literal` matches exactly that segment
//! - `*` matches any single segment

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::PolicyError;

/// Path captures produced by a match, keyed by capture name.
pub type Bindings = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Literal(String),
    Any,
    Capture(String),
    Rest,
}

/// A parsed object-path pattern such as `organization/{org}/project/*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<PathSegment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, PolicyError> {
        if raw.is_empty() {
            return Err(PolicyError::invalid_path(raw, "pattern is empty"));
        }

        let parts: Vec<&str> = raw.split('/').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "" => return Err(PolicyError::invalid_path(raw, "empty segment")),
                "*" => PathSegment::Any,
                "**" if i == last => PathSegment::Rest,
                "**" => {
                    return Err(PolicyError::invalid_path(
                        raw,
                        "`**` is only allowed as the last segment",
                    ));
                }
                part if part.starts_with('{') => {
                    let name = part
                        .strip_prefix('{')
                        .and_then(|p| p.strip_suffix('}'))
                        .ok_or_else(|| PolicyError::invalid_path(raw, "unterminated capture"))?;
                    if !is_capture_name(name) {
                        return Err(PolicyError::invalid_path(
                            raw,
                            format!("invalid capture name `{name}`"),
                        ));
                    }
                    PathSegment::Capture(name.to_string())
                }
                part if part.contains(['*', '{', '}']) => {
                    return Err(PolicyError::invalid_path(
                        raw,
                        format!("wildcard characters inside literal segment `{part}`"),
                    ));
                }
                part => PathSegment::Literal(part.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names of all captures in this pattern, in order of first appearance.
    pub fn capture_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let PathSegment::Capture(name) = segment
                && !names.contains(&name.as_str())
            {
                names.push(name);
            }
        }
        names
    }

    /// Match a concrete path, returning the captured bindings on success.
    pub fn matches(&self, path: &str) -> Option<Bindings> {
        self.matches_with(path, &Bindings::new())
    }

    /// Match a concrete path where some captures are already bound.
    ///
    /// A capture whose name appears in `prebound` only matches that value.
    /// Pre-bound entries are carried into the returned bindings whether or
    /// not this pattern references them.
    pub fn matches_with(&self, path: &str, prebound: &Bindings) -> Option<Bindings> {
        let concrete: Vec<&str> = path.split('/').collect();
        let has_rest = matches!(self.segments.last(), Some(PathSegment::Rest));

        if has_rest {
            // `**` needs at least one segment of its own
            if concrete.len() < self.segments.len() {
                return None;
            }
        } else if concrete.len() != self.segments.len() {
            return None;
        }

        let mut bindings = prebound.clone();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Literal(lit) => {
                    if concrete[i] != lit {
                        return None;
                    }
                }
                PathSegment::Any => {
                    if concrete[i].is_empty() {
                        return None;
                    }
                }
                PathSegment::Capture(name) => {
                    let value = concrete[i];
                    if value.is_empty() {
                        return None;
                    }
                    match bindings.get(name) {
                        Some(bound) if bound != value => return None,
                        Some(_) => {}
                        None => {
                            bindings.insert(name.clone(), value.to_string());
                        }
                    }
                }
                PathSegment::Rest => {
                    if concrete[i..].iter().any(|s| s.is_empty()) {
                        return None;
                    }
                }
            }
        }

        Some(bindings)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for PathPattern {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ActionSegment {
    Literal(String),
    Any,
}

/// A parsed dotted action pattern such as `project.*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPattern {
    raw: String,
    segments: Vec<ActionSegment>,
}

impl ActionPattern {
    pub fn parse(raw: &str) -> Result<Self, PolicyError> {
        if raw.is_empty() {
            return Err(PolicyError::invalid_action(raw, "pattern is empty"));
        }

        let segments = raw
            .split('.')
            .map(|part| match part {
                "" => Err(PolicyError::invalid_action(raw, "empty segment")),
                "*" => Ok(ActionSegment::Any),
                part if part.contains(['*', '{', '}']) => Err(PolicyError::invalid_action(
                    raw,
                    format!("unsupported wildcard in segment `{part}`"),
                )),
                part => Ok(ActionSegment::Literal(part.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, action: &str) -> bool {
        let mut concrete = action.split('.');
        for segment in &self.segments {
            let Some(part) = concrete.next() else {
                return false;
            };
            match segment {
                ActionSegment::Any => {
                    if part.is_empty() {
                        return false;
                    }
                }
                ActionSegment::Literal(lit) => {
                    if part != lit {
                        return false;
                    }
                }
            }
        }
        concrete.next().is_none()
    }
}

impl fmt::Display for ActionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ActionPattern {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.raw)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::parse(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(PathPattern);
string_serde!(ActionPattern);

fn is_capture_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn path(p: &str) -> PathPattern {
        PathPattern::parse(p).unwrap()
    }

    fn bindings(pairs: &[(&str, &str)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[rstest]
    #[case::exact("organization/acme", "organization/acme", true)]
    #[case::literal_mismatch("organization/acme", "organization/other", false)]
    #[case::case_sensitive("organization/acme", "Organization/acme", false)]
    #[case::wildcard("organization/*", "organization/acme", true)]
    #[case::wildcard_single_segment("*", "organization", true)]
    #[case::wildcard_rejects_deeper("*", "organization/acme", false)]
    #[case::wildcard_rejects_empty("organization/*", "organization/", false)]
    #[case::shorter_path("organization/*/project", "organization/acme", false)]
    #[case::longer_path("organization/*", "organization/acme/project", false)]
    #[case::rest_one("organization/**", "organization/acme", true)]
    #[case::rest_many("organization/**", "organization/acme/project/p1", true)]
    #[case::rest_needs_one("organization/**", "organization", false)]
    #[case::rest_rejects_empty("organization/**", "organization/acme//p1", false)]
    #[case::rest_alone("**", "a/b/c", true)]
    #[case::no_normalization("organization/acme", "organization/acme/", false)]
    fn test_path_matching(#[case] pattern: &str, #[case] concrete: &str, #[case] expected: bool) {
        assert_eq!(
            path(pattern).matches(concrete).is_some(),
            expected,
            "{pattern} vs {concrete}"
        );
    }

    #[test]
    fn test_path_captures_are_bound() {
        let result = path("organization/{org}/project/{proj}")
            .matches("organization/acme/project/survey-1")
            .unwrap();
        assert_eq!(
            result,
            bindings(&[("org", "acme"), ("proj", "survey-1")])
        );
    }

    #[test]
    fn test_wildcard_only_match_has_empty_bindings() {
        let result = path("organization/*").matches("organization/acme").unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_repeated_capture_must_agree() {
        let pattern = path("{x}/link/{x}");
        assert_eq!(pattern.matches("a/link/a"), Some(bindings(&[("x", "a")])));
        assert_eq!(pattern.matches("a/link/b"), None);
    }

    #[test]
    fn test_prebound_capture_restricts_match() {
        let pattern = path("organization/{org}/**");
        let prebound = bindings(&[("org", "acme")]);

        assert_eq!(
            pattern.matches_with("organization/acme/project/p1", &prebound),
            Some(bindings(&[("org", "acme")]))
        );
        assert_eq!(
            pattern.matches_with("organization/other/project/p1", &prebound),
            None
        );
    }

    #[test]
    fn test_prebound_unreferenced_names_are_carried() {
        let prebound = bindings(&[("org", "acme")]);
        let result = path("*").matches_with("anything", &prebound).unwrap();
        assert_eq!(result, prebound);
    }

    #[rstest]
    #[case::empty("")]
    #[case::empty_segment("organization//project")]
    #[case::leading_slash("/organization")]
    #[case::rest_not_last("**/project")]
    #[case::unterminated("organization/{org")]
    #[case::empty_capture("organization/{}")]
    #[case::bad_capture_name("organization/{1org}")]
    #[case::partial_wildcard("organization/ac*")]
    #[case::stray_brace("organization/a}b")]
    fn test_invalid_path_patterns(#[case] raw: &str) {
        assert!(PathPattern::parse(raw).is_err(), "{raw:?} should be rejected");
    }

    #[test]
    fn test_capture_names() {
        let pattern = path("organization/{org}/project/{proj}/{org}");
        assert_eq!(pattern.capture_names(), vec!["org", "proj"]);
    }

    #[rstest]
    #[case::exact("project.view", "project.view", true)]
    #[case::exact_mismatch("project.view", "project.update", false)]
    #[case::wildcard_verb("project.*", "project.create", true)]
    #[case::wildcard_noun("*.view", "org.view", true)]
    #[case::wildcard_all("*", "anything", true)]
    #[case::wildcard_no_multi("*", "project.view", false)]
    #[case::count_mismatch("project.*", "project.party.view", false)]
    #[case::count_mismatch_short("project.resource.*", "project.view", false)]
    #[case::case_sensitive("project.view", "Project.view", false)]
    fn test_action_matching(#[case] pattern: &str, #[case] action: &str, #[case] expected: bool) {
        let pattern = ActionPattern::parse(pattern).unwrap();
        assert_eq!(pattern.matches(action), expected, "{pattern} vs {action}");
    }

    #[rstest]
    #[case::empty("")]
    #[case::empty_segment("project..view")]
    #[case::multi_wildcard("project.**")]
    #[case::partial_wildcard("project.vi*")]
    #[case::capture("project.{verb}")]
    fn test_invalid_action_patterns(#[case] raw: &str) {
        assert!(ActionPattern::parse(raw).is_err(), "{raw:?} should be rejected");
    }

    #[test]
    fn test_patterns_deserialize_from_strings() {
        let parsed: Vec<PathPattern> =
            serde_json::from_str(r#"["organization/{org}", "*"]"#).unwrap();
        assert_eq!(parsed[0].as_str(), "organization/{org}");

        let err = serde_json::from_str::<ActionPattern>(r#""project..view""#).unwrap_err();
        assert!(err.to_string().contains("empty segment"));
    }
}
