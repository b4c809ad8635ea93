//! Permission metadata for domain entities.
//!
//! An entity type carries a [`PermissionSpec`] describing its kind, the
//! actions that apply to it and a path template that turns field values into
//! an object path. Entities expose their permission spec and their field values through
//! [`PermissionedEntity`]; nothing is attached at runtime.
//!
//! ```rust,ignore
//! static PROJECT: LazyLock<PermissionSpec> = LazyLock::new(|| {
//!     PermissionSpec::new(
//!         "project",
//!         "organization/{organization}/project/{slug}",
//!         &["view", "update", "delete", "archive"],
//!     )
//!     .expect("valid project template")
//! });
//!
//! impl PermissionedEntity for Project {
//!     fn permission_spec(&self) -> &PermissionSpec { &PROJECT }
//!     fn path_field(&self, field: &str) -> Option<&str> {
//!         match field {
//!             "organization" => Some(&self.organization_slug),
//!             "slug" => Some(&self.slug),
//!             _ => None,
//!         }
//!     }
//! }
//! ```

use super::{EntityError, PathPattern};

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplateSegment {
    Literal(String),
    Field(String),
}

/// Kind, applicable actions and object-path template of an entity type.
#[derive(Debug, Clone)]
pub struct PermissionSpec {
    kind: String,
    template: String,
    segments: Vec<TemplateSegment>,
    actions: Vec<String>,
}

impl PermissionSpec {
    /// `template` uses `{field}` placeholders; wildcards are not allowed.
    pub fn new(kind: &str, template: &str, actions: &[&str]) -> Result<Self, EntityError> {
        let invalid = |reason: String| EntityError::InvalidTemplate {
            template: template.to_string(),
            reason,
        };

        // Same segment grammar as object patterns, minus the wildcards
        PathPattern::parse(template).map_err(|e| invalid(e.to_string()))?;

        let segments = template
            .split('/')
            .map(|segment| {
                if segment == "*" || segment == "**" {
                    return Err(invalid("wildcards are not allowed in templates".into()));
                }
                Ok(match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Some(field) => TemplateSegment::Field(field.to_string()),
                    None => TemplateSegment::Literal(segment.to_string()),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            kind: kind.to_string(),
            template: template.to_string(),
            segments,
            actions: actions.iter().map(|a| a.to_string()).collect(),
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    /// Fully-qualified action name (`project.update`) for an applicable verb.
    pub fn action(&self, verb: &str) -> Result<String, EntityError> {
        if self.actions.iter().any(|a| a == verb) {
            Ok(format!("{}.{}", self.kind, verb))
        } else {
            Err(EntityError::UnknownAction {
                kind: self.kind.clone(),
                verb: verb.to_string(),
            })
        }
    }

    /// Render the object path from field values.
    pub fn render<'a>(
        &self,
        field: impl Fn(&str) -> Option<&'a str>,
    ) -> Result<String, EntityError> {
        let mut parts = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(lit) => parts.push(lit.as_str()),
                TemplateSegment::Field(name) => {
                    let value = field(name).ok_or_else(|| EntityError::MissingField {
                        kind: self.kind.clone(),
                        field: name.clone(),
                    })?;
                    if value.is_empty() || value.contains('/') {
                        return Err(EntityError::InvalidFieldValue {
                            kind: self.kind.clone(),
                            field: name.clone(),
                            value: value.to_string(),
                        });
                    }
                    parts.push(value);
                }
            }
        }
        Ok(parts.join("/"))
    }
}

/// An entity whose access is governed by object-path policies.
pub trait PermissionedEntity {
    fn permission_spec(&self) -> &PermissionSpec;

    /// Value of a field referenced by the path template.
    fn path_field(&self, field: &str) -> Option<&str>;

    fn object_path(&self) -> Result<String, EntityError> {
        self.permission_spec().render(|f| self.path_field(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Project {
        spec: PermissionSpec,
        organization: String,
        slug: String,
    }

    impl PermissionedEntity for Project {
        fn permission_spec(&self) -> &PermissionSpec {
            &self.spec
        }

        fn path_field(&self, field: &str) -> Option<&str> {
            match field {
                "organization" => Some(&self.organization),
                "slug" => Some(&self.slug),
                _ => None,
            }
        }
    }

    fn project(organization: &str, slug: &str) -> Project {
        Project {
            spec: PermissionSpec::new(
                "project",
                "organization/{organization}/project/{slug}",
                &["view", "update"],
            )
            .unwrap(),
            organization: organization.into(),
            slug: slug.into(),
        }
    }

    #[test]
    fn test_object_path_from_fields() {
        let p = project("acme", "survey-1");
        assert_eq!(p.object_path().unwrap(), "organization/acme/project/survey-1");
    }

    #[test]
    fn test_action_names() {
        let p = project("acme", "survey-1");
        assert_eq!(p.permission_spec().action("update").unwrap(), "project.update");
        assert!(matches!(
            p.permission_spec().action("delete"),
            Err(EntityError::UnknownAction { .. })
        ));
    }

    #[test]
    fn test_field_values_must_be_single_segments() {
        let err = project("acme/evil", "x").object_path().unwrap_err();
        assert!(matches!(err, EntityError::InvalidFieldValue { .. }));

        let err = project("", "x").object_path().unwrap_err();
        assert!(matches!(err, EntityError::InvalidFieldValue { .. }));
    }

    #[test]
    fn test_missing_field() {
        let spec = PermissionSpec::new("party", "organization/{organization}/party/{id}", &[])
            .unwrap();
        let err = spec
            .render(|f| (f == "organization").then_some("acme"))
            .unwrap_err();
        assert!(matches!(err, EntityError::MissingField { field, .. } if field == "id"));
    }

    #[test]
    fn test_wildcard_templates_rejected() {
        assert!(PermissionSpec::new("x", "organization/*", &[]).is_err());
        assert!(PermissionSpec::new("x", "organization/**", &[]).is_err());
        assert!(PermissionSpec::new("x", "organization//x", &[]).is_err());
    }
}
