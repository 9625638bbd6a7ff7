//! Embedded manifest templates rendered with minijinja

use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde::Serialize;

use super::ManifestSource;
use crate::{Error, Result};

/// A fixed set of named manifest templates
///
/// Built once per controller from `include_str!`'d sources. Undefined
/// variables fail rendering instead of producing empty strings.
pub struct ManifestTemplates {
    env: Environment<'static>,
}

impl ManifestTemplates {
    /// Compile `(artifact, source)` pairs
    pub fn new(templates: &[(&'static str, &'static str)]) -> Result<Self> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        for (name, source) in templates {
            env.add_template(name, source)
                .map_err(|e| Error::render(*name, e.to_string()))?;
        }
        Ok(Self { env })
    }

    /// Names of all known artifacts, sorted
    pub fn artifacts(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.env.templates().map(|(name, _)| name).collect();
        names.sort_unstable();
        names
    }

    /// Bind render values, producing a [`ManifestSource`]
    pub fn bind<V: Serialize>(&self, values: &V) -> BoundManifests<'_> {
        BoundManifests {
            templates: self,
            values: minijinja::Value::from_serialize(values),
        }
    }
}

/// Templates plus the values one reconcile renders them with
pub struct BoundManifests<'a> {
    templates: &'a ManifestTemplates,
    values: minijinja::Value,
}

impl ManifestSource for BoundManifests<'_> {
    fn render(&self, artifact: &str) -> Result<Vec<u8>> {
        let template = self
            .templates
            .env
            .get_template(artifact)
            .map_err(|e| match e.kind() {
                ErrorKind::TemplateNotFound => Error::not_found(format!("manifest {artifact}")),
                _ => Error::render(artifact, e.to_string()),
            })?;
        template
            .render(&self.values)
            .map(String::into_bytes)
            .map_err(|e| Error::render(artifact, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMESPACE: &str = "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {{ namespace }}\n";

    fn templates() -> ManifestTemplates {
        ManifestTemplates::new(&[("klusterlet/namespace.yaml", NAMESPACE)]).unwrap()
    }

    #[test]
    fn renders_with_bound_values() {
        let templates = templates();
        let source = templates.bind(&serde_json::json!({ "namespace": "agent" }));
        let bytes = source.render("klusterlet/namespace.yaml").unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("name: agent\n"));
    }

    #[test]
    fn unknown_artifact_is_not_found() {
        let templates = templates();
        let source = templates.bind(&serde_json::json!({}));
        assert!(source.render("missing.yaml").unwrap_err().is_not_found());
    }

    #[test]
    fn undefined_value_fails_rendering() {
        let templates = templates();
        let source = templates.bind(&serde_json::json!({}));
        let err = source.render("klusterlet/namespace.yaml").unwrap_err();
        assert!(matches!(err, Error::Render { .. }));
    }

    #[test]
    fn invalid_template_is_rejected_at_build() {
        let result = ManifestTemplates::new(&[("bad.yaml", "{{ unclosed")]);
        assert!(result.is_err());
    }

    #[test]
    fn artifacts_are_listed() {
        assert_eq!(templates().artifacts(), vec!["klusterlet/namespace.yaml"]);
    }
}
