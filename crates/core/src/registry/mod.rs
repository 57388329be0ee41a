//! Field to storage platform bindings.
//!
//! The registry is built once from the data dictionary by scanning field
//! annotations for per-platform markers:
//!
//! ```text
//! @AZURE-STORAGE=consents
//! @GOOGLE-STORAGE=study-bucket/site-a/uploads
//! ```
//!
//! The first path segment of the annotation value is the bucket or
//! container; anything after it is an inline upload prefix. A field claimed
//! by two annotations is a configuration error. A field without an
//! annotation has no binding and every broker operation on it fails closed.

mod error;

use std::collections::HashMap;

use fieldvault_shared::Platform;
use regex::Regex;
use serde::Serialize;

use crate::platform::PlatformError;
use crate::platform::azure::normalize_container_name;
use crate::project::ProjectMetadata;

pub use error::RegistryError;

/// Binding of a form field to its storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldBinding {
    /// Form field name.
    pub field_name: String,
    /// Platform that owns the field's files.
    pub platform: Platform,
    /// Bucket or container name, as written in the annotation.
    pub container: String,
    /// Prefix prepended to every object key of this field.
    pub upload_prefix: String,
}

/// Immutable map of field name to [`FieldBinding`].
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    bindings: HashMap<String, FieldBinding>,
}

impl FieldRegistry {
    /// Build the registry from the data dictionary.
    ///
    /// Only `enabled` platforms are scanned. `container_prefix` supplies the
    /// configured prefix for a container when the annotation has none.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if any field is claimed twice or an
    /// annotation names no usable bucket or container.
    pub fn build<F>(
        metadata: &ProjectMetadata,
        enabled: &[Platform],
        container_prefix: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(Platform, &str) -> String,
    {
        let mut bindings: HashMap<String, FieldBinding> = HashMap::new();

        for &platform in enabled {
            let pattern = annotation_pattern(platform);

            for field in &metadata.fields {
                for captures in pattern.captures_iter(&field.annotation) {
                    let value = captures.get(1).map_or("", |m| m.as_str().trim());
                    let (container, inline_prefix) = split_annotation(&field.name, platform, value)?;

                    if let Some(existing) = bindings.get(&field.name) {
                        return Err(RegistryError::duplicate(
                            &field.name,
                            existing.platform,
                            platform,
                        ));
                    }

                    let upload_prefix =
                        inline_prefix.unwrap_or_else(|| container_prefix(platform, &container));

                    bindings.insert(
                        field.name.clone(),
                        FieldBinding {
                            field_name: field.name.clone(),
                            platform,
                            container,
                            upload_prefix,
                        },
                    );
                }
            }
        }

        Ok(Self { bindings })
    }

    /// Resolve the binding for `field_name`.
    #[must_use]
    pub fn resolve(&self, field_name: &str) -> Option<&FieldBinding> {
        self.bindings.get(field_name)
    }

    /// All bindings, sorted by field name.
    #[must_use]
    pub fn bindings(&self) -> Vec<&FieldBinding> {
        let mut all: Vec<_> = self.bindings.values().collect();
        all.sort_by(|a, b| a.field_name.cmp(&b.field_name));
        all
    }

    /// Bindings owned by `platform`, sorted by field name.
    #[must_use]
    pub fn fields_for(&self, platform: Platform) -> Vec<&FieldBinding> {
        self.bindings()
            .into_iter()
            .filter(|b| b.platform == platform)
            .collect()
    }

    /// Number of bound fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no field is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

fn annotation_pattern(platform: Platform) -> Regex {
    let marker = regex::escape(platform.annotation_marker());
    // The marker is a fixed literal, so the pattern always compiles.
    Regex::new(&format!(r"(?m)^[ \t]*@{marker}=(.*)$")).expect("valid annotation pattern")
}

/// Split `bucket/optional/prefix` into its container and prefix parts.
fn split_annotation(
    field: &str,
    platform: Platform,
    value: &str,
) -> Result<(String, Option<String>), RegistryError> {
    let value = value.trim_end_matches('\r').trim();
    if value.is_empty() {
        return Err(RegistryError::EmptyAnnotation {
            field: field.to_string(),
            platform,
        });
    }

    let (container, prefix) = match value.split_once('/') {
        Some((container, rest)) => {
            let rest = rest.trim_matches('/');
            (container, (!rest.is_empty()).then(|| rest.to_string()))
        }
        None => (value, None),
    };

    let checked = match platform {
        Platform::Azure => check_azure_container(container),
        Platform::Google => check_google_bucket(container),
    };
    if let Err(reason) = checked {
        return Err(RegistryError::InvalidContainer {
            field: field.to_string(),
            platform,
            value: value.to_string(),
            reason,
        });
    }

    Ok((container.to_string(), prefix))
}

/// Azure container names are matched case-insensitively, so mixed case is
/// accepted here and lower-cased by the adapter.
fn check_azure_container(name: &str) -> Result<(), &'static str> {
    match normalize_container_name(name) {
        Ok(_) => Ok(()),
        Err(PlatformError::InvalidContainer { reason, .. }) => Err(reason),
        Err(_) => Err("not a valid container name"),
    }
}

/// Bucket naming rules of Cloud Storage.
fn check_google_bucket(name: &str) -> Result<(), &'static str> {
    let max_len = if name.contains('.') { 222 } else { 63 };
    if !(3..=max_len).contains(&name.len()) {
        return Err("must be 3 to 63 characters, or up to 222 with dots");
    }
    if !name.chars().all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')
    }) {
        return Err("only lowercase letters, digits, hyphens, underscores and dots are allowed");
    }
    let alnum = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !alnum(name.chars().next()) || !alnum(name.chars().last()) {
        return Err("must start and end with a letter or digit");
    }
    if name.split('.').any(|part| part.is_empty() || part.len() > 63) {
        return Err("dot-separated parts must be 1 to 63 characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::FieldMetadata;
    use rstest::rstest;

    fn field(name: &str, annotation: &str) -> FieldMetadata {
        FieldMetadata {
            name: name.to_string(),
            form: "uploads".to_string(),
            annotation: annotation.to_string(),
        }
    }

    fn metadata(fields: Vec<FieldMetadata>) -> ProjectMetadata {
        ProjectMetadata {
            fields,
            ..ProjectMetadata::default()
        }
    }

    fn no_prefix(_: Platform, _: &str) -> String {
        String::new()
    }

    #[test]
    fn test_build_binds_annotated_fields() {
        let meta = metadata(vec![
            field("record_id", ""),
            field("photo_field", "@GOOGLE-STORAGE=study-bucket"),
            field("consent_pdf", "@HIDDEN\n@AZURE-STORAGE=Consents\n"),
        ]);

        let registry =
            FieldRegistry::build(&meta, &[Platform::Azure, Platform::Google], no_prefix)
                .expect("valid registry");

        assert_eq!(registry.len(), 2);
        let photo = registry.resolve("photo_field").expect("photo bound");
        assert_eq!(photo.platform, Platform::Google);
        assert_eq!(photo.container, "study-bucket");

        let consent = registry.resolve("consent_pdf").expect("consent bound");
        assert_eq!(consent.platform, Platform::Azure);
        assert_eq!(consent.container, "Consents");

        assert!(registry.resolve("record_id").is_none());
        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn test_disabled_platform_is_not_scanned() {
        let meta = metadata(vec![
            field("photo_field", "@GOOGLE-STORAGE=study-bucket"),
            field("consent_pdf", "@AZURE-STORAGE=consents"),
        ]);

        let registry =
            FieldRegistry::build(&meta, &[Platform::Azure], no_prefix).expect("valid registry");

        assert!(registry.resolve("photo_field").is_none());
        assert_eq!(registry.fields_for(Platform::Azure).len(), 1);
        assert!(registry.fields_for(Platform::Google).is_empty());
    }

    #[test]
    fn test_field_claimed_by_two_platforms_is_rejected() {
        let meta = metadata(vec![field(
            "photo_field",
            "@AZURE-STORAGE=photos\n@GOOGLE-STORAGE=study-bucket",
        )]);

        let err = FieldRegistry::build(&meta, &[Platform::Azure, Platform::Google], no_prefix)
            .unwrap_err();

        assert_eq!(
            err,
            RegistryError::duplicate("photo_field", Platform::Azure, Platform::Google)
        );
    }

    #[test]
    fn test_field_claimed_twice_by_same_platform_is_rejected() {
        let meta = metadata(vec![field(
            "photo_field",
            "@AZURE-STORAGE=photos\n@AZURE-STORAGE=scans",
        )]);

        let err = FieldRegistry::build(&meta, &[Platform::Azure], no_prefix).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateBinding { .. }));
    }

    #[test]
    fn test_inline_prefix_overrides_configured_prefix() {
        let meta = metadata(vec![
            field("photo_field", "@GOOGLE-STORAGE=study-bucket/site-a/uploads/"),
            field("scan_field", "@GOOGLE-STORAGE=study-bucket"),
        ]);

        let registry = FieldRegistry::build(&meta, &[Platform::Google], |_, container| {
            format!("{container}-prefix")
        })
        .expect("valid registry");

        assert_eq!(
            registry.resolve("photo_field").map(|b| b.upload_prefix.as_str()),
            Some("site-a/uploads")
        );
        assert_eq!(
            registry.resolve("scan_field").map(|b| b.upload_prefix.as_str()),
            Some("study-bucket-prefix")
        );
    }

    #[test]
    fn test_empty_annotation_is_rejected() {
        let meta = metadata(vec![field("photo_field", "@GOOGLE-STORAGE=  ")]);
        let err = FieldRegistry::build(&meta, &[Platform::Google], no_prefix).unwrap_err();
        assert!(matches!(err, RegistryError::EmptyAnnotation { .. }));
    }

    #[test]
    fn test_invalid_container_is_rejected() {
        let meta = metadata(vec![field("photo_field", "@AZURE-STORAGE=my container")]);
        let err = FieldRegistry::build(&meta, &[Platform::Azure], no_prefix).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidContainer { .. }));
    }

    #[rstest]
    #[case::azure_underscore(Platform::Azure, "my_container")]
    #[case::azure_dot(Platform::Azure, "my.container")]
    #[case::azure_double_hyphen(Platform::Azure, "my--container")]
    #[case::azure_too_short(Platform::Azure, "ab")]
    #[case::google_upper_case(Platform::Google, "Study-Bucket")]
    #[case::google_leading_hyphen(Platform::Google, "-study-bucket")]
    #[case::google_empty_dot_part(Platform::Google, "study..bucket")]
    fn test_platform_naming_rules(#[case] platform: Platform, #[case] container: &str) {
        let annotation = format!("@{}={container}", platform.annotation_marker());
        let meta = metadata(vec![field("photo_field", &annotation)]);

        let err = FieldRegistry::build(&meta, &[platform], no_prefix).unwrap_err();
        assert!(
            matches!(err, RegistryError::InvalidContainer { platform: p, .. } if p == platform),
            "{container} should be rejected for {platform}"
        );
    }

    #[rstest]
    #[case(Platform::Azure, "Consents-2024")]
    #[case(Platform::Google, "study_bucket.example.org")]
    fn test_platform_naming_rules_accept(#[case] platform: Platform, #[case] container: &str) {
        let annotation = format!("@{}={container}", platform.annotation_marker());
        let meta = metadata(vec![field("photo_field", &annotation)]);

        let registry = FieldRegistry::build(&meta, &[platform], no_prefix).expect("valid name");
        assert_eq!(
            registry.resolve("photo_field").map(|b| b.container.as_str()),
            Some(container)
        );
    }

    #[test]
    fn test_marker_must_start_the_line() {
        let meta = metadata(vec![field("notes", "see @AZURE-STORAGE=photos for details")]);
        let registry = FieldRegistry::build(&meta, &[Platform::Azure], no_prefix)
            .expect("valid registry");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_bindings_sorted_by_field_name() {
        let meta = metadata(vec![
            field("zeta", "@AZURE-STORAGE=photos"),
            field("alpha", "@AZURE-STORAGE=photos"),
        ]);
        let registry = FieldRegistry::build(&meta, &[Platform::Azure], no_prefix)
            .expect("valid registry");
        let names: Vec<_> = registry
            .bindings()
            .iter()
            .map(|b| b.field_name.as_str())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
