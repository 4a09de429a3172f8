//! Manifest linting and comparison
//!
//! Validation collects every issue instead of stopping at the first one, so a
//! manifest with problems can still be inspected, walked or diffed. Only
//! [`ValidationReport::into_result`] turns issues into a failure.

use super::{Dependency, Manifest, RecipePhase};
use crate::models::SourceType;
use crate::version::{is_semver_like, is_valid_constraint};
use crate::{PackageError, Result};
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::fmt;

const CHECKSUM_ALGORITHMS: [&str; 4] = ["md5", "sha1", "sha256", "sha512"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Dotted path such as `specifications.build.dependencies[0].name`
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.field, self.message)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub name: String,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn push(&mut self, severity: Severity, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
            severity,
        });
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Error, field, message);
    }

    fn warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, field, message);
    }

    fn info(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Info, field, message);
    }

    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.with_severity(Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.with_severity(Severity::Warning)
    }

    /// No error-severity issues
    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    /// Any errors or warnings
    pub fn has_issues(&self) -> bool {
        self.issues.iter().any(|i| i.severity != Severity::Info)
    }

    /// Fail on errors, or on warnings too when `strict`
    pub fn into_result(self, strict: bool) -> Result<Self> {
        let errors = self.errors().count();
        let warnings = self.warnings().count();
        if errors > 0 || (strict && warnings > 0) {
            return Err(PackageError::ValidationFailed {
                name: self.name,
                errors,
                warnings,
            });
        }
        Ok(self)
    }
}

fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

fn is_valid_checksum(checksum: &str) -> bool {
    match checksum.split_once(':') {
        Some((algo, hash)) => {
            CHECKSUM_ALGORITHMS.contains(&algo) && !hash.is_empty() && !hash.contains(':')
        }
        None => false,
    }
}

/// Lint a manifest
pub fn validate_manifest(manifest: &Manifest) -> ValidationReport {
    let mut report = ValidationReport {
        name: manifest.name.clone(),
        issues: Vec::new(),
    };

    check_basic_fields(manifest, &mut report);
    check_source(manifest, &mut report);
    check_metadata(manifest, &mut report);
    check_specifications(manifest, &mut report);
    check_recipe(manifest, &mut report);
    check_self_dependency(manifest, &mut report);

    report
}

fn check_basic_fields(manifest: &Manifest, report: &mut ValidationReport) {
    if manifest.name.is_empty() {
        report.error("name", "name is required");
    } else if !is_valid_package_name(&manifest.name) {
        report.error("name", "name must be lowercase alphanumeric with hyphens only");
    }

    if manifest.version.is_empty() {
        report.error("version", "version is required");
    } else if !is_semver_like(&manifest.version) {
        report.warning("version", "version should follow semantic versioning (x.y.z)");
    }

    if manifest.description.is_empty() {
        report.warning("description", "description is recommended");
    } else if manifest.description.chars().count() < 10 {
        report.warning("description", "description should be more descriptive");
    }
}

fn check_source(manifest: &Manifest, report: &mut ValidationReport) {
    let source = &manifest.source;
    let Some(source_type) = source.source_type else {
        report.error("source.type", "source type is required");
        return;
    };

    if source.url.is_empty() {
        report.error("source.url", "source URL is required");
    } else if source_type != SourceType::Local && url::Url::parse(&source.url).is_err() {
        report.error("source.url", "invalid URL format");
    }

    if source_type == SourceType::Git && source.tag.as_deref().unwrap_or_default().is_empty() {
        report.warning("source.tag", "git sources should specify a tag or branch");
    }

    match source.checksum.as_deref() {
        None | Some("") => {
            report.warning("source.checksum", "checksum is recommended for reproducibility")
        }
        Some(checksum) if !is_valid_checksum(checksum) => report.error(
            "source.checksum",
            "invalid checksum format (should be algorithm:hash)",
        ),
        Some(_) => {}
    }
}

fn check_metadata(manifest: &Manifest, report: &mut ValidationReport) {
    let metadata = &manifest.metadata;
    if metadata.authors.is_empty() {
        report.info("metadata.authors", "author information is recommended");
    }
    if metadata.license.as_deref().unwrap_or_default().is_empty() {
        report.warning("metadata.license", "license information is recommended");
    }
    if metadata.homepage.as_deref().unwrap_or_default().is_empty() {
        report.info("metadata.homepage", "homepage URL is recommended");
    }
}

fn check_specifications(manifest: &Manifest, report: &mut ValidationReport) {
    let build = &manifest.specifications.build;
    if build.toolchain.is_empty() {
        report.warning(
            "specifications.build.toolchain",
            "toolchain requirements should be specified",
        );
    }
    if build.targets.is_empty() {
        report.info("specifications.build.targets", "no build targets specified");
    }

    let lists: [(&str, &[Dependency]); 2] = [
        ("specifications.build.dependencies", &build.dependencies),
        (
            "specifications.runtime.dependencies",
            &manifest.specifications.runtime.dependencies,
        ),
    ];

    for (prefix, deps) in lists {
        let mut seen = FxHashSet::default();
        for (i, dep) in deps.iter().enumerate() {
            let field = format!("{}[{}]", prefix, i);
            if dep.name.is_empty() {
                report.error(format!("{}.name", field), "dependency name is required");
            }
            if dep.version.is_empty() {
                report.warning(
                    format!("{}.version", field),
                    "dependency version constraint is recommended",
                );
            } else if !is_valid_constraint(&dep.version) {
                report.warning(
                    format!("{}.version", field),
                    "version constraint format may be invalid",
                );
            }

            if !seen.insert(dep.name.as_str()) {
                report.warning(prefix, format!("duplicate dependency: {}", dep.name));
            }
        }
    }
}

fn check_recipe(manifest: &Manifest, report: &mut ValidationReport) {
    let recipe = &manifest.recipe;
    if recipe.total_steps() == 0 {
        report.error("recipe", "recipe must contain at least one step");
        return;
    }

    for phase in RecipePhase::ALL {
        for (i, step) in recipe.steps(phase).iter().enumerate() {
            let field = format!("recipe.{}[{}]", phase, i);

            if step.name.is_empty() {
                report.warning(format!("{}.name", field), "step name is recommended");
            }
            if step.command.is_none() && step.script.is_none() && step.set.is_empty() {
                report.error(field.clone(), "step must have command, script, or set field");
            }
            if step.command.is_some() && step.script.is_some() {
                report.error(field.clone(), "step cannot have both command and script");
            }
            if let Some(condition) = step.condition.as_deref() {
                if !condition.is_empty() && !condition.contains("${") {
                    report.warning(format!("{}.if", field), "conditional syntax may be invalid");
                }
            }
        }
    }

    if recipe.build.is_empty() {
        report.warning("recipe.build", "no build steps defined");
    }
    if recipe.install.is_empty() {
        report.warning("recipe.install", "no install steps defined");
    }
}

fn check_self_dependency(manifest: &Manifest, report: &mut ValidationReport) {
    if manifest.name.is_empty() {
        return;
    }
    if manifest
        .accessor()
        .all_dependencies()
        .any(|dep| dep.name == manifest.name)
    {
        report.error("dependencies", "package cannot depend on itself");
    }
}

fn source_type_label(source_type: Option<SourceType>) -> &'static str {
    source_type.map_or("none", |t| t.as_str())
}

/// Human-readable list of top-level differences between two manifests
pub fn diff_manifests(old: &Manifest, new: &Manifest) -> Vec<String> {
    let mut diffs = Vec::new();

    if old.name != new.name {
        diffs.push(format!("Name: {} -> {}", old.name, new.name));
    }
    if old.version != new.version {
        diffs.push(format!("Version: {} -> {}", old.version, new.version));
    }
    if old.description != new.description {
        diffs.push("Description changed".to_string());
    }
    if old.source.source_type != new.source.source_type {
        diffs.push(format!(
            "Source type: {} -> {}",
            source_type_label(old.source.source_type),
            source_type_label(new.source.source_type)
        ));
    }
    if old.source.url != new.source.url {
        diffs.push("Source URL changed".to_string());
    }

    let (old_deps, new_deps) = (
        old.specifications.build.dependencies.len(),
        new.specifications.build.dependencies.len(),
    );
    if old_deps != new_deps {
        diffs.push(format!(
            "Build dependencies count: {} -> {}",
            old_deps, new_deps
        ));
    }

    let (old_runtime, new_runtime) = (
        old.specifications.runtime.dependencies.len(),
        new.specifications.runtime.dependencies.len(),
    );
    if old_runtime != new_runtime {
        diffs.push(format!(
            "Runtime dependencies count: {} -> {}",
            old_runtime, new_runtime
        ));
    }

    if old.recipe.build.len() != new.recipe.build.len() {
        diffs.push(format!(
            "Build steps count: {} -> {}",
            old.recipe.build.len(),
            new.recipe.build.len()
        ));
    }

    diffs
}
