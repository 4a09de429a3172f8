//! Read-only queries over a loaded manifest

use super::{Dependency, Manifest, RecipePhase, RecipeStep};
use std::collections::BTreeMap;

/// Environment map selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvScope {
    Build,
    Runtime,
    /// Variables the package exports to its dependents
    SelfScope,
}

impl EnvScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "build" => Some(EnvScope::Build),
            "runtime" => Some(EnvScope::Runtime),
            "self" => Some(EnvScope::SelfScope),
            _ => None,
        }
    }
}

/// Borrowing view over a manifest
#[derive(Debug, Clone, Copy)]
pub struct ManifestAccessor<'a> {
    manifest: &'a Manifest,
}

impl<'a> ManifestAccessor<'a> {
    pub fn new(manifest: &'a Manifest) -> Self {
        Self { manifest }
    }

    pub fn manifest(&self) -> &'a Manifest {
        self.manifest
    }

    pub fn build_dependencies(&self) -> &'a [Dependency] {
        &self.manifest.specifications.build.dependencies
    }

    pub fn runtime_dependencies(&self) -> &'a [Dependency] {
        &self.manifest.specifications.runtime.dependencies
    }

    /// Build dependencies followed by runtime dependencies
    pub fn all_dependencies(&self) -> impl Iterator<Item = &'a Dependency> {
        self.build_dependencies()
            .iter()
            .chain(self.runtime_dependencies())
    }

    /// Dependencies that apply for the enabled options.
    ///
    /// A dependency without `forOptions` always applies; otherwise any one of
    /// its options being enabled is enough. Each dependency appears once.
    pub fn dependencies_for_options(&self, options: &[String]) -> Vec<&'a Dependency> {
        self.all_dependencies()
            .filter(|dep| dep.applies_to(options))
            .collect()
    }

    /// First build variable map defining `key` answers
    pub fn build_variable(&self, key: &str) -> Option<&'a str> {
        self.manifest
            .specifications
            .build
            .variables
            .iter()
            .find_map(|map| map.get(key))
            .map(String::as_str)
    }

    pub fn environment(&self, scope: EnvScope) -> &'a BTreeMap<String, String> {
        let env = &self.manifest.specifications.environment;
        match scope {
            EnvScope::Build => &env.build,
            EnvScope::Runtime => &env.runtime,
            EnvScope::SelfScope => &env.self_,
        }
    }

    pub fn environment_variable(&self, scope: EnvScope, key: &str) -> Option<&'a str> {
        self.environment(scope).get(key).map(String::as_str)
    }

    /// Steps of a named phase; unknown phases have no steps
    pub fn steps_by_phase(&self, phase: &str) -> &'a [RecipeStep] {
        match RecipePhase::parse(phase) {
            Some(phase) => self.manifest.recipe.steps(phase),
            None => &[],
        }
    }

    /// Every recipe step in execution order
    pub fn all_recipe_steps(&self) -> impl Iterator<Item = &'a RecipeStep> {
        let recipe = &self.manifest.recipe;
        RecipePhase::ALL
            .into_iter()
            .flat_map(move |phase| recipe.steps(phase).iter())
    }

    pub fn get_dependency(&self, name: &str) -> Option<&'a Dependency> {
        self.all_dependencies().find(|dep| dep.name == name)
    }

    pub fn has_dependency(&self, name: &str) -> bool {
        self.get_dependency(name).is_some()
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.manifest
            .specifications
            .build
            .options
            .iter()
            .any(|o| o.name() == option)
    }

    pub fn supports_target(&self, target: &str) -> bool {
        self.manifest
            .specifications
            .build
            .targets
            .iter()
            .any(|t| t.name == target)
    }

    pub fn full_identifier(&self) -> String {
        self.manifest.full_identifier()
    }
}
