//! Build manifests: types and loading
//!
//! A manifest describes one package version: where its source lives, what it
//! depends on, which build options it offers and the recipe that builds it.

pub mod accessor;
pub mod evaluator;
pub mod validator;
pub mod walker;

use crate::models::SourceType;
use crate::{PackageError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

pub use accessor::ManifestAccessor;
pub use evaluator::{ConditionOutcome, ConditionPolicy, Variables};
pub use validator::{diff_manifests, validate_manifest, Severity, ValidationIssue, ValidationReport};
pub use walker::{flatten_manifest, walk_manifest, PhaseWalk, StepWalk, WalkResult};

/// A package build manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default)]
    pub source: SourceSpec,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub specifications: Specifications,

    #[serde(default)]
    pub recipe: Recipe,
}

/// Where to fetch the package source from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    /// Git tag or branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// `algo:hash`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Specifications {
    #[serde(default)]
    pub build: BuildSpec,

    #[serde(default)]
    pub runtime: RuntimeSpec,

    #[serde(default)]
    pub environment: EnvironmentSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub toolchain: Vec<Tool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<BuildOption>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,

    /// Ordered list of variable maps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

/// Environment variables per scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub runtime: BTreeMap<String, String>,

    #[serde(rename = "self", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub self_: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
}

/// Build option: a bare name or a typed declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildOption {
    Name(String),

    Declared {
        name: String,

        #[serde(rename = "type", default)]
        option_type: OptionType,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<serde_yaml::Value>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl BuildOption {
    pub fn name(&self) -> &str {
        match self {
            BuildOption::Name(name) => name,
            BuildOption::Declared { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    #[default]
    Bool,
    String,
    Int,
    Enum,
    List,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyScope {
    Build,
    Runtime,
    Test,
    #[default]
    All,
}

/// A dependency declared by a manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub name: String,

    /// Version constraint such as `>=3.20`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Options that pull this dependency in; any one suffices
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub for_options: Vec<String>,

    /// Options to enable on the dependency itself
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub with_options: Vec<String>,

    #[serde(default, alias = "isOptional", skip_serializing_if = "is_false")]
    pub optional: bool,

    #[serde(default)]
    pub scope: DependencyScope,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Dependency {
    /// Whether the dependency applies given the enabled options
    pub fn applies_to(&self, options: &[String]) -> bool {
        self.for_options.is_empty() || self.for_options.iter().any(|o| options.contains(o))
    }
}

/// Ordered recipe steps per phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configuration: Vec<RecipeStep>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build: Vec<RecipeStep>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install: Vec<RecipeStep>,

    #[serde(rename = "use", default, skip_serializing_if = "Vec::is_empty")]
    pub use_: Vec<RecipeStep>,
}

impl Recipe {
    pub fn steps(&self, phase: RecipePhase) -> &[RecipeStep] {
        match phase {
            RecipePhase::Configuration => &self.configuration,
            RecipePhase::Build => &self.build,
            RecipePhase::Install => &self.install,
            RecipePhase::Use => &self.use_,
        }
    }

    pub fn steps_mut(&mut self, phase: RecipePhase) -> &mut Vec<RecipeStep> {
        match phase {
            RecipePhase::Configuration => &mut self.configuration,
            RecipePhase::Build => &mut self.build,
            RecipePhase::Install => &mut self.install,
            RecipePhase::Use => &mut self.use_,
        }
    }

    pub fn total_steps(&self) -> usize {
        RecipePhase::ALL.iter().map(|p| self.steps(*p).len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipePhase {
    Configuration,
    Build,
    Install,
    Use,
}

impl RecipePhase {
    /// Execution order
    pub const ALL: [RecipePhase; 4] = [
        RecipePhase::Configuration,
        RecipePhase::Build,
        RecipePhase::Install,
        RecipePhase::Use,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecipePhase::Configuration => "configuration",
            RecipePhase::Build => "build",
            RecipePhase::Install => "install",
            RecipePhase::Use => "use",
        }
    }

    /// Parse a phase name; `configure` is accepted for `configuration`
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "configuration" | "configure" => Some(RecipePhase::Configuration),
            "build" => Some(RecipePhase::Build),
            "install" => Some(RecipePhase::Install),
            "use" => Some(RecipePhase::Use),
            _ => None,
        }
    }
}

impl fmt::Display for RecipePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recipe step. Exactly one of `command`, `script` or `set` is expected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStep {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, alias = "working_dir", skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Variable assignments applied when the step is reached
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, String>,
}

impl RecipeStep {
    pub fn is_conditional(&self) -> bool {
        self.condition.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

impl Manifest {
    /// Load a manifest; `.yaml`/`.yml` files are YAML, anything else JSON
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| PackageError::InvalidManifest {
            path: path.to_path_buf(),
            message: format!("Failed to read file: {}", e),
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let parsed = if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_json_str(&content)
        };

        parsed.map_err(|e| PackageError::InvalidManifest {
            path: path.to_path_buf(),
            message: format!("Failed to parse manifest: {}", e),
        })
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// `name@version`
    pub fn full_identifier(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    pub fn accessor(&self) -> ManifestAccessor<'_> {
        ManifestAccessor::new(self)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::Manifest;

    pub const ROOT_YAML: &str = r#"
name: root
version: 6.30.02
description: CERN ROOT data analysis framework
source:
  type: git
  url: https://github.com/root-project/root.git
  tag: v6-30-02
  checksum: sha256:abc123
metadata:
  authors: [ROOT Team]
  license: LGPL-2.1
specifications:
  build:
    toolchain:
      - name: gcc
        version: ">=11"
    targets:
      - name: linux
        architecture: x86_64
    options: [python, roofit, { name: jobs, type: int, default: 8 }]
    dependencies:
      - name: cmake
        version: ">=3.20"
      - name: python
        version: ">=3.8"
        forOptions: [python]
      - name: gsl
        version: ">=2.5"
        forOptions: [roofit, mathmore]
    variables:
      - CMAKE_BUILD_TYPE: Release
        CXX_STANDARD: "17"
      - CMAKE_BUILD_TYPE: Debug
  runtime:
    dependencies:
      - name: python
        version: ">=3.8"
        forOptions: [python]
        isOptional: true
  environment:
    build:
      CC: gcc
    runtime:
      ROOTSYS: ${INSTALL_PREFIX}
    self:
      PATH: ${INSTALL_PREFIX}/bin
recipe:
  configuration:
    - name: configure
      command: cmake -S ${SOURCE_DIR} -B ${BUILD_DIR} -DCMAKE_BUILD_TYPE=${CMAKE_BUILD_TYPE}
    - name: enable python
      if: ${OPTIONS_PYTHON}
      set:
        PYROOT: "ON"
  build:
    - name: compile
      command: cmake --build ${BUILD_DIR}
      args: ["-j", "8"]
      workingDir: ${BUILD_DIR}
  install:
    - name: install
      command: cmake --install ${BUILD_DIR} --prefix ${INSTALL_PREFIX}
"#;

    pub fn root() -> Manifest {
        Manifest::from_yaml_str(ROOT_YAML).unwrap()
    }
}
