//! Dry-run walk over a manifest's recipe

use super::evaluator::{evaluate_condition, expand_variables, seed_variables, ConditionPolicy, Variables};
use super::{Manifest, RecipePhase, RecipeStep};
use crate::config::HepswConfig;
use serde::Serialize;
use tracing::debug;

/// Outcome of walking every non-empty phase
#[derive(Debug, Clone, Serialize)]
pub struct WalkResult {
    pub phases: Vec<PhaseWalk>,
    /// Variables after the final step
    pub variables: Variables,
}

impl WalkResult {
    pub fn phase(&self, phase: RecipePhase) -> Option<&PhaseWalk> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepWalk> {
        self.phases.iter().flat_map(|p| p.steps.iter())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseWalk {
    pub phase: RecipePhase,
    pub steps: Vec<StepWalk>,
}

/// One simulated step; command and working dir are expanded
#[derive(Debug, Clone, Serialize)]
pub struct StepWalk {
    pub index: usize,
    pub name: String,
    pub command: Option<String>,
    pub script: Option<String>,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub condition: Option<String>,
    pub will_execute: bool,
    /// False only when the condition matched no known expression
    pub evaluable: bool,
    pub reason: String,
}

/// Simulate the recipe for the given options.
///
/// Variables are seeded from the package identity, the workspace layout, the
/// manifest and finally `variables`. Each step's `set` assignments are
/// expanded against the live mapping and apply to every later step, whether
/// or not the step itself would run.
pub fn walk_manifest(
    manifest: &Manifest,
    options: &[String],
    variables: &Variables,
    config: &HepswConfig,
) -> WalkResult {
    let mut vars = seed_variables(manifest, config, variables);
    let policy = config.user.condition_policy;

    let phases = RecipePhase::ALL
        .into_iter()
        .filter(|phase| !manifest.recipe.steps(*phase).is_empty())
        .map(|phase| PhaseWalk {
            phase,
            steps: manifest
                .recipe
                .steps(phase)
                .iter()
                .enumerate()
                .map(|(index, step)| walk_step(index, step, options, &mut vars, policy))
                .collect(),
        })
        .collect();

    WalkResult {
        phases,
        variables: vars,
    }
}

fn walk_step(
    index: usize,
    step: &RecipeStep,
    options: &[String],
    vars: &mut Variables,
    policy: ConditionPolicy,
) -> StepWalk {
    let mut walk = StepWalk {
        index,
        name: step.name.clone(),
        command: step.command.as_deref().map(|c| expand_variables(c, vars)),
        script: step.script.clone(),
        args: step.args.iter().map(|a| expand_variables(a, vars)).collect(),
        working_dir: step.working_dir.as_deref().map(|d| expand_variables(d, vars)),
        condition: step.condition.clone(),
        will_execute: true,
        evaluable: true,
        reason: String::new(),
    };

    if step.is_conditional() {
        let condition = step.condition.as_deref().unwrap_or_default();
        let outcome = evaluate_condition(condition, options, vars, policy);
        walk.will_execute = outcome.result;
        walk.evaluable = outcome.evaluable;
        walk.reason = outcome.reason;
    }

    if !step.set.is_empty() {
        let assigned: Vec<String> = step
            .set
            .iter()
            .map(|(key, value)| {
                let expanded = expand_variables(value, vars);
                let shown = format!("{}={}", key, expanded);
                vars.insert(key.clone(), expanded);
                shown
            })
            .collect();

        let sets = format!("Sets variables: {}", assigned.join(", "));
        walk.reason = if walk.reason.is_empty() {
            sets
        } else {
            format!("{}; {}", walk.reason, sets)
        };
    }

    debug!(
        "Step {} ({}) will_execute={}",
        index, walk.name, walk.will_execute
    );
    walk
}

/// Project a manifest onto a set of enabled options.
///
/// Build and runtime dependencies not pulled in by any enabled option are
/// dropped, as are recipe steps whose condition is false. Kept steps with a
/// decided condition lose their `if`.
pub fn flatten_manifest(
    manifest: &Manifest,
    options: &[String],
    variables: &Variables,
    config: &HepswConfig,
) -> Manifest {
    let walk = walk_manifest(manifest, options, variables, config);
    let mut flat = manifest.clone();

    flat.specifications
        .build
        .dependencies
        .retain(|dep| dep.applies_to(options));
    flat.specifications
        .runtime
        .dependencies
        .retain(|dep| dep.applies_to(options));

    for phase_walk in &walk.phases {
        let steps = flat.recipe.steps_mut(phase_walk.phase);
        let kept = std::mem::take(steps)
            .into_iter()
            .zip(&phase_walk.steps)
            .filter(|(_, walked)| walked.will_execute)
            .map(|(mut step, walked)| {
                if walked.evaluable {
                    step.condition = None;
                }
                step
            })
            .collect();
        *steps = kept;
    }

    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::fixtures;

    fn config() -> HepswConfig {
        HepswConfig::with_workspace("/ws")
    }

    fn opts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_walk_without_options() {
        let manifest = fixtures::root();
        let result = walk_manifest(&manifest, &[], &Variables::new(), &config());

        assert_eq!(result.phases.len(), 3);
        assert!(result.phase(RecipePhase::Use).is_none());

        let configure = &result.phases[0].steps[0];
        assert_eq!(
            configure.command.as_deref(),
            Some("cmake -S /ws/sources/root/6.30.02 -B /ws/builds/root/6.30.02 -DCMAKE_BUILD_TYPE=Debug")
        );
        assert!(configure.will_execute);

        let python = &result.phases[0].steps[1];
        assert!(!python.will_execute);
        assert_eq!(
            python.reason,
            "Option 'python' is disabled; Sets variables: PYROOT=ON"
        );
        // `set` applies even though the step is skipped
        assert_eq!(result.variables["PYROOT"], "ON");

        let compile = result.phase(RecipePhase::Build).unwrap();
        assert_eq!(
            compile.steps[0].working_dir.as_deref(),
            Some("/ws/builds/root/6.30.02")
        );
    }

    #[test]
    fn test_set_is_visible_to_later_steps() {
        let yaml = r#"
name: demo
version: 1.0.0
recipe:
  configuration:
    - name: pick
      set:
        PREFIX: ${INSTALL_PREFIX}/opt
        FLAG: "1"
  build:
    - name: gated
      if: FLAG
      command: make PREFIX=$PREFIX
"#;
        let manifest = Manifest::from_yaml_str(yaml).unwrap();
        let result = walk_manifest(&manifest, &[], &Variables::new(), &config());

        let gated = &result.phase(RecipePhase::Build).unwrap().steps[0];
        assert!(gated.will_execute);
        assert_eq!(gated.reason, "Variable 'FLAG' is '1'");
        assert_eq!(
            gated.command.as_deref(),
            Some("make PREFIX=/ws/installs/demo/1.0.0/opt")
        );
    }

    #[test]
    fn test_caller_variables_win() {
        let manifest = fixtures::root();
        let mut vars = Variables::new();
        vars.insert("BUILD_DIR".to_string(), "/tmp/b".to_string());

        let result = walk_manifest(&manifest, &[], &vars, &config());
        let compile = &result.phase(RecipePhase::Build).unwrap().steps[0];
        assert_eq!(compile.command.as_deref(), Some("cmake --build /tmp/b"));
    }

    #[test]
    fn test_unevaluable_under_skip_policy() {
        let yaml = r#"
name: demo
version: 1.0.0
recipe:
  build:
    - name: arch only
      if: ${ARCH} == x86_64
      command: make
"#;
        let manifest = Manifest::from_yaml_str(yaml).unwrap();

        let open = walk_manifest(&manifest, &[], &Variables::new(), &config());
        assert!(open.steps().all(|s| s.will_execute && !s.evaluable));

        let mut strict = config();
        strict.user.condition_policy = ConditionPolicy::Skip;
        let skipped = walk_manifest(&manifest, &[], &Variables::new(), &strict);
        assert!(skipped.steps().all(|s| !s.will_execute));
    }

    #[test]
    fn test_flatten() {
        let manifest = fixtures::root();

        let plain = flatten_manifest(&manifest, &[], &Variables::new(), &config());
        assert_eq!(plain.specifications.build.dependencies.len(), 1);
        assert!(plain.specifications.runtime.dependencies.is_empty());
        assert_eq!(plain.recipe.configuration.len(), 1);

        let python = flatten_manifest(&manifest, &opts(&["python"]), &Variables::new(), &config());
        assert_eq!(python.specifications.build.dependencies.len(), 2);
        assert_eq!(python.specifications.runtime.dependencies.len(), 1);
        assert_eq!(python.recipe.configuration.len(), 2);
        assert!(python.recipe.configuration[1].condition.is_none());
        assert_eq!(python.recipe.total_steps(), 4);
    }
}
