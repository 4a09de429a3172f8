//! Variable expansion and `if` condition evaluation for recipe steps

use super::Manifest;
use crate::config::HepswConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Live variable mapping during a walk
pub type Variables = BTreeMap<String, String>;

const OPTIONS_PREFIX: &str = "OPTIONS_";

/// What to do with a condition that fits no known expression family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionPolicy {
    /// Treat it as true so unknown syntax does not drop steps
    #[default]
    FailOpen,
    /// Treat it as false
    Skip,
}

/// Result of evaluating one condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionOutcome {
    pub result: bool,
    pub reason: String,
    /// False when the expression matched no known family and the policy decided
    pub evaluable: bool,
}

/// Replace `${NAME}` and `$NAME` references with their values.
///
/// `$NAME` takes the longest run of `[A-Za-z0-9_]`. Unknown names are left as
/// written.
pub fn expand_variables(input: &str, variables: &Variables) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            if let Some(end) = braced.find('}') {
                let name = &braced[..end];
                match variables.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[pos..pos + end + 3]),
                }
                rest = &braced[end + 1..];
                continue;
            }
        } else {
            let len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            if len > 0 {
                let name = &after[..len];
                match variables.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('$');
                        out.push_str(name);
                    }
                }
                rest = &after[len..];
                continue;
            }
        }

        out.push('$');
        rest = after;
    }

    out.push_str(rest);
    out
}

fn is_truthy(value: &str) -> bool {
    !(value.is_empty() || value == "0" || value == "false")
}

/// Name referenced by a whole-expression `${NAME}` or `$NAME`
fn sole_reference(expr: &str) -> Option<&str> {
    let name = match expr.strip_prefix("${") {
        Some(inner) => inner.strip_suffix('}')?,
        None => expr.strip_prefix('$')?,
    };
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some(name)
    } else {
        None
    }
}

/// Evaluate a step's `if` expression.
///
/// Two families are understood: `OPTIONS_<NAME>` tests whether an option is
/// enabled (case-insensitive, `_` and `-` interchangeable) and a variable name
/// tests the variable's truthiness. A leading `!` negates either.
pub fn evaluate_condition(
    condition: &str,
    options: &[String],
    variables: &Variables,
    policy: ConditionPolicy,
) -> ConditionOutcome {
    let trimmed = condition.trim();
    let (negated, body) = match trimmed.strip_prefix('!') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed),
    };

    // A lone reference to a known variable is tested before expansion so its
    // value is not mistaken for an expression.
    if let Some(name) = sole_reference(body) {
        if let Some(value) = variables.get(name) {
            return variable_outcome(name, value, negated);
        }
    }

    let expanded = expand_variables(body, variables);
    let expr = expanded.strip_prefix("${").unwrap_or(&expanded);
    let expr = expr.strip_suffix('}').unwrap_or(expr).trim();

    let option_name = expr
        .get(..OPTIONS_PREFIX.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(OPTIONS_PREFIX))
        .map(|_| &expr[OPTIONS_PREFIX.len()..])
        .filter(|name| !name.is_empty());

    if let Some(name) = option_name {
        let option = name
            .replace('_', "-")
            .to_ascii_lowercase();
        let enabled = options
            .iter()
            .any(|o| o.replace('_', "-").eq_ignore_ascii_case(&option));

        return ConditionOutcome {
            result: enabled != negated,
            reason: format!(
                "Option '{}' is {}",
                option,
                if enabled { "enabled" } else { "disabled" }
            ),
            evaluable: true,
        };
    }

    if let Some(value) = variables.get(expr) {
        return variable_outcome(expr, value, negated);
    }

    let result = match policy {
        ConditionPolicy::FailOpen => true,
        ConditionPolicy::Skip => {
            warn!("Skipping step with unevaluable condition: {}", condition);
            false
        }
    };
    ConditionOutcome {
        result,
        reason: format!("Cannot evaluate condition: {}", condition),
        evaluable: false,
    }
}

fn variable_outcome(name: &str, value: &str, negated: bool) -> ConditionOutcome {
    ConditionOutcome {
        result: is_truthy(value) != negated,
        reason: format!("Variable '{}' is '{}'", name, value),
        evaluable: true,
    }
}

fn package_dir(base: &Path, manifest: &Manifest) -> String {
    base.join(&manifest.name)
        .join(&manifest.version)
        .to_string_lossy()
        .into_owned()
}

/// Initial variables for walking a manifest.
///
/// Built-ins derived from the package identity and workspace directories come
/// first, then the manifest's build variables (maps applied in order), then
/// the caller's variables.
pub fn seed_variables(manifest: &Manifest, config: &HepswConfig, caller: &Variables) -> Variables {
    let mut vars = Variables::new();
    vars.insert("PACKAGE_NAME".into(), manifest.name.clone());
    vars.insert("PACKAGE_VERSION".into(), manifest.version.clone());
    vars.insert(
        "SOURCE_TYPE".into(),
        manifest
            .source
            .source_type
            .map(|t| t.as_str().to_string())
            .unwrap_or_default(),
    );
    vars.insert("SOURCE_URL".into(), manifest.source.url.clone());
    vars.insert(
        "INSTALL_PREFIX".into(),
        package_dir(&config.installs_dir(), manifest),
    );
    vars.insert("SOURCE_DIR".into(), package_dir(&config.sources_dir(), manifest));
    vars.insert("BUILD_DIR".into(), package_dir(&config.builds_dir(), manifest));

    for map in &manifest.specifications.build.variables {
        vars.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    vars.extend(caller.iter().map(|(k, v)| (k.clone(), v.clone())));
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::fixtures;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn opts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_expansion() {
        let v = vars(&[("PREFIX", "/opt"), ("PREFIX_DIR", "/srv"), ("N", "8")]);
        assert_eq!(expand_variables("${PREFIX}/bin", &v), "/opt/bin");
        assert_eq!(expand_variables("$PREFIX_DIR/x", &v), "/srv/x");
        assert_eq!(expand_variables("-j$N", &v), "-j8");
        assert_eq!(expand_variables("${MISSING} $OTHER", &v), "${MISSING} $OTHER");
        assert_eq!(expand_variables("cost: $5 and $", &v), "cost: $5 and $");
        assert_eq!(expand_variables("${unterminated", &v), "${unterminated");
    }

    #[test]
    fn test_option_conditions() {
        let v = Variables::new();
        let enabled = opts(&["python", "root-fit"]);

        let out = evaluate_condition("${OPTIONS_PYTHON}", &enabled, &v, ConditionPolicy::FailOpen);
        assert!(out.result && out.evaluable);
        assert_eq!(out.reason, "Option 'python' is enabled");

        assert!(evaluate_condition("OPTIONS_ROOT_FIT", &enabled, &v, ConditionPolicy::FailOpen).result);
        assert!(evaluate_condition("options_Root_Fit", &enabled, &v, ConditionPolicy::FailOpen).result);

        let out = evaluate_condition("!${OPTIONS_PYTHON}", &enabled, &v, ConditionPolicy::FailOpen);
        assert!(!out.result);

        let out = evaluate_condition("${OPTIONS_CUDA}", &enabled, &v, ConditionPolicy::FailOpen);
        assert!(!out.result);
        assert_eq!(out.reason, "Option 'cuda' is disabled");
    }

    #[test]
    fn test_variable_conditions() {
        let v = vars(&[("WITH_GUI", "ON"), ("DEBUG", "0"), ("EMPTY", ""), ("OFF", "false")]);
        let none = Vec::new();

        let out = evaluate_condition("WITH_GUI", &none, &v, ConditionPolicy::FailOpen);
        assert!(out.result);
        assert_eq!(out.reason, "Variable 'WITH_GUI' is 'ON'");

        assert!(!evaluate_condition("${DEBUG}", &none, &v, ConditionPolicy::FailOpen).result);
        assert!(!evaluate_condition("$EMPTY", &none, &v, ConditionPolicy::FailOpen).result);
        assert!(!evaluate_condition("OFF", &none, &v, ConditionPolicy::FailOpen).result);
        assert!(evaluate_condition("!DEBUG", &none, &v, ConditionPolicy::FailOpen).result);
    }

    #[test]
    fn test_unevaluable_policy() {
        let none = Vec::new();
        let v = Variables::new();

        let out = evaluate_condition("${ARCH} == x86_64", &none, &v, ConditionPolicy::FailOpen);
        assert!(out.result);
        assert!(!out.evaluable);
        assert_eq!(out.reason, "Cannot evaluate condition: ${ARCH} == x86_64");

        let out = evaluate_condition("${ARCH} == x86_64", &none, &v, ConditionPolicy::Skip);
        assert!(!out.result);
        assert!(!out.evaluable);
    }

    #[test]
    fn test_seeding_order() {
        let manifest = fixtures::root();
        let config = HepswConfig::with_workspace("/ws");
        let caller = vars(&[("CXX_STANDARD", "20")]);
        let v = seed_variables(&manifest, &config, &caller);

        assert_eq!(v["PACKAGE_NAME"], "root");
        assert_eq!(v["SOURCE_TYPE"], "git");
        assert!(v["BUILD_DIR"].ends_with("root/6.30.02"));
        assert!(v["INSTALL_PREFIX"].starts_with("/ws"));
        // Later variable maps override earlier ones when seeding
        assert_eq!(v["CMAKE_BUILD_TYPE"], "Debug");
        assert_eq!(v["CXX_STANDARD"], "20");
    }
}
