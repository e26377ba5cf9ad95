//! Variable resolution and `${...}` rendering
//!
//! Placeholders come in three reference kinds:
//! - `${name}`: a plain variable
//! - `${tasks.<task>.results.<key>}`: a result of a finished sibling TaskRun
//! - `${steps.<step>.output}`: the output of an earlier step in the same run
//!
//! plus function calls `${name(arg, ...)}` resolved through [`functions`].
//! Rendering runs a reference pass followed by a plain-variable pass. Each
//! pass repeats until nothing changes or [`MAX_RENDER_PASSES`] is reached;
//! unresolved placeholders are left as literal text.

pub mod expr;
pub mod functions;

use std::collections::BTreeMap;

pub use expr::{ExprError, logic_expression};

/// Upper bound on substitution rounds per pass
pub const MAX_RENDER_PASSES: usize = 10;

/// Results of finished sibling TaskRuns: task name -> key -> value
pub type TaskResults = BTreeMap<String, BTreeMap<String, String>>;

/// Outputs of executed steps: step name -> output
pub type StepOutputs = BTreeMap<String, String>;

/// Merges variable sources in priority order
///
/// Earlier sources win; later ones only fill names that are missing or empty.
pub fn resolve(sources: &[&BTreeMap<String, String>]) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();

    for source in sources {
        for (name, value) in source.iter() {
            let slot = merged.entry(name.clone()).or_default();
            if slot.is_empty() {
                *slot = value.clone();
            }
        }
    }

    merged
}

/// Everything a template may reference
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    vars: &'a BTreeMap<String, String>,
    results: Option<&'a TaskResults>,
    steps: Option<&'a StepOutputs>,
}

impl<'a> RenderContext<'a> {
    pub fn new(vars: &'a BTreeMap<String, String>) -> Self {
        Self {
            vars,
            results: None,
            steps: None,
        }
    }

    pub fn with_results(mut self, results: &'a TaskResults) -> Self {
        self.results = Some(results);
        self
    }

    pub fn with_step_outputs(mut self, steps: &'a StepOutputs) -> Self {
        self.steps = Some(steps);
        self
    }

    /// Renders references first, then plain variables
    pub fn render(&self, template: &str) -> String {
        let referenced = substitute(template, |token| self.lookup_reference(token));
        substitute(&referenced, |token| self.lookup_variable(token))
    }

    /// Renders every variable value against this context
    ///
    /// Values may reference each other as well as sibling results.
    pub fn render_values(&self) -> BTreeMap<String, String> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), self.render(v)))
            .collect()
    }

    fn lookup_reference(&self, token: &str) -> Option<String> {
        let token = token.trim();

        if let Some(rest) = token.strip_prefix("tasks.") {
            let (task, key) = rest.split_once(".results.")?;
            return self.results?.get(task)?.get(key).cloned();
        }

        if let Some(step) = token
            .strip_prefix("steps.")
            .and_then(|rest| rest.strip_suffix(".output"))
        {
            return self.steps?.get(step).cloned();
        }

        None
    }

    fn lookup_variable(&self, token: &str) -> Option<String> {
        let token = token.trim();
        if let Some(value) = self.vars.get(token) {
            return Some(value.clone());
        }
        functions::call(token)
    }
}

/// Convenience for rendering with variables only
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> String {
    RenderContext::new(vars).render(template)
}

fn substitute(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut current = template.to_string();
    for _ in 0..MAX_RENDER_PASSES {
        match substitute_once(&current, &lookup) {
            Some(next) => current = next,
            None => break,
        }
    }
    current
}

/// One left-to-right scan; `None` when nothing was substituted
fn substitute_once(input: &str, lookup: &impl Fn(&str) -> Option<String>) -> Option<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut changed = false;

    while let Some((start, end)) = next_token(rest) {
        out.push_str(&rest[..start]);
        let token = &rest[start + 2..end];
        match lookup(token) {
            Some(value) => {
                out.push_str(&value);
                changed = true;
            }
            None => out.push_str(&rest[start..=end]),
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);

    changed.then_some(out)
}

/// Byte range of the innermost `${...}` ending at the first `}` after a `${`
fn next_token(input: &str) -> Option<(usize, usize)> {
    let first = input.find("${")?;
    let end = first + input[first..].find('}')?;
    let start = input[..end].rfind("${")?;
    Some((start, end))
}
