//! `{{name}}` placeholder expansion for command templates.
//!
//! Placeholders are `{{` + optional whitespace + an alphanumeric name +
//! optional whitespace + `}}`. Names with no value in the variable set are
//! left in the output verbatim, so callers can still see them afterwards.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([a-zA-Z0-9]+)\s*\}\}").unwrap());

/// Name of the placeholder carrying the raw code block.
pub const INPUT: &str = "input";
/// Name of the placeholder carrying the temporary output file path.
pub const OUTPUT: &str = "output";
/// Name of the placeholder carrying the requested language tag.
pub const LANG: &str = "lang";

/// The fixed variable set a command template is expanded against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVars {
    values: HashMap<&'static str, String>,
}

impl TemplateVars {
    pub fn new(input: &str, output: &str, lang: &str) -> Self {
        let values = HashMap::from([
            (INPUT, input.to_string()),
            (OUTPUT, output.to_string()),
            (LANG, lang.to_string()),
        ]);
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Source of placeholder values.
pub trait VarLookup {
    fn lookup(&self, name: &str) -> Option<&str>;
}

impl VarLookup for TemplateVars {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.get(name)
    }
}

impl VarLookup for HashMap<&str, &str> {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.get(name).copied()
    }
}

/// Replace every known placeholder in `template` with its value.
///
/// Each occurrence is replaced independently, and substituted values are
/// never scanned again, so a value that itself looks like `{{lang}}` stays
/// as written.
pub fn expand<V: VarLookup + ?Sized>(template: &str, vars: &V) -> String {
    PLACEHOLDER_REGEX
        .replace_all(template, |caps: &Captures| match vars.lookup(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Whether `template` contains a placeholder for `name`.
///
/// Only the placeholder form counts: `echo input` does not reference
/// `{{input}}`, and neither does `{{inputs}}`.
pub fn contains_variable(template: &str, name: &str) -> bool {
    PLACEHOLDER_REGEX
        .captures_iter(template)
        .any(|caps| &caps[1] == name)
}
