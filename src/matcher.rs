//! First-match lookup of the rule for a language tag.

use crate::config::Rule;
use globset::Glob;

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("failed to match language pattern {pattern:?}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("no matching command found for language: {lang}")]
    NoMatch { lang: String },
}

/// Find the first rule whose `lang` pattern matches `lang`.
///
/// Rules are tried in order and never reordered by specificity, so a
/// trailing `*` rule acts as a fallback. Patterns are shell globs with
/// `*`, `?`, `[...]` and `{a,b}` and must match the whole tag. A pattern
/// that fails to compile aborts the lookup.
pub fn find_matching_rule<'a>(rules: &'a [Rule], lang: &str) -> Result<&'a Rule, MatchError> {
    for rule in rules {
        if matches_language(&rule.lang, lang)? {
            log::debug!("Language {lang:?} matched pattern {:?}", rule.lang);
            return Ok(rule);
        }
    }
    Err(MatchError::NoMatch { lang: lang.to_string() })
}

/// Whether the glob `pattern` matches all of `lang`.
pub fn matches_language(pattern: &str, lang: &str) -> Result<bool, MatchError> {
    let glob = Glob::new(pattern).map_err(|source| MatchError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })?;
    Ok(glob.compile_matcher().is_match(lang))
}
