//! Placeholder interpolation
//!
//! Syntax:
//! - `{{key}}`: replaced by the first value found for `key`
//! - `{{key:-default}}`: `default` when no layer knows `key`
//! - `{{prefix.{{env}}}}`: inner tokens are resolved first, so keys can be computed
//! - `\{{`: a literal `{{`
//!
//! Resolved values are inserted verbatim and never scanned again.
//! An unterminated `{{` is kept as plain text.

use miette::{NamedSource, SourceSpan};

use crate::error::{Result, UnresolvedPlaceholder};
use crate::lookup::ConfigLookup;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const ESCAPED_OPEN: &str = "\\{{";
const DEFAULT_SEPARATOR: &str = ":-";

/// Substitutes placeholder tokens using a lookup chain
pub struct Interpolator<'a> {
    lookup: &'a dyn ConfigLookup,
}

impl<'a> Interpolator<'a> {
    pub fn new(lookup: &'a dyn ConfigLookup) -> Self {
        Self { lookup }
    }

    /// Interpolate `text`; `name` identifies the source in error reports
    pub fn interpolate(&self, name: &str, text: &str) -> Result<String> {
        self.render(text, 0).map_err(|missing| {
            let suggestion = suggest_key(&missing.key, &self.lookup.keys());
            UnresolvedPlaceholder {
                key: missing.key,
                descriptor: name.to_string(),
                src: NamedSource::new(name, text.to_string()),
                span: Some(SourceSpan::from((missing.offset, missing.len))),
                suggestion,
            }
            .into()
        })
    }

    fn render(&self, text: &str, base: usize) -> std::result::Result<String, Missing> {
        let mut out = String::with_capacity(text.len());
        let mut pos = 0;

        while pos < text.len() {
            let rest = &text[pos..];

            if rest.starts_with(ESCAPED_OPEN) {
                out.push_str(OPEN);
                pos += ESCAPED_OPEN.len();
                continue;
            }

            if rest.starts_with(OPEN) {
                let Some(close) = find_close(rest) else {
                    out.push_str(rest);
                    break;
                };
                let inner = &rest[OPEN.len()..close];
                let inner_base = base + pos + OPEN.len();
                let token_len = close + CLOSE.len();
                out.push_str(&self.resolve_token(inner, inner_base, base + pos, token_len)?);
                pos += token_len;
                continue;
            }

            let Some(ch) = rest.chars().next() else {
                break;
            };
            out.push(ch);
            pos += ch.len_utf8();
        }

        Ok(out)
    }

    fn resolve_token(
        &self,
        inner: &str,
        inner_base: usize,
        token_offset: usize,
        token_len: usize,
    ) -> std::result::Result<String, Missing> {
        let (raw_key, raw_default) = match find_top_level(inner, DEFAULT_SEPARATOR) {
            Some(idx) => (&inner[..idx], Some((idx, &inner[idx + DEFAULT_SEPARATOR.len()..]))),
            None => (inner, None),
        };

        let key = self.render(raw_key, inner_base)?;
        if let Some(value) = self.lookup.get(&key) {
            return Ok(value);
        }

        match raw_default {
            Some((idx, default)) => {
                self.render(default, inner_base + idx + DEFAULT_SEPARATOR.len())
            }
            None => Err(Missing {
                key,
                offset: token_offset,
                len: token_len,
            }),
        }
    }
}

/// Unresolved key with its location in the original text
struct Missing {
    key: String,
    offset: usize,
    len: usize,
}

/// Byte index of the `}}` closing the `{{` at the start of `text`
fn find_close(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut pos = 0;
    while pos < text.len() {
        let rest = &text[pos..];
        if rest.starts_with(ESCAPED_OPEN) {
            pos += ESCAPED_OPEN.len();
        } else if rest.starts_with(OPEN) {
            depth += 1;
            pos += OPEN.len();
        } else if rest.starts_with(CLOSE) {
            depth -= 1;
            if depth == 0 {
                return Some(pos);
            }
            pos += CLOSE.len();
        } else {
            pos += rest.chars().next().map(char::len_utf8).unwrap_or(1);
        }
    }
    None
}

/// First occurrence of `needle` outside nested tokens
fn find_top_level(text: &str, needle: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut pos = 0;
    while pos < text.len() {
        let rest = &text[pos..];
        if depth == 0 && rest.starts_with(needle) {
            return Some(pos);
        }
        if rest.starts_with(OPEN) {
            depth += 1;
            pos += OPEN.len();
        } else if rest.starts_with(CLOSE) && depth > 0 {
            depth -= 1;
            pos += CLOSE.len();
        } else {
            pos += rest.chars().next().map(char::len_utf8).unwrap_or(1);
        }
    }
    None
}

fn suggest_key(key: &str, known: &[String]) -> Option<String> {
    known
        .iter()
        .map(|candidate| (strsim::jaro_winkler(key, candidate), candidate))
        .filter(|(score, _)| *score > 0.85)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, candidate)| format!("Did you mean `{candidate}`? Or give a default with `{{{{{key}:-value}}}}`"))
        .or_else(|| Some(format!("Define `{key}` in the alveolus placeholders, the configuration or the environment, or use `{{{{{key}:-value}}}}`")))
}
