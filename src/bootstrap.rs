//! Renders the first-boot payload for a new droplet.
//!
//! The template is a cloud-config document with `{PLACEHOLDER}` markers.
//! Each marker is replaced by the contents of a secret file; continuation
//! lines of multi-line secrets inherit the indentation of the template line
//! the marker sits on, so secrets land inside YAML block scalars intact.
//! Shell-style `${VAR}` references are left alone.

use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::paths::{expand_tilde, read_to_string_ambient};

/// Errors raised while rendering the bootstrap payload.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BootstrapError {
    /// The template could not be read.
    #[error("failed to read bootstrap template `{path}`: {message}")]
    TemplateRead {
        /// Expanded template path.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// The template is empty or whitespace.
    #[error("bootstrap template must not be empty")]
    TemplateEmpty,
    /// A secret file could not be read.
    #[error("failed to read secret for {{{placeholder}}} from `{path}`: {message}")]
    SecretRead {
        /// Placeholder the secret fills.
        placeholder: String,
        /// Expanded secret path.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// A secret file is empty or whitespace.
    #[error("secret for {{{placeholder}}} must not be empty")]
    SecretEmpty {
        /// Placeholder the secret fills.
        placeholder: String,
    },
    /// A `NAME=path` mapping could not be parsed.
    #[error("malformed secret mapping `{entry}`: expected PLACEHOLDER=path")]
    MalformedMapping {
        /// Offending entry.
        entry: String,
    },
    /// The same placeholder was mapped twice.
    #[error("placeholder {{{placeholder}}} is mapped more than once")]
    DuplicatePlaceholder {
        /// Placeholder mapped twice.
        placeholder: String,
    },
    /// A mapping names a placeholder that the template never uses.
    #[error("placeholder {{{placeholder}}} is mapped but does not appear in the template")]
    UnusedMapping {
        /// Unused placeholder.
        placeholder: String,
    },
    /// The template uses a placeholder that has no mapping.
    #[error("template placeholder {{{placeholder}}} has no secret mapping")]
    UnmappedPlaceholder {
        /// Placeholder without a value.
        placeholder: String,
    },
}

/// Association of a template placeholder with the file that fills it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SecretBlock {
    /// Placeholder name without braces.
    pub placeholder: String,
    /// File whose contents replace the placeholder.
    pub path: Utf8PathBuf,
}

impl SecretBlock {
    /// Parses `NAME=path,NAME=path`. Blank input yields no mappings.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::MalformedMapping`] for entries without `=`,
    /// with an invalid placeholder name, or with an empty path, and
    /// [`BootstrapError::DuplicatePlaceholder`] when a name repeats.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, BootstrapError> {
        let mut seen = BTreeSet::new();
        let mut blocks = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let malformed = || BootstrapError::MalformedMapping {
                entry: entry.to_owned(),
            };
            let (name, path) = entry.split_once('=').ok_or_else(malformed)?;
            let placeholder = name.trim();
            let file = path.trim();
            if !is_placeholder_name(placeholder) || file.is_empty() {
                return Err(malformed());
            }
            if !seen.insert(placeholder.to_owned()) {
                return Err(BootstrapError::DuplicatePlaceholder {
                    placeholder: placeholder.to_owned(),
                });
            }
            blocks.push(Self {
                placeholder: placeholder.to_owned(),
                path: Utf8PathBuf::from(file),
            });
        }
        Ok(blocks)
    }
}

fn is_placeholder_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|first| first.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Lists the distinct placeholders used by `template`, in sorted order.
#[must_use]
pub fn template_placeholders(template: &str) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    let mut rest = template;
    while let Some((before, after)) = rest.split_once('{') {
        rest = after;
        if before.ends_with('$') {
            continue;
        }
        if let Some((name, _)) = after.split_once('}')
            && is_placeholder_name(name)
        {
            found.insert(name.to_owned());
        }
    }
    found
}

/// Substitutes `secrets` into `template`.
///
/// `secrets` pairs placeholder names with file contents. One trailing
/// newline is dropped from each value.
///
/// # Errors
///
/// Returns [`BootstrapError`] when the template is empty, a value is empty,
/// a name repeats, or the placeholder sets of template and mapping differ.
pub fn render(template: &str, secrets: &[(String, String)]) -> Result<String, BootstrapError> {
    if template.trim().is_empty() {
        return Err(BootstrapError::TemplateEmpty);
    }

    let mut values = BTreeMap::new();
    for (placeholder, contents) in secrets {
        if contents.trim().is_empty() {
            return Err(BootstrapError::SecretEmpty {
                placeholder: placeholder.clone(),
            });
        }
        let value = contents.strip_suffix('\n').unwrap_or(contents);
        if values.insert(placeholder.as_str(), value).is_some() {
            return Err(BootstrapError::DuplicatePlaceholder {
                placeholder: placeholder.clone(),
            });
        }
    }

    let used = template_placeholders(template);
    if let Some(missing) = used.iter().find(|name| !values.contains_key(name.as_str())) {
        return Err(BootstrapError::UnmappedPlaceholder {
            placeholder: missing.clone(),
        });
    }
    if let Some(unused) = values.keys().find(|name| !used.contains(**name)) {
        return Err(BootstrapError::UnusedMapping {
            placeholder: (*unused).to_owned(),
        });
    }

    let mut out = String::with_capacity(template.len());
    for line in template.split_inclusive('\n') {
        let indent: String = line
            .chars()
            .take_while(|c| *c == ' ' || *c == '\t')
            .collect();
        substitute_line(line, &indent, &values, &mut out);
    }
    Ok(out)
}

fn substitute_line(line: &str, indent: &str, values: &BTreeMap<&str, &str>, out: &mut String) {
    let mut rest = line;
    while let Some((before, after)) = rest.split_once('{') {
        out.push_str(before);
        let value = if before.ends_with('$') {
            None
        } else {
            after
                .split_once('}')
                .and_then(|(name, tail)| values.get(name).map(|value| (*value, tail)))
        };
        if let Some((value, tail)) = value {
            push_indented(out, value, indent);
            rest = tail;
        } else {
            out.push('{');
            rest = after;
        }
    }
    out.push_str(rest);
}

fn push_indented(out: &mut String, value: &str, indent: &str) {
    let mut lines = value.split('\n');
    if let Some(first) = lines.next() {
        out.push_str(first);
    }
    for line in lines {
        out.push('\n');
        out.push_str(indent);
        out.push_str(line);
    }
}

/// Reads the template and every secret file, then renders.
///
/// # Errors
///
/// Returns [`BootstrapError::TemplateRead`] or [`BootstrapError::SecretRead`]
/// when a file cannot be read, otherwise any error from [`render`].
pub fn render_from_files(
    template_path: &Utf8Path,
    blocks: &[SecretBlock],
) -> Result<String, BootstrapError> {
    let expanded = expand_tilde(template_path.as_str());
    let template = read_to_string_ambient(Utf8Path::new(&expanded)).map_err(|message| {
        BootstrapError::TemplateRead {
            path: expanded.clone(),
            message,
        }
    })?;

    let mut secrets = Vec::with_capacity(blocks.len());
    for block in blocks {
        let path = expand_tilde(block.path.as_str());
        let contents = read_to_string_ambient(Utf8Path::new(&path)).map_err(|message| {
            BootstrapError::SecretRead {
                placeholder: block.placeholder.clone(),
                path: path.clone(),
                message,
            }
        })?;
        debug!(placeholder = %block.placeholder, %path, "loaded secret block");
        secrets.push((block.placeholder.clone(), contents));
    }

    render(&template, &secrets)
}
