//! SKILL.md parsing.
//!
//! A skill is a directory with a `SKILL.md` whose YAML frontmatter
//! (delimited by `---` lines) carries the metadata; the markdown body
//! becomes the instruction text:
//!
//! ```yaml
//! ---
//! name: apple-notes
//! description: Manage Apple Notes via the memo CLI
//! version: 1.2.0
//! requires:
//!   bins: [memo]
//!   env: [MEMO_DB]
//! always: false
//! ---
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillRequirements {
    #[serde(default)]
    pub bins: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
}

/// Frontmatter fields of a SKILL.md.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub requires: SkillRequirements,
    /// Always-on skills get their full instructions into every prompt.
    #[serde(default)]
    pub always: bool,
}

/// Split a SKILL.md into frontmatter and body.
///
/// Returns `(None, full_content)` when there is no frontmatter block or
/// the YAML does not parse.
pub fn parse_frontmatter(content: &str) -> (Option<SkillManifest>, &str) {
    let rest = match content.strip_prefix("---") {
        Some(rest) => rest,
        None => return (None, content),
    };
    // The opening fence must be a full line.
    let rest = match rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) {
        Some(rest) => rest,
        None => return (None, content),
    };

    let Some(end) = rest.find("\n---") else {
        return (None, content);
    };
    let yaml = &rest[..end];
    let body_start = match rest[end + 1..].find('\n') {
        Some(nl) => end + 1 + nl + 1,
        None => rest.len(),
    };
    let body = rest[body_start..].trim_start_matches('\n');

    match serde_yaml::from_str::<SkillManifest>(yaml) {
        Ok(manifest) => (Some(manifest), body),
        Err(e) => {
            tracing::warn!(error = %e, "invalid SKILL.md frontmatter");
            (None, content)
        }
    }
}
