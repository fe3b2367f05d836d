//! Skill loading: SKILL.md frontmatter parsing and the multi-root,
//! first-source-wins catalog.

mod catalog;
mod manifest;

pub use catalog::{SkillCatalog, SkillDefinition};
pub use manifest::{parse_frontmatter, SkillManifest, SkillRequirements};
