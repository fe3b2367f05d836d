//! Skill catalog: scans search roots and loads every skill directory.
//!
//! Roots are ordered by precedence (workspace > user-global > built-in);
//! the first source to define a name wins.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::manifest::{parse_frontmatter, SkillRequirements};

/// A loaded skill, keyed by name.
#[derive(Debug, Clone)]
pub struct SkillDefinition {
    pub name: String,
    pub description: String,
    pub version: Option<String>,
    pub requires: SkillRequirements,
    pub always: bool,
    pub instructions: String,
    /// Path of the SKILL.md the definition came from.
    pub location: PathBuf,
}

#[derive(Debug, Default)]
pub struct SkillCatalog {
    entries: Vec<SkillDefinition>,
}

impl SkillCatalog {
    /// Scan the given roots in precedence order.
    pub fn load(roots: &[PathBuf]) -> Self {
        let mut entries: Vec<SkillDefinition> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for root in roots {
            for skill in scan_root(root) {
                if seen.insert(skill.name.clone()) {
                    entries.push(skill);
                } else {
                    tracing::debug!(
                        name = %skill.name,
                        location = %skill.location.display(),
                        "skill shadowed by an earlier source"
                    );
                }
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::info!(count = entries.len(), "skill catalog loaded");
        Self { entries }
    }

    pub fn entries(&self) -> &[SkillDefinition] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&SkillDefinition> {
        self.entries.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn scan_root(root: &Path) -> Vec<SkillDefinition> {
    let mut skills = Vec::new();
    let Ok(read_dir) = std::fs::read_dir(root) else {
        return skills;
    };

    for entry in read_dir.filter_map(|e| e.ok()) {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let md_path = dir.join("SKILL.md");
        let Ok(content) = std::fs::read_to_string(&md_path) else {
            continue;
        };

        let (manifest, body) = parse_frontmatter(&content);
        let Some(manifest) = manifest else {
            tracing::warn!(
                path = %md_path.display(),
                "skipping skill without valid frontmatter"
            );
            continue;
        };

        let name = manifest.name.unwrap_or_else(|| {
            dir.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        if name.is_empty() {
            continue;
        }

        skills.push(SkillDefinition {
            name,
            description: manifest.description.unwrap_or_default(),
            version: manifest.version,
            requires: manifest.requires,
            always: manifest.always,
            instructions: body.trim().to_string(),
            location: md_path,
        });
    }

    skills.sort_by(|a, b| a.name.cmp(&b.name));
    skills
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(root: &Path, dir_name: &str, frontmatter: &str, body: &str) {
        let dir = root.join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            format!("---\n{frontmatter}\n---\n\n{body}\n"),
        )
        .unwrap();
    }

    #[test]
    fn loads_skills_from_a_root() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "git-helper",
            "name: git-helper\ndescription: git workflows",
            "Run git commands carefully.",
        );

        let catalog = SkillCatalog::load(&[dir.path().to_path_buf()]);
        assert_eq!(catalog.len(), 1);
        let skill = catalog.get("git-helper").unwrap();
        assert_eq!(skill.description, "git workflows");
        assert_eq!(skill.instructions, "Run git commands carefully.");
    }

    #[test]
    fn first_root_wins_on_name_conflict() {
        let workspace = tempfile::tempdir().unwrap();
        let global = tempfile::tempdir().unwrap();
        write_skill(
            workspace.path(),
            "deploy",
            "name: deploy\ndescription: workspace version",
            "workspace body",
        );
        write_skill(
            global.path(),
            "deploy",
            "name: deploy\ndescription: global version",
            "global body",
        );

        let catalog = SkillCatalog::load(&[
            workspace.path().to_path_buf(),
            global.path().to_path_buf(),
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("deploy").unwrap().description, "workspace version");
    }

    #[test]
    fn directory_name_backs_a_missing_name_field() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "implicit", "description: no name field", "body");

        let catalog = SkillCatalog::load(&[dir.path().to_path_buf()]);
        assert!(catalog.get("implicit").is_some());
    }

    #[test]
    fn invalid_frontmatter_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("broken");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("SKILL.md"), "no frontmatter at all").unwrap();
        write_skill(dir.path(), "fine", "name: fine\ndescription: ok", "body");

        let catalog = SkillCatalog::load(&[dir.path().to_path_buf()]);
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("fine").is_some());
    }

    #[test]
    fn missing_root_is_empty() {
        let catalog = SkillCatalog::load(&[PathBuf::from("/nonexistent/skills")]);
        assert!(catalog.is_empty());
    }
}
