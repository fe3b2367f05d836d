//! Skills section rendering with entry-count and character caps.

use janus_domain::config::AccessList;
use janus_skills::SkillCatalog;

/// Policy preamble placed before the skill entries.
const SKILLS_INSTRUCTIONS: &str = "You have skills available. Load one skill at a time: \
when a task matches a skill's description, read its SKILL.md at the listed location \
before using it. Do not load skills speculatively.";

const TRUNCATION_MARKER: &str = "[... additional skills truncated ...]";

pub(crate) fn render_skills_section(
    catalog: &SkillCatalog,
    policy: Option<&AccessList>,
    max_entries: usize,
    max_chars: usize,
) -> String {
    let mut out = String::from(SKILLS_INSTRUCTIONS);
    out.push('\n');

    let mut included = 0usize;
    let mut used_chars = 0usize;

    for skill in catalog.entries() {
        if let Some(policy) = policy {
            if !policy.permits(&skill.name) {
                continue;
            }
        }

        let entry = if skill.always {
            format!(
                "\n<skill name=\"{}\" description=\"{}\"{}>\n{}\n</skill>\n",
                skill.name,
                skill.description,
                skill
                    .version
                    .as_deref()
                    .map(|v| format!(" version=\"{v}\""))
                    .unwrap_or_default(),
                skill.instructions
            )
        } else {
            format!(
                "\n<skill name=\"{}\" description=\"{}\" location=\"{}\" />\n",
                skill.name,
                skill.description,
                skill.location.display()
            )
        };

        if included >= max_entries || used_chars + entry.len() > max_chars {
            out.push('\n');
            out.push_str(TRUNCATION_MARKER);
            break;
        }
        used_chars += entry.len();
        included += 1;
        out.push_str(&entry);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn catalog_with(names: &[(&str, bool)]) -> SkillCatalog {
        let dir = tempfile::tempdir().unwrap();
        for (name, always) in names {
            let skill_dir = dir.path().join(name);
            std::fs::create_dir_all(&skill_dir).unwrap();
            std::fs::write(
                skill_dir.join("SKILL.md"),
                format!(
                    "---\nname: {name}\ndescription: about {name}\nalways: {always}\n---\n\ninstructions for {name}\n"
                ),
            )
            .unwrap();
        }
        SkillCatalog::load(&[dir.path().to_path_buf()])
    }

    #[test]
    fn always_skills_render_full_blocks() {
        let catalog = catalog_with(&[("pinned", true), ("lazy", false)]);
        let section = render_skills_section(&catalog, None, 100, 100_000);
        assert!(section.contains("instructions for pinned"));
        assert!(!section.contains("instructions for lazy"));
        assert!(section.contains("location="));
    }

    #[test]
    fn entry_count_cap_emits_marker() {
        let catalog = catalog_with(&[("one", false), ("two", false), ("three", false)]);
        let section = render_skills_section(&catalog, None, 2, 100_000);
        assert!(section.contains(TRUNCATION_MARKER));
        let entries = section.matches("<skill ").count();
        assert_eq!(entries, 2);
    }

    #[test]
    fn char_cap_emits_marker() {
        let catalog = catalog_with(&[("one", false), ("two", false)]);
        let section = render_skills_section(&catalog, None, 100, 60);
        assert!(section.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn user_policy_filters_entries() {
        let catalog = catalog_with(&[("allowed", false), ("blocked", false)]);
        let policy = AccessList {
            allow: None,
            deny: vec!["blocked".into()],
        };
        let section = render_skills_section(&catalog, Some(&policy), 100, 100_000);
        assert!(section.contains("allowed"));
        assert!(!section.contains("\"blocked\""));
    }

    #[test]
    fn location_points_at_skill_md() {
        let catalog = catalog_with(&[("lazy", false)]);
        let section = render_skills_section(&catalog, None, 100, 100_000);
        let location = catalog.get("lazy").unwrap().location.clone();
        assert!(section.contains(&location.display().to_string()));
        assert!(Path::new(&location).ends_with("SKILL.md"));
    }
}
