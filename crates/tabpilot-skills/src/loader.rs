use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// A markdown instruction file scoped to a domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Skill {
    pub name: String,
    pub domain: String,
    pub content: String,
    pub path: PathBuf,
}

/// Anything that can supply skills for a hostname.
pub trait SkillSource: Send + Sync {
    fn resolve(&self, hostname: &str) -> Vec<Skill>;
}

/// Split a hostname into its registrable suffixes, most specific first.
///
/// `beta.finance.google.com` yields `beta.finance.google.com`, `finance.google.com`,
/// `google.com`. A bare label yields nothing.
pub fn domain_segments(hostname: &str) -> Vec<String> {
    let parts: Vec<&str> = hostname.split('.').collect();
    (0..parts.len().saturating_sub(1))
        .map(|i| parts[i..].join("."))
        .collect()
}

/// Render skills as the section appended to the system prompt, or `None` if empty.
pub fn render_skills(skills: &[Skill]) -> Option<String> {
    if skills.is_empty() {
        return None;
    }
    Some(
        skills
            .iter()
            .map(|s| format!("### {}\n\n{}", s.name, s.content))
            .collect::<Vec<_>>()
            .join("\n\n"),
    )
}

/// Reads `<skills_dir>/<domain>/<skill>/SKILL.md`.
pub struct SkillLoader {
    skills_dir: PathBuf,
}

impl SkillLoader {
    pub fn new(skills_dir: impl Into<PathBuf>) -> Self {
        Self {
            skills_dir: skills_dir.into(),
        }
    }

    pub fn skills_dir(&self) -> &Path {
        &self.skills_dir
    }

    fn load_domain(&self, domain: &str, into: &mut BTreeMap<String, Skill>) {
        let domain_dir = self.skills_dir.join(domain);
        let entries = match std::fs::read_dir(&domain_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let skill_file = entry.path().join("SKILL.md");
            match std::fs::read_to_string(&skill_file) {
                Ok(content) => {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    into.insert(
                        name.clone(),
                        Skill {
                            name,
                            domain: domain.to_string(),
                            content,
                            path: skill_file,
                        },
                    );
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("skipping unreadable skill {}: {e}", skill_file.display()),
            }
        }
    }
}

impl SkillSource for SkillLoader {
    /// More specific domains override skills of the same name from parent domains.
    fn resolve(&self, hostname: &str) -> Vec<Skill> {
        if hostname.is_empty()
            || hostname.contains(['/', '\\'])
            || hostname.contains("..")
            || !self.skills_dir.is_dir()
        {
            return Vec::new();
        }

        let mut skills = BTreeMap::new();
        for domain in domain_segments(hostname).iter().rev() {
            self.load_domain(domain, &mut skills);
        }
        debug!(hostname, count = skills.len(), "resolved skills");
        skills.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(root: &Path, domain: &str, name: &str, content: &str) {
        let dir = root.join(domain).join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SKILL.md"), content).unwrap();
    }

    #[test]
    fn segments_go_from_specific_to_general() {
        assert_eq!(
            domain_segments("beta.finance.google.com"),
            vec!["beta.finance.google.com", "finance.google.com", "google.com"]
        );
        assert_eq!(domain_segments("example.com"), vec!["example.com"]);
        assert!(domain_segments("localhost").is_empty());
        assert!(domain_segments("").is_empty());
    }

    #[test]
    fn specific_domain_overrides_parent_skill() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "google.com", "search", "generic search");
        write_skill(dir.path(), "google.com", "account", "account help");
        write_skill(dir.path(), "mail.google.com", "search", "mail search");

        let skills = SkillLoader::new(dir.path()).resolve("mail.google.com");
        let names: Vec<_> = skills.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["account", "search"]);

        let search = skills.iter().find(|s| s.name == "search").unwrap();
        assert_eq!(search.content, "mail search");
        assert_eq!(search.domain, "mail.google.com");
    }

    #[test]
    fn directories_without_skill_file_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("example.com").join("empty")).unwrap();
        std::fs::write(dir.path().join("example.com").join("stray.md"), "x").unwrap();

        assert!(SkillLoader::new(dir.path()).resolve("example.com").is_empty());
    }

    #[test]
    fn missing_dir_and_path_like_hosts_resolve_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "example.com", "a", "x");

        assert!(SkillLoader::new(dir.path().join("absent")).resolve("example.com").is_empty());
        assert!(SkillLoader::new(dir.path()).resolve("../example.com").is_empty());
        assert!(SkillLoader::new(dir.path()).resolve("a/example.com").is_empty());
    }

    #[test]
    fn rendered_section_lists_each_skill() {
        let skills = vec![
            Skill {
                name: "a".into(),
                domain: "x.com".into(),
                content: "first".into(),
                path: PathBuf::new(),
            },
            Skill {
                name: "b".into(),
                domain: "x.com".into(),
                content: "second".into(),
                path: PathBuf::new(),
            },
        ];
        assert_eq!(
            render_skills(&skills).unwrap(),
            "### a\n\nfirst\n\n### b\n\nsecond"
        );
        assert!(render_skills(&[]).is_none());
    }
}
