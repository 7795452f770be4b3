//! Persistent per-tool permission rules.
//!
//! A sequential YAML rule list; later rules override earlier ones, so the
//! check scans newest-first. Patterns are `"*"` or a plain prefix of the
//! value being checked (command text or path).

use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub tool: String,
    pub pattern: String,
    pub allow: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<Rule>,
}

pub struct PermissionStore {
    rules: Vec<Rule>,
    path: PathBuf,
}

impl PermissionStore {
    /// Load from `<home>/.axe/permissions.yaml`; a missing or unreadable
    /// file yields an empty store.
    pub fn load_default() -> Self {
        let path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".axe")
            .join("permissions.yaml");
        Self::load(path)
    }

    pub fn load(path: PathBuf) -> Self {
        let rules = std::fs::read_to_string(&path)
            .ok()
            .and_then(|data| serde_yaml::from_str::<RuleFile>(&data).ok())
            .map(|f| f.rules)
            .unwrap_or_default();
        Self { rules, path }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Scan rules newest-first; the first match wins. Returns
    /// `(allowed, found)` so the caller can distinguish an explicit deny
    /// from no rule at all.
    pub fn check(&self, tool: &str, value: &str) -> (bool, bool) {
        for rule in self.rules.iter().rev() {
            if rule.tool != tool {
                continue;
            }
            if rule.pattern == "*" || value.starts_with(&rule.pattern) {
                return (rule.allow, true);
            }
        }
        (false, false)
    }

    /// Append an allow rule and persist.
    pub fn add_allow(&mut self, tool: &str, pattern: &str) -> Result<(), StoreError> {
        self.rules.push(Rule {
            tool: tool.to_string(),
            pattern: pattern.to_string(),
            allow: true,
        });
        self.save()
    }

    fn save(&self) -> Result<(), StoreError> {
        let data = serde_yaml::to_string(&RuleFile {
            rules: self.rules.clone(),
        })
        .map_err(|e| StoreError::Serialize(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Atomic: write a sibling temp file, then rename over the target.
        let tmp = self.path.with_extension("yaml.tmp");
        std::fs::write(&tmp, data)?;
        set_owner_only(&tmp);
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_owner_only(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> PermissionStore {
        PermissionStore::load(dir.path().join("permissions.yaml"))
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.check("execute_command", "ls"), (false, false));
    }

    #[test]
    fn prefix_and_star_matching() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.add_allow("execute_command", "cargo").unwrap();
        store.add_allow("write_file", "*").unwrap();

        assert_eq!(store.check("execute_command", "cargo build"), (true, true));
        assert_eq!(store.check("execute_command", "cargotest"), (true, true));
        assert_eq!(store.check("execute_command", "ls"), (false, false));
        assert_eq!(store.check("write_file", "/any/path.rs"), (true, true));
        assert_eq!(store.check("edit_file", "/any/path.rs"), (false, false));
    }

    #[test]
    fn later_rules_override_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.yaml");
        std::fs::write(
            &path,
            "rules:\n\
             - {tool: execute_command, pattern: git, allow: false}\n\
             - {tool: execute_command, pattern: git, allow: true}\n",
        )
        .unwrap();

        let store = PermissionStore::load(path);
        assert_eq!(store.check("execute_command", "git push"), (true, true));
    }

    #[test]
    fn add_allow_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.yaml");
        {
            let mut store = PermissionStore::load(path.clone());
            store.add_allow("execute_command", "npm").unwrap();
        }
        let store = PermissionStore::load(path);
        assert_eq!(store.check("execute_command", "npm install"), (true, true));
        assert_eq!(store.rules().len(), 1);
    }

    #[test]
    fn add_allow_overrides_prior_deny() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.yaml");
        std::fs::write(
            &path,
            "rules:\n- {tool: execute_command, pattern: '*', allow: false}\n",
        )
        .unwrap();

        let mut store = PermissionStore::load(path);
        assert_eq!(store.check("execute_command", "make test"), (false, true));

        store.add_allow("execute_command", "make").unwrap();
        assert_eq!(store.check("execute_command", "make test"), (true, true));
        // Other values still hit the older deny-all.
        assert_eq!(store.check("execute_command", "ls"), (false, true));
    }
}
