//! PackageRegistry (C8): an in-memory catalog of configured packages,
//! rebuilt wholesale from the standard + user configuration sections.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageConfig {
    pub name: String,
    pub repository_url: String,
    pub local_repo_path: String,
    /// Relative to `local_repo_path`; defaults to `./`.
    pub compose_subdir: String,
    pub docker_auth: Option<String>,
    pub registry_url: Option<String>,
}

impl PackageConfig {
    pub fn new(repository_url: impl Into<String>, local_repo_path: impl Into<String>, compose_subdir: Option<String>) -> Self {
        let local_repo_path = local_repo_path.into();
        let name = derive_name(&local_repo_path);
        Self {
            name,
            repository_url: repository_url.into(),
            local_repo_path,
            compose_subdir: compose_subdir.unwrap_or_else(|| "./".to_string()),
            docker_auth: None,
            registry_url: None,
        }
    }

    pub fn compose_folder_path(&self) -> String {
        let base = self.local_repo_path.trim_end_matches('/');
        let sub = self.compose_subdir.trim_start_matches("./").trim_matches('/');
        if sub.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, sub)
        }
    }
}

fn derive_name(local_repo_path: &str) -> String {
    local_repo_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(local_repo_path)
        .to_string()
}

/// Swap-atomic in-memory catalog. Built by merging the "standard" set and
/// the user set, in that order, last-write-wins on name collision.
pub struct PackageRegistry {
    packages: RwLock<HashMap<String, PackageConfig>>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self {
            packages: RwLock::new(HashMap::new()),
        }
    }

    pub fn reload(&self, standard: Vec<PackageConfig>, user: Vec<PackageConfig>) {
        let mut merged = HashMap::with_capacity(standard.len() + user.len());
        for pkg in standard.into_iter().chain(user) {
            merged.insert(pkg.name.clone(), pkg);
        }
        *self.packages.write().expect("package registry lock poisoned") = merged;
    }

    pub fn list(&self) -> Vec<PackageConfig> {
        self.packages.read().expect("package registry lock poisoned").values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<PackageConfig> {
        self.packages.read().expect("package registry lock poisoned").get(name).cloned()
    }
}

impl Default for PackageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_derives_from_local_path_basename() {
        let pkg = PackageConfig::new("https://example.com/r.git", "/opt/apps/myapp", None);
        assert_eq!(pkg.name, "myapp");
    }

    #[test]
    fn compose_folder_path_joins_subdir() {
        let pkg = PackageConfig::new("u", "/opt/apps/myapp", Some("./deploy".to_string()));
        assert_eq!(pkg.compose_folder_path(), "/opt/apps/myapp/deploy");
    }

    #[test]
    fn compose_folder_path_defaults_to_repo_root() {
        let pkg = PackageConfig::new("u", "/opt/apps/myapp", None);
        assert_eq!(pkg.compose_folder_path(), "/opt/apps/myapp");
    }

    #[test]
    fn user_packages_override_standard_on_name_collision() {
        let registry = PackageRegistry::new();
        let standard = vec![PackageConfig::new("std-url", "/opt/apps/myapp", None)];
        let user = vec![PackageConfig::new("user-url", "/opt/apps/myapp", None)];
        registry.reload(standard, user);
        assert_eq!(registry.get("myapp").unwrap().repository_url, "user-url");
    }

    #[test]
    fn reload_is_swap_atomic_from_readers_perspective() {
        let registry = PackageRegistry::new();
        registry.reload(vec![PackageConfig::new("u1", "/opt/a", None)], vec![]);
        assert_eq!(registry.list().len(), 1);
        registry.reload(vec![PackageConfig::new("u2", "/opt/b", None)], vec![]);
        assert_eq!(registry.list().len(), 1);
        assert!(registry.get("a").is_none());
        assert!(registry.get("b").is_some());
    }
}
