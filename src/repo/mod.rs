//! RepositoryManager (C2): clone / init-in-place / fetch / enumerate tags /
//! checkout a tag, against a working copy that lives on the host and is
//! driven entirely through `HostShell`.

use crate::error::RepositoryError;
use crate::host::HostShell;
use crate::version::{sorted_versions_descending, Version};

pub struct RepositoryManager<'a> {
    shell: &'a HostShell,
}

impl<'a> RepositoryManager<'a> {
    pub fn new(shell: &'a HostShell) -> Self {
        Self { shell }
    }

    pub async fn is_repository(&self, path: &str) -> Result<bool, RepositoryError> {
        Ok(self.shell.dir_exists(&format!("{}/.git", path)).await?)
    }

    /// Clone with tag fetching enabled. Fails if `path` already exists.
    pub async fn clone(&self, url: &str, path: &str) -> Result<(), RepositoryError> {
        if self.shell.path_exists(path).await? {
            return Err(RepositoryError::DestinationExists(path.to_string()));
        }
        self.shell
            .exec_ok(&format!(
                "git clone --tags {} {}",
                crate::host::exec::shell_quote(url),
                crate::host::exec::shell_quote(path)
            ))
            .await
            .map_err(RepositoryError::from)?;
        Ok(())
    }

    /// Initialize a repository in an *existing*, non-empty directory: add
    /// `origin`, fetch with tags, create a local branch tracking the
    /// remote default (`main` or `master`), and check it out.
    pub async fn init_in_place(&self, path: &str, remote_url: &str) -> Result<(), RepositoryError> {
        self.shell
            .exec_ok(&format!("git -C {} init", crate::host::exec::shell_quote(path)))
            .await?;
        self.shell
            .exec_ok(&format!(
                "git -C {} remote add origin {}",
                crate::host::exec::shell_quote(path),
                crate::host::exec::shell_quote(remote_url)
            ))
            .await?;
        self.shell
            .exec_ok(&format!(
                "git -C {} fetch origin --tags",
                crate::host::exec::shell_quote(path)
            ))
            .await?;

        let default_branch = self.remote_default_branch(path).await?;

        self.shell
            .exec_ok(&format!(
                "git -C {} checkout -B {} origin/{}",
                crate::host::exec::shell_quote(path),
                default_branch,
                default_branch
            ))
            .await?;
        Ok(())
    }

    async fn remote_default_branch(&self, path: &str) -> Result<String, RepositoryError> {
        for candidate in ["main", "master"] {
            let exists = self
                .shell
                .exec(
                    &format!(
                        "git -C {} rev-parse --verify origin/{}",
                        crate::host::exec::shell_quote(path),
                        candidate
                    ),
                    None,
                    None,
                )
                .await?
                .success();
            if exists {
                return Ok(candidate.to_string());
            }
        }
        Err(RepositoryError::NotARepository(format!(
            "{} has neither origin/main nor origin/master",
            path
        )))
    }

    pub async fn fetch(&self, path: &str) -> Result<(), RepositoryError> {
        self.shell
            .exec_ok(&format!(
                "git -C {} fetch origin --tags --force",
                crate::host::exec::shell_quote(path)
            ))
            .await?;
        Ok(())
    }

    /// Sorted descending, parsed from tag names; unparseable tags ignored.
    pub async fn available_versions(&self, path: &str) -> Result<Vec<Version>, RepositoryError> {
        let out = self
            .shell
            .exec_ok(&format!(
                "git -C {} tag --list",
                crate::host::exec::shell_quote(path)
            ))
            .await?;
        Ok(sorted_versions_descending(out.lines().map(str::to_string)))
    }

    /// Detached-HEAD checkout at the commit of a tag named exactly
    /// `friendly` or `v<friendly>`.
    pub async fn checkout(&self, path: &str, friendly: &str) -> Result<(), RepositoryError> {
        let tag = self.resolve_tag(path, friendly).await?;
        self.shell
            .exec_ok(&format!(
                "git -C {} checkout -f --detach {}",
                crate::host::exec::shell_quote(path),
                crate::host::exec::shell_quote(&tag)
            ))
            .await?;
        Ok(())
    }

    async fn resolve_tag(&self, path: &str, friendly: &str) -> Result<String, RepositoryError> {
        for candidate in [friendly.to_string(), format!("v{}", friendly)] {
            let exists = self
                .shell
                .exec(
                    &format!(
                        "git -C {} rev-parse --verify refs/tags/{}",
                        crate::host::exec::shell_quote(path),
                        candidate
                    ),
                    None,
                    None,
                )
                .await?
                .success();
            if exists {
                return Ok(candidate);
            }
        }
        Err(RepositoryError::TagNotFound {
            friendly: friendly.to_string(),
            path: path.to_string(),
        })
    }

    pub async fn head_commit(&self, path: &str) -> Result<String, RepositoryError> {
        Ok(self
            .shell
            .exec_ok(&format!(
                "git -C {} rev-parse HEAD",
                crate::host::exec::shell_quote(path)
            ))
            .await?)
    }
}
