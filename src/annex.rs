use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::domain::ResultEvent;
use crate::engine::{
    ACTION_ADDURLS, ACTION_SAVE, CommitIdentity, ConfigScope, DatasetEngine, DatasetHandle,
    EntryKind, SaveRequest, StatusEntry, UrlRecord,
};
use crate::error::CloneError;

const GITATTRIBUTES: &str = "* annex.backend=MD5E\n**/.git* annex.largefiles=nothing\n";
const DATALAD_GITATTRIBUTES: &str = "config annex.largefiles=nothing\n";
const CREATE_MESSAGE: &str = "[DATALAD] new dataset";

/// Dataset engine backed by `git` and `git-annex` subprocesses.
#[derive(Clone)]
pub struct GitAnnexEngine {
    git: Option<PathBuf>,
    annex: Option<PathBuf>,
}

impl Default for GitAnnexEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GitAnnexEngine {
    pub fn new() -> Self {
        Self {
            git: find_in_path("git"),
            annex: find_in_path("git-annex"),
        }
    }

    pub fn is_available(&self) -> bool {
        self.git.is_some() && self.annex.is_some()
    }

    fn require_git(&self) -> Result<&PathBuf, CloneError> {
        self.git
            .as_ref()
            .ok_or_else(|| CloneError::MissingTool("git".to_string()))
    }

    fn require_annex(&self) -> Result<&PathBuf, CloneError> {
        self.require_git()?;
        self.annex
            .as_ref()
            .ok_or_else(|| CloneError::MissingTool("git-annex".to_string()))
    }

    fn git(
        &self,
        root: &Utf8Path,
        args: &[&str],
        env: &[(&'static str, String)],
    ) -> Result<String, CloneError> {
        let git = self.require_git()?;
        run_cmd(git, root, args, env)
    }

    fn annex(&self, root: &Utf8Path, args: &[&str]) -> Result<String, CloneError> {
        self.require_annex()?;
        let mut full = vec!["annex"];
        full.extend_from_slice(args);
        self.git(root, &full, &[])
    }

    fn register_one(&self, root: &Utf8Path, record: &UrlRecord) -> Result<(), CloneError> {
        let name = checked_name(&record.name)?;
        if let Some(parent) = root.join(&name).parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| CloneError::Filesystem(err.to_string()))?;
        }
        match &record.key {
            Some(key) => {
                let key = key.to_string();
                self.annex(root, &["fromkey", "--force", &key, name.as_str()])?;
                self.annex(root, &["registerurl", &key, &record.url])?;
            }
            None => {
                self.annex(
                    root,
                    &["addurl", "--fast", "--relaxed", "--file", name.as_str(), &record.url],
                )?;
            }
        }
        Ok(())
    }

    fn commit(&self, root: &Utf8Path, request: &SaveRequest<'_>) -> Result<(), CloneError> {
        self.git(root, &["add", "--all"], &[])?;
        let mut args = vec![
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--quiet",
            "--allow-empty",
            "--allow-empty-message",
            "--cleanup=verbatim",
        ];
        if request.amend {
            args.push("--amend");
        }
        match request.message {
            Some(message) => {
                args.push("-m");
                args.push(message);
            }
            None if request.amend => args.push("--no-edit"),
            None => {
                args.push("-m");
                args.push("");
            }
        }
        self.git(root, &args, &request.identity.git_env())?;
        Ok(())
    }

    /// A tag must be a valid ref name that is not taken yet.
    fn check_tag(&self, root: &Utf8Path, tag: &str) -> Result<(), CloneError> {
        let reference = format!("refs/tags/{tag}");
        self.git(root, &["check-ref-format", &reference], &[])
            .map_err(|_| CloneError::Engine(format!("invalid tag name {tag:?}")))?;
        if self
            .git(root, &["rev-parse", "--quiet", "--verify", &reference], &[])
            .is_ok()
        {
            return Err(CloneError::Engine(format!("tag {tag} already exists")));
        }
        Ok(())
    }
}

impl DatasetEngine for GitAnnexEngine {
    fn create(
        &self,
        path: &Utf8Path,
        identity: &CommitIdentity,
    ) -> Result<DatasetHandle, CloneError> {
        self.require_annex()?;
        let shell_error = |err: CloneError| CloneError::DatasetShellCreation(format!("{path}: {err}"));

        if path.as_std_path().is_file() {
            return Err(CloneError::DatasetShellCreation(format!(
                "{path} exists and is not a directory"
            )));
        }
        if path.as_std_path().is_dir() {
            let occupied = fs::read_dir(path.as_std_path())
                .map_err(|err| CloneError::DatasetShellCreation(err.to_string()))?
                .next()
                .is_some();
            if occupied {
                return Err(CloneError::DatasetShellCreation(format!(
                    "{path} exists and is not empty"
                )));
            }
        }
        fs::create_dir_all(path.as_std_path())
            .map_err(|err| CloneError::DatasetShellCreation(err.to_string()))?;

        self.git(path, &["init", "--quiet"], &[]).map_err(shell_error)?;
        // git-annex commits to its own branch outside of any save
        self.git(path, &["config", "--local", "user.name", &identity.name], &[])
            .map_err(shell_error)?;
        self.git(path, &["config", "--local", "user.email", &identity.email], &[])
            .map_err(shell_error)?;
        self.annex(path, &["init", "--quiet"]).map_err(shell_error)?;

        let datalad_dir = path.join(".datalad");
        fs::create_dir_all(datalad_dir.as_std_path())
            .map_err(|err| CloneError::DatasetShellCreation(err.to_string()))?;
        fs::write(path.join(".gitattributes").as_std_path(), GITATTRIBUTES)
            .map_err(|err| CloneError::DatasetShellCreation(err.to_string()))?;
        fs::write(
            datalad_dir.join(".gitattributes").as_std_path(),
            DATALAD_GITATTRIBUTES,
        )
        .map_err(|err| CloneError::DatasetShellCreation(err.to_string()))?;

        let dataset = DatasetHandle::new(path.to_path_buf());
        self.commit(
            path,
            &SaveRequest {
                message: Some(CREATE_MESSAGE),
                tag: None,
                amend: false,
                identity,
            },
        )
        .map_err(shell_error)?;
        Ok(dataset)
    }

    fn set_config(
        &self,
        dataset: &DatasetHandle,
        key: &str,
        value: &str,
        scope: ConfigScope,
    ) -> Result<(), CloneError> {
        match scope {
            ConfigScope::Branch => {
                self.git(dataset.path(), &["config", "--file", ".datalad/config", key, value], &[])?
            }
            ConfigScope::Local => self.git(dataset.path(), &["config", "--local", key, value], &[])?,
        };
        Ok(())
    }

    fn status(
        &self,
        dataset: &DatasetHandle,
        _recursive: bool,
    ) -> Result<Vec<StatusEntry>, CloneError> {
        let listing = self.git(
            dataset.path(),
            &["ls-files", "-z", "--cached", "--others", "--exclude-standard"],
            &[],
        )?;
        let mut entries: Vec<StatusEntry> = Vec::new();
        for path in listing.split('\0').filter(|path| !path.is_empty()) {
            let path = Utf8PathBuf::from(path);
            if entries.iter().any(|entry| entry.path == path) {
                continue;
            }
            // deleted but still indexed entries have nothing left to remove
            let Ok(meta) = fs::symlink_metadata(dataset.path().join(&path).as_std_path()) else {
                continue;
            };
            let kind = if meta.file_type().is_symlink() {
                EntryKind::Symlink
            } else if meta.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            entries.push(StatusEntry { path, kind });
        }
        Ok(entries)
    }

    fn register_urls(
        &self,
        dataset: &DatasetHandle,
        records: &[UrlRecord],
    ) -> Result<Vec<ResultEvent>, CloneError> {
        self.require_annex()?;
        let root = dataset.path();
        let results = records
            .iter()
            .map(|record| {
                let path = root.join(&record.name).to_string();
                match self.register_one(root, record) {
                    Ok(()) => ResultEvent::ok(ACTION_ADDURLS).with_path(path),
                    Err(err) => ResultEvent::error(ACTION_ADDURLS, err.to_string()).with_path(path),
                }
            })
            .collect();
        Ok(results)
    }

    fn save(
        &self,
        dataset: &DatasetHandle,
        request: &SaveRequest<'_>,
    ) -> Result<Vec<ResultEvent>, CloneError> {
        let root = dataset.path();
        if let Some(tag) = request.tag {
            if let Err(err) = self.check_tag(root, tag) {
                return Ok(vec![
                    ResultEvent::error("tag", err.to_string()).with_path(root.to_string()),
                ]);
            }
        }
        if let Err(err) = self.commit(root, request) {
            return Ok(vec![
                ResultEvent::error(ACTION_SAVE, err.to_string()).with_path(root.to_string()),
            ]);
        }
        let mut results = vec![ResultEvent::ok(ACTION_SAVE).with_path(root.to_string())];
        if let Some(tag) = request.tag {
            let event = match self.git(root, &["tag", tag], &[]) {
                Ok(_) => ResultEvent::ok("tag").with_message(tag.to_string()),
                Err(err) => ResultEvent::error("tag", err.to_string()),
            };
            results.push(event.with_path(root.to_string()));
        }
        Ok(results)
    }
}

/// Refuses names that would escape the dataset root.
fn checked_name(name: &str) -> Result<Utf8PathBuf, CloneError> {
    let path = Utf8PathBuf::from(name);
    let escapes = path
        .components()
        .any(|component| !matches!(component, Utf8Component::Normal(_)));
    if name.is_empty() || escapes {
        return Err(CloneError::MalformedRecord(format!(
            "refusing file name outside the dataset: {name}"
        )));
    }
    Ok(path)
}

fn run_cmd(
    program: &Path,
    cwd: &Utf8Path,
    args: &[&str],
    env: &[(&'static str, String)],
) -> Result<String, CloneError> {
    debug!(program = %program.display(), ?args, "running");
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd.as_std_path())
        .envs(env.iter().map(|(key, value)| (*key, value.as_str())))
        .output()
        .map_err(|err| CloneError::Engine(err.to_string()))?;
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).to_string());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        format!("command failed: {} {}", program.display(), args.join(" "))
    } else {
        stderr
    };
    Err(CloneError::Engine(message))
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_escaping_the_dataset_are_refused() {
        assert!(checked_name("a/b/c.txt").is_ok());
        assert!(checked_name("../c.txt").is_err());
        assert!(checked_name("/etc/passwd").is_err());
        assert!(checked_name("").is_err());
    }

    #[test]
    fn identity_is_applied_to_author_and_committer() {
        let identity = CommitIdentity {
            name: "exporter".to_string(),
            email: "exporter@example.org".to_string(),
            date: Some("2021-01-01T00:00:00+00:00".to_string()),
        };
        let env = identity.git_env();
        assert!(env.contains(&("GIT_COMMITTER_DATE", "2021-01-01T00:00:00+00:00".to_string())));
        assert!(env.contains(&("GIT_AUTHOR_NAME", "exporter".to_string())));
    }

    #[test]
    fn unspecified_date_is_fixed_not_current() {
        let identity = CommitIdentity {
            name: "exporter".to_string(),
            email: "exporter@example.org".to_string(),
            date: None,
        };
        assert!(identity.git_env().contains(&(
            "GIT_AUTHOR_DATE",
            crate::engine::UNSPECIFIED_GIT_DATE.to_string()
        )));
    }
}
