//! Throwaway git repositories for tests

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Run git in `dir` with a fixed identity; panics on failure
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=Ferry Test",
            "-c",
            "user.email=ferry@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn commit(dir: &Path, file: &str, contents: &str, message: &str) {
    std::fs::write(dir.join(file), contents).unwrap();
    git(dir, &["add", file]);
    git(dir, &["commit", "-q", "-m", message]);
}

/// Repository with `main` checked out, a `feature` branch one commit ahead,
/// and a `v1` tag on the first commit
pub fn upstream(root: &Path) -> PathBuf {
    let origin = root.join("origin");
    std::fs::create_dir_all(&origin).unwrap();
    git(&origin, &["init", "-q"]);
    git(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    commit(&origin, "README.md", "hello\n", "initial");
    git(&origin, &["tag", "v1"]);
    git(&origin, &["checkout", "-q", "-b", "feature"]);
    commit(&origin, "feature.txt", "feature\n", "feature work");
    git(&origin, &["checkout", "-q", "main"]);
    origin
}

/// Plain clone of `origin` at `root/work`
pub fn working_copy(root: &Path, origin: &Path) -> PathBuf {
    let work = root.join("work");
    git(root, &["clone", "-q", &url(origin), work.to_str().unwrap()]);
    work
}

pub fn url(path: &Path) -> String {
    path.to_str().unwrap().to_string()
}

/// Executable shell script standing in for git
pub fn fake_git(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-git");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
