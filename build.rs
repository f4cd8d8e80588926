// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-env-changed=FILTER_CAMERA_VERSION");

    // Packagers set the version explicitly; otherwise the crate version is
    // tagged with the commit it was built from
    let version = std::env::var("FILTER_CAMERA_VERSION").unwrap_or_else(|_| {
        let package = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
        match short_commit() {
            Some(commit) => format!("{}-{}", package, commit),
            None => package,
        }
    });

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

fn short_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|commit| !commit.is_empty())
}
