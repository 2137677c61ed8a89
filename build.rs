use std::process::Command;

/// Revision stamped into the startup log line. `RECEIVER_BUILD_REV` wins so
/// container builds without a `.git` directory can still pass one in.
fn main() {
    println!("cargo:rerun-if-env-changed=RECEIVER_BUILD_REV");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let rev = std::env::var("RECEIVER_BUILD_REV")
        .ok()
        .filter(|r| !r.trim().is_empty())
        .or_else(git_revision)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={rev}");
}

fn git_revision() -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--short=10", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())?;
    let hash = String::from_utf8_lossy(&out.stdout).trim().to_string();

    let clean = Command::new("git")
        .args(["diff-index", "--quiet", "HEAD", "--"])
        .status()
        .map(|s| s.success())
        .unwrap_or(true);

    Some(if clean { hash } else { format!("{hash}+dirty") })
}
