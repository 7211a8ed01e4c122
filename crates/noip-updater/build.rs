use std::process::Command;

/// Version string shown in the startup banner.
///
/// Release tarballs carry no `.git`, so packagers can pin the value with
/// `NOIP_GIT_SHA` in the build environment.
fn describe() -> String {
    if let Ok(pinned) = std::env::var("NOIP_GIT_SHA") {
        if !pinned.trim().is_empty() {
            return pinned.trim().to_string();
        }
    }
    Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=8"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    println!("cargo:rustc-env=NOIP_GIT_SHA={}", describe());
    println!("cargo:rerun-if-env-changed=NOIP_GIT_SHA");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/index");
}
