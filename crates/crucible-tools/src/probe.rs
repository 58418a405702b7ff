//! Process-wide availability caches for runtime binaries.
//!
//! Init-on-first-check, reset via the test hook. Safe for concurrent reads.

use std::sync::atomic::{AtomicI8, Ordering};
use tokio::process::Command;

const UNKNOWN: i8 = -1;
const ABSENT: i8 = 0;
const PRESENT: i8 = 1;

static BASH_AVAILABLE: AtomicI8 = AtomicI8::new(UNKNOWN);
static TMUX_AVAILABLE: AtomicI8 = AtomicI8::new(UNKNOWN);
static GIT_AVAILABLE: AtomicI8 = AtomicI8::new(UNKNOWN);

async fn probe(cache: &AtomicI8, binary: &str, arg: &str) -> bool {
    match cache.load(Ordering::Acquire) {
        PRESENT => return true,
        ABSENT => return false,
        _ => {}
    }
    let present = Command::new(binary)
        .arg(arg)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .is_ok();
    cache.store(if present { PRESENT } else { ABSENT }, Ordering::Release);
    present
}

pub async fn bash_available() -> bool {
    probe(&BASH_AVAILABLE, "bash", "--version").await
}

pub async fn tmux_available() -> bool {
    probe(&TMUX_AVAILABLE, "tmux", "-V").await
}

pub async fn git_available() -> bool {
    probe(&GIT_AVAILABLE, "git", "--version").await
}

/// Reset every cache to unknown. Test hook only.
pub fn reset_probe_caches() {
    BASH_AVAILABLE.store(UNKNOWN, Ordering::Release);
    TMUX_AVAILABLE.store(UNKNOWN, Ordering::Release);
    GIT_AVAILABLE.store(UNKNOWN, Ordering::Release);
}
