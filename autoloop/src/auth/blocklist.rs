//! Unconditional dangerous-pattern blocklist.
//!
//! Matched against the raw command string before any tokenizing, so it does not
//! depend on segmentation being right. No policy can override a match.

use std::sync::LazyLock;

use regex::Regex;

struct DangerousPattern {
    name: &'static str,
    regex: Regex,
}

fn pattern(name: &'static str, source: &str) -> DangerousPattern {
    DangerousPattern {
        name,
        regex: Regex::new(source).expect("dangerous pattern regex"),
    }
}

static PATTERNS: LazyLock<Vec<DangerousPattern>> = LazyLock::new(|| {
    vec![
        pattern(
            "recursive force delete of root or home",
            r#"\brm\s+(-[A-Za-z]*\s+)*(-[A-Za-z]*[rR][A-Za-z]*[fF][A-Za-z]*|-[A-Za-z]*[fF][A-Za-z]*[rR][A-Za-z]*|(-[rR]|--recursive)\s+(-[A-Za-z]*\s+)*(-f|--force)|(-f|--force)\s+(-[A-Za-z]*\s+)*(-[rR]|--recursive))\s+(-[A-Za-z-]*\s+)*["']?(/|/\*|~|~/|~/\*|\$HOME|\$\{HOME\}|\$HOME/\*)["']?(\s|;|&|\||$)"#,
        ),
        pattern(
            "raw device write",
            r"(>\s*/dev/(sd|hd|vd|xvd|nvme|disk|mmcblk|rdisk)|\bdd\b[^|;&]*\bof=/dev/(sd|hd|vd|xvd|nvme|disk|mmcblk|rdisk))",
        ),
        pattern(
            "filesystem format utility",
            r"(^|[\s;&|(])(mkfs(\.[a-z0-9]+)?|mke2fs|mkswap|wipefs|fdisk|sfdisk|parted|diskutil\s+erase\w*)(\s|$)",
        ),
        pattern("fork bomb", r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
        pattern(
            "credential file access",
            r"(~|\$HOME|/home/[^/\s]+|/root)/\.(ssh|aws|gnupg|netrc|docker/config\.json|kube/config)|\bid_(rsa|dsa|ecdsa|ed25519)\b|/etc/(shadow|sudoers|gshadow)\b|\.aws/credentials",
        ),
        pattern(
            "pipe to shell from network fetch",
            r"\b(curl|wget|fetch)\b[^|;&]*\|\s*(sudo\s+)?(env\s+)?(ba|z|da|k|fi|c|tc)?sh\b",
        ),
    ]
});

/// Return the name of the first dangerous pattern matching `command`.
pub fn match_dangerous(command: &str) -> Option<&'static str> {
    PATTERNS
        .iter()
        .find(|p| p.regex.is_match(command))
        .map(|p| p.name)
}
