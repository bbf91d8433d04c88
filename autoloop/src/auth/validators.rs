//! Per-program validators for commands that are allowed only in safe shapes.

use crate::auth::segment::Segment;

/// System directories that may never be deleted from, with or without flags.
pub const PROTECTED_DIRS: &[&str] = &[
    "/bin", "/boot", "/dev", "/etc", "/lib", "/lib64", "/opt", "/proc", "/root", "/sbin", "/sys",
    "/usr", "/var", "/System", "/Library", "/Applications",
];

/// Process names that may be terminated by name.
pub const ALLOWED_KILL_TARGETS: &[&str] = &[
    "node", "npm", "npx", "pnpm", "yarn", "bun", "deno", "vite", "next", "webpack", "tsc", "jest",
    "vitest", "python", "python3", "uvicorn", "gunicorn", "flask", "django", "cargo", "rustc",
    "go", "java", "gradle", "ruby", "rails", "php",
];

/// The only script that may be executed directly.
pub const BOOTSTRAP_SCRIPT: &str = "init.sh";

/// Which validator a program is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    Delete,
    Chmod,
    Kill,
    Script,
}

/// Route a segment to its validator, if it needs one.
///
/// Scripts are recognized by how they are invoked (`./x`, `dir/x`, `x.sh`), not by name.
/// Absolute paths such as `/usr/bin/git` are installed programs and go through membership.
pub fn validator_for(segment: &Segment) -> Option<Validator> {
    let raw = segment.raw_program()?;
    let name = segment.program()?;
    match name.as_str() {
        "rm" | "rmdir" => Some(Validator::Delete),
        "chmod" => Some(Validator::Chmod),
        "kill" | "pkill" | "killall" => Some(Validator::Kill),
        _ if raw.ends_with(".sh") || (raw.contains('/') && !raw.starts_with('/')) => {
            Some(Validator::Script)
        }
        _ => None,
    }
}

/// Run `validator` against `segment`. `Err` carries the denial reason.
pub fn run_validator(validator: Validator, segment: &Segment) -> Result<(), String> {
    match validator {
        Validator::Delete => validate_delete(segment),
        Validator::Chmod => validate_chmod(segment),
        Validator::Kill => validate_kill(segment),
        Validator::Script => validate_script(segment),
    }
}

fn split_flags(args: &[String]) -> (Vec<&str>, Vec<&str>) {
    let mut flags = Vec::new();
    let mut operands = Vec::new();
    let mut end_of_flags = false;
    for arg in args {
        if !end_of_flags && arg == "--" {
            end_of_flags = true;
        } else if !end_of_flags && arg.starts_with('-') && arg.len() > 1 {
            flags.push(arg.as_str());
        } else {
            operands.push(arg.as_str());
        }
    }
    (flags, operands)
}

fn has_short_flag(flags: &[&str], letters: &[char]) -> bool {
    flags
        .iter()
        .filter(|f| !f.starts_with("--"))
        .any(|f| f.chars().skip(1).any(|c| letters.contains(&c)))
}

fn is_home(target: &str) -> bool {
    matches!(
        target,
        "~" | "~/" | "~/*" | "$HOME" | "$HOME/" | "$HOME/*" | "${HOME}" | "${HOME}/"
    )
}

fn is_root_or_top_level(target: &str) -> bool {
    let trimmed = target.trim_end_matches('*').trim_end_matches('/');
    if trimmed.is_empty() {
        // `/`, `//`, `/*`
        return target.starts_with('/');
    }
    if !trimmed.starts_with('/') {
        return false;
    }
    trimmed[1..].split('/').filter(|s| !s.is_empty()).count() <= 1
}

fn under_protected_dir(target: &str) -> Option<&'static str> {
    let normalized = target.trim_end_matches('/');
    PROTECTED_DIRS.iter().copied().find(|dir| {
        normalized == *dir
            || normalized
                .strip_prefix(dir)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

fn validate_delete(segment: &Segment) -> Result<(), String> {
    let (flags, targets) = split_flags(segment.args());
    for target in &targets {
        if let Some(dir) = under_protected_dir(target) {
            return Err(format!("deleting under system directory {dir} is not allowed"));
        }
    }

    let recursive =
        has_short_flag(&flags, &['r', 'R']) || flags.iter().any(|f| *f == "--recursive");
    let force = has_short_flag(&flags, &['f']) || flags.iter().any(|f| *f == "--force");
    if recursive && force {
        for target in &targets {
            if is_home(target) {
                return Err(format!("rm -rf on home directory '{target}' is not allowed"));
            }
            if is_root_or_top_level(target) {
                return Err(format!(
                    "rm -rf on root or top-level directory '{target}' is not allowed"
                ));
            }
        }
    }
    Ok(())
}

fn validate_chmod(segment: &Segment) -> Result<(), String> {
    let (flags, operands) = split_flags(segment.args());
    if has_short_flag(&flags, &['R']) || flags.iter().any(|f| *f == "--recursive") {
        return Err("recursive chmod is not allowed".to_string());
    }
    let Some(mode) = operands.first() else {
        return Err("chmod requires a mode".to_string());
    };
    if mode.chars().all(|c| c.is_ascii_digit()) {
        let significant = mode.trim_start_matches('0');
        if significant == "777" {
            return Err(format!("chmod {mode} (world-writable 777) is not allowed"));
        }
        return Ok(());
    }
    if mode.ends_with("+x") {
        return Ok(());
    }
    // Other symbolic modes are fine unless they grant everything to everyone.
    if mode.contains("a+rwx") || mode.contains("o+w") {
        return Err(format!("chmod {mode} opens the file to everyone and is not allowed"));
    }
    Ok(())
}

fn validate_kill(segment: &Segment) -> Result<(), String> {
    let program = segment.program().unwrap_or_default();
    let (_flags, targets) = split_flags(segment.args());
    if targets.is_empty() {
        return Err(format!("{program} requires a target"));
    }
    for target in targets {
        if target.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        // `pkill -f "node server.js"` names a command line: judge its first word.
        let name = target.split_whitespace().next().unwrap_or(target);
        let name = name.rsplit('/').next().unwrap_or(name);
        if !ALLOWED_KILL_TARGETS.contains(&name) {
            return Err(format!(
                "{program} target '{target}' is not an allowed dev process (allowed: {})",
                ALLOWED_KILL_TARGETS.join(", ")
            ));
        }
    }
    Ok(())
}

fn validate_script(segment: &Segment) -> Result<(), String> {
    let raw = segment.raw_program().unwrap_or_default();
    if raw == BOOTSTRAP_SCRIPT || raw.ends_with(&format!("/{BOOTSTRAP_SCRIPT}")) {
        return Ok(());
    }
    Err(format!(
        "executing script '{raw}' is not allowed (only {BOOTSTRAP_SCRIPT} may run directly)"
    ))
}
