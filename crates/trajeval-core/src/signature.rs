//! Family signature normalization.
//!
//! Maps raw failing command / error text to a canonical clustering key that is
//! stable under whitespace, path and argument-value variation, plus a coarse
//! tool-surface category used only for stratification.
//!
//! Signature keys have the shape `<binary>[-<subcommand>]-<errorClass>`, e.g.
//! `git-push-rejected`. The `<binary>[-<subcommand>]` prefix is the match key
//! used to decide whether a later attempt targets the same failure.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Canonical clustering key for "the same kind of failure".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct FamilySignature {
    pub key: String,
    pub match_key: String,
    pub surface: String,
}

impl FamilySignature {
    /// Use a signature supplied verbatim by the trace (`payload.familySignature`).
    pub fn explicit(signature: &str) -> Self {
        let key = signature.trim().to_ascii_lowercase();
        Self {
            surface: tool_surface(&key).to_string(),
            match_key: key.clone(),
            key,
        }
    }
}

/// Binaries whose second token is a subcommand worth keeping.
const SUBCOMMAND_TOOLS: &[&str] = &[
    "git", "gh", "docker", "docker-compose", "podman", "kubectl", "helm", "npm", "yarn", "pnpm",
    "bun", "cargo", "go", "pip", "pip3", "poetry", "uv", "make", "terraform", "python",
    "python3",
];

/// Wrappers stripped before the real binary.
const WRAPPERS: &[&str] = &["sudo", "env", "time", "nohup", "command", "exec", "timeout"];

/// Shell segments that only set up context for the real command.
const PRELUDES: &[&str] = &["cd", "export", "source", ".", "set", "pushd", "popd"];

/// Flags that consume the following token.
const VALUE_FLAGS: &[&str] = &["-c", "-C", "--file", "-f", "-n", "--namespace", "--context"];

/// Normalize a failing command plus its error text into a family signature.
///
/// `command` may be a tool name when no shell command is available.
pub fn normalize(
    command: Option<&str>,
    error_text: Option<&str>,
    exit_code: Option<i64>,
) -> FamilySignature {
    let match_key = command_key(command.unwrap_or_default());
    let class = error_class(error_text.unwrap_or_default(), exit_code);
    let surface = tool_surface_for_binary(leading_binary(&match_key)).to_string();
    FamilySignature {
        key: format!("{match_key}-{class}"),
        match_key,
        surface,
    }
}

/// Binaries whose own name contains a dash.
const DASHED_BINARIES: &[&str] = &["docker-compose", "golangci-lint"];

/// Binary part of a `<binary>[-<subcommand>]` key.
fn leading_binary(key: &str) -> &str {
    DASHED_BINARIES
        .iter()
        .copied()
        .find(|b| key.strip_prefix(b).is_some_and(|rest| rest.is_empty() || rest.starts_with('-')))
        .map(|b| &key[..b.len()])
        .unwrap_or_else(|| key.split('-').next().unwrap_or_default())
}

/// `<binary>[-<subcommand>]` for a shell command, `unknown` when empty.
pub fn command_key(command: &str) -> String {
    let segment = primary_segment(command);
    let unquoted = quoted_re().replace_all(segment, " ");
    let mut tokens = unquoted.split_whitespace().peekable();

    let mut binary: Option<String> = None;
    while let Some(tok) = tokens.next() {
        if env_assign_re().is_match(tok) {
            continue;
        }
        let base = basename(tok);
        if WRAPPERS.contains(&base.as_str()) {
            if base == "timeout" {
                if let Some(next) = tokens.peek() {
                    if next.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                        tokens.next();
                    }
                }
            }
            continue;
        }
        if tok.starts_with('-') {
            continue;
        }
        binary = Some(base);
        break;
    }

    let Some(binary) = binary.filter(|b| !b.is_empty()) else {
        return "unknown".to_string();
    };

    if !SUBCOMMAND_TOOLS.contains(&binary.as_str()) {
        return binary;
    }

    let mut take_module = false;
    while let Some(tok) = tokens.next() {
        if take_module {
            let module = tok.to_ascii_lowercase();
            return if subcommand_re().is_match(&module) {
                format!("{binary}-{module}")
            } else {
                binary
            };
        }
        if tok == "-m" && binary.starts_with("python") {
            take_module = true;
            continue;
        }
        if VALUE_FLAGS.contains(&tok) {
            tokens.next();
            continue;
        }
        if tok.starts_with('-') {
            continue;
        }
        let candidate = tok.to_ascii_lowercase();
        if subcommand_re().is_match(&candidate) && !binary.starts_with("python") {
            return format!("{binary}-{candidate}");
        }
        break;
    }
    binary
}

/// Ordered error-class table over lowercased error text.
fn error_classes() -> &'static [(&'static str, Regex)] {
    static TABLE: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            ("rejected", r"\brejected\b|non-fast-forward|fetch first"),
            (
                "auth-failed",
                r"authentication failed|unauthori[sz]ed|\b401\b|\b403\b|forbidden|permission denied \(publickey",
            ),
            ("permission-denied", r"permission denied|eacces|operation not permitted"),
            ("already-exists", r"already exists"),
            ("conflict", r"conflict|already in use"),
            (
                "connection-refused",
                r"connection refused|econnrefused|could not resolve host|network is unreachable",
            ),
            ("timeout", r"timed ?out|deadline exceeded"),
            ("syntax-error", r"syntax error|parse error|unexpected token|invalid syntax"),
            (
                "compile-error",
                r"error\[e\d+\]|compilation failed|could not compile|build failed|error ts\d+",
            ),
            ("test-failed", r"tests? failed|assertion ?(error|failed)|\bfailures:"),
            (
                "not-found",
                r"not found|no such file|does not exist|cannot find|could not find|enoent|unknown revision",
            ),
            ("out-of-memory", r"out of memory|oomkilled|cannot allocate memory"),
        ]
        .into_iter()
        .filter_map(|(class, pattern)| Regex::new(pattern).ok().map(|re| (class, re)))
        .collect()
    })
}

/// Coarse error class for a failure's text.
pub fn error_class(error_text: &str, exit_code: Option<i64>) -> String {
    let lowered = error_text.to_ascii_lowercase();
    for (class, re) in error_classes() {
        if re.is_match(&lowered) {
            return (*class).to_string();
        }
    }
    match exit_code {
        Some(code) if code != 0 => format!("exit-{code}"),
        _ => "error".to_string(),
    }
}

/// Tool-surface category inferred from a signature's leading token.
pub fn tool_surface(signature: &str) -> &'static str {
    let lowered = signature.trim().to_ascii_lowercase();
    let head = lowered.split([' ', ':']).next().unwrap_or_default();
    tool_surface_for_binary(leading_binary(head))
}

fn tool_surface_for_binary(binary: &str) -> &'static str {
    match binary {
        "git" | "gh" => "git",
        "docker" | "docker-compose" | "podman" => "docker",
        "kubectl" | "helm" | "kustomize" | "k9s" | "minikube" | "kind" => "k8s",
        "npm" | "npx" | "yarn" | "pnpm" | "node" | "bun" | "deno" | "tsc" | "jest" | "vitest"
        | "eslint" => "js-toolchain",
        "pip" | "pip3" | "python" | "python3" | "pytest" | "poetry" | "uv" | "mypy" | "ruff"
        | "tox" => "python-toolchain",
        "go" | "gofmt" | "golangci-lint" => "go-toolchain",
        "cargo" | "rustc" | "rustup" => "rust-toolchain",
        "make" | "cmake" | "gradle" | "mvn" | "bazel" | "ninja" => "build-tool",
        "cd" | "ls" | "cat" | "grep" | "rg" | "rm" | "mv" | "cp" | "mkdir" | "echo" | "find"
        | "sed" | "awk" | "bash" | "sh" | "zsh" | "chmod" | "chown" | "touch" | "head" | "tail"
        | "test" | "which" | "curl" | "wget" | "tar" | "export" | "source" => "shell",
        _ => "other",
    }
}

fn primary_segment(command: &str) -> &str {
    let first_line = command.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    separator_re()
        .split(first_line)
        .map(str::trim)
        .find(|seg| {
            let head = seg.split_whitespace().next().unwrap_or_default();
            !seg.is_empty() && !PRELUDES.contains(&head)
        })
        .unwrap_or(first_line)
}

fn basename(token: &str) -> String {
    let base = token.rsplit('/').next().unwrap_or(token).to_ascii_lowercase();
    let base = base.strip_suffix(".exe").unwrap_or(&base).to_string();
    if base
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
    {
        base
    } else {
        String::new()
    }
}

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""[^"]*"|'[^']*'"#).expect("static regex"))
}

fn env_assign_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").expect("static regex"))
}

fn subcommand_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9:-]{0,31}$").expect("static regex"))
}

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&&|\|\||;|\|").expect("static regex"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_push_rejected_collapses_variants() {
        let a = normalize(
            Some("git push origin main"),
            Some("! [rejected]        main -> main (fetch first)"),
            Some(1),
        );
        let b = normalize(
            Some("  cd /tmp/repo-42 &&  /usr/bin/git   push --force-with-lease  upstream feature/x"),
            Some("error: failed to push some refs\n hint: Updates were rejected"),
            Some(1),
        );
        assert_eq!(a.key, "git-push-rejected");
        assert_eq!(a, b);
        assert_eq!(a.surface, "git");
    }

    #[test]
    fn test_unrelated_failures_do_not_collide() {
        let push = normalize(Some("git push"), Some("rejected"), Some(1));
        let pull = normalize(Some("git pull"), Some("conflict in file"), Some(1));
        let npm = normalize(Some("npm install left-pad"), Some("ENOENT"), Some(1));
        assert_ne!(push.key, pull.key);
        assert_ne!(push.key, npm.key);
        assert_eq!(npm.key, "npm-install-not-found");
        assert_eq!(npm.surface, "js-toolchain");
    }

    #[test]
    fn test_env_and_wrappers_are_stripped() {
        assert_eq!(
            command_key("RUST_LOG=debug sudo timeout 30 cargo test --workspace"),
            "cargo-test"
        );
        assert_eq!(command_key("python3 -m pytest tests/unit -k foo"), "python3-pytest");
        assert_eq!(command_key("cat /etc/hosts"), "cat");
        assert_eq!(command_key(""), "unknown");
    }

    #[test]
    fn test_exit_code_fallback_class() {
        assert_eq!(error_class("", Some(137)), "exit-137");
        assert_eq!(error_class("something odd", None), "error");
        assert_eq!(error_class("fatal: Could not read from remote: Permission denied (publickey).", None), "auth-failed");
    }

    #[test]
    fn test_tool_surface_categories() {
        assert_eq!(tool_surface("kubectl-apply-conflict"), "k8s");
        assert_eq!(tool_surface("helm-install-timeout"), "k8s");
        assert_eq!(tool_surface("docker-compose-up-error"), "docker");
        assert_eq!(tool_surface("go-build-compile-error"), "go-toolchain");
        assert_eq!(tool_surface("pip-install-not-found"), "python-toolchain");
        assert_eq!(tool_surface("grep-exit-1"), "shell");
        assert_eq!(tool_surface("frobnicate-error"), "other");
    }

    #[test]
    fn test_dashed_binaries_keep_their_surface() {
        let sig = normalize(Some("golangci-lint run ./..."), None, Some(1));
        assert_eq!(sig.key, "golangci-lint-exit-1");
        assert_eq!(sig.match_key, "golangci-lint");
        assert_eq!(sig.surface, "go-toolchain");
        assert_eq!(tool_surface("golangci-lint-exit-1"), "go-toolchain");

        let compose = normalize(Some("docker-compose up -d"), Some("timed out"), None);
        assert_eq!(compose.surface, "docker");
    }

    #[test]
    fn test_explicit_signature_is_its_own_match_key() {
        let sig = FamilySignature::explicit(" Git-Push-Rejected ");
        assert_eq!(sig.key, "git-push-rejected");
        assert_eq!(sig.match_key, "git-push-rejected");
        assert_eq!(sig.surface, "git");
    }
}
