use regex::Regex;
use std::path::{Component, Path, PathBuf};

pub const DENY_PATH_OUTSIDE_SANDBOX: &str = "path_outside_sandbox";
pub const DENY_TERMINAL_NOT_WHITELISTED: &str = "terminal_cmd_not_whitelisted";

/// A proposed side effect, as seen before any effectful code runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectRequest<'a> {
    Filesystem { path: &'a Path },
    Terminal { command: &'a str },
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: &'static str },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("invalid terminal whitelist pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("sandbox allowed root `{path}` must be an absolute path that stays under the filesystem root")]
    AllowedRoot { path: String },
}

/// Pure decision function over proposed effects. Filesystem targets must
/// resolve under the allowed root after lexical confinement; shell
/// commands must match a whitelist pattern. Everything else is allowed.
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    allowed_root: PathBuf,
    terminal_whitelist: Vec<Regex>,
}

impl SandboxPolicy {
    pub fn new(allowed_root: &Path, whitelist_patterns: &[String]) -> Result<Self, SandboxError> {
        let allowed_root = confine(allowed_root).ok_or_else(|| SandboxError::AllowedRoot {
            path: allowed_root.display().to_string(),
        })?;
        let mut terminal_whitelist = Vec::with_capacity(whitelist_patterns.len());
        for pattern in whitelist_patterns {
            let compiled = Regex::new(pattern).map_err(|err| SandboxError::Pattern {
                pattern: pattern.clone(),
                source: err,
            })?;
            terminal_whitelist.push(compiled);
        }
        Ok(Self {
            allowed_root,
            terminal_whitelist,
        })
    }

    pub fn allowed_root(&self) -> &Path {
        &self.allowed_root
    }

    pub fn decide(&self, request: &EffectRequest<'_>) -> Decision {
        match request {
            EffectRequest::Filesystem { path } => match self.confined(path) {
                Some(_) => Decision::Allow,
                None => Decision::Deny {
                    reason: DENY_PATH_OUTSIDE_SANDBOX,
                },
            },
            EffectRequest::Terminal { command } => self.decide_command(command),
            EffectRequest::Other => Decision::Allow,
        }
    }

    /// Resolves a tool-supplied path against the allowed root. Relative
    /// paths are rooted inside the sandbox; absolute paths must already
    /// fall under it.
    pub fn resolve_path(&self, raw: &str) -> Result<PathBuf, &'static str> {
        self.confined(Path::new(raw))
            .ok_or(DENY_PATH_OUTSIDE_SANDBOX)
    }

    fn confined(&self, path: &Path) -> Option<PathBuf> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.allowed_root.join(path)
        };
        confine(&absolute).filter(|confined| confined.starts_with(&self.allowed_root))
    }

    fn decide_command(&self, command: &str) -> Decision {
        let trimmed = command.trim();
        if self
            .terminal_whitelist
            .iter()
            .any(|pattern| pattern.is_match(trimmed))
        {
            Decision::Allow
        } else {
            Decision::Deny {
                reason: DENY_TERMINAL_NOT_WHITELISTED,
            }
        }
    }
}

/// Lexically folds `.` and `..` segments without consulting the
/// filesystem, so a path is judged by where it would land, not by what
/// symlinks currently exist along the way. Relative paths and paths
/// that climb above the root cannot be confined and yield `None`.
fn confine(path: &Path) -> Option<PathBuf> {
    if !path.has_root() {
        return None;
    }
    let mut kept: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match kept.last() {
                Some(Component::Normal(_)) => {
                    kept.pop();
                }
                _ => return None,
            },
            other => kept.push(other),
        }
    }
    Some(kept.iter().map(|component| component.as_os_str()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SandboxPolicy {
        SandboxPolicy::new(
            Path::new("/srv/agent/workspace"),
            &[r"^echo\s".to_string(), r"^\./[\w./-]+\.sh(\s|$)".to_string()],
        )
        .expect("policy")
    }

    #[test]
    fn confinement_folds_dots_and_refuses_escapes() {
        assert_eq!(
            confine(Path::new("/a/b/../c/./d")),
            Some(PathBuf::from("/a/c/d"))
        );
        assert_eq!(confine(Path::new("/../up")), None);
        assert_eq!(confine(Path::new("relative/path")), None);
    }

    #[test]
    fn paths_under_root_are_allowed() {
        let policy = policy();
        let decision = policy.decide(&EffectRequest::Filesystem {
            path: Path::new("/srv/agent/workspace/demo/main.sh"),
        });
        assert!(decision.is_allowed());
    }

    #[test]
    fn traversal_out_of_root_is_denied() {
        let policy = policy();
        let decision = policy.decide(&EffectRequest::Filesystem {
            path: Path::new("/srv/agent/workspace/../../../etc/passwd"),
        });
        assert_eq!(
            decision,
            Decision::Deny {
                reason: DENY_PATH_OUTSIDE_SANDBOX
            }
        );
    }

    #[test]
    fn relative_paths_resolve_inside_root() {
        let policy = policy();
        let resolved = policy.resolve_path("demo_v2/main.sh").expect("resolve");
        assert_eq!(
            resolved,
            PathBuf::from("/srv/agent/workspace/demo_v2/main.sh")
        );
        assert!(policy.resolve_path("/etc/passwd").is_err());
        assert!(policy.resolve_path("../sibling/file").is_err());
    }

    #[test]
    fn whitelisted_commands_only() {
        let policy = policy();
        assert!(policy
            .decide(&EffectRequest::Terminal {
                command: "./demo_v2/main.sh"
            })
            .is_allowed());
        assert_eq!(
            policy.decide(&EffectRequest::Terminal {
                command: "rm -rf /"
            }),
            Decision::Deny {
                reason: DENY_TERMINAL_NOT_WHITELISTED
            }
        );
    }

    #[test]
    fn relative_allowed_root_is_rejected() {
        assert!(matches!(
            SandboxPolicy::new(Path::new("workspace"), &[]),
            Err(SandboxError::AllowedRoot { .. })
        ));
    }

    #[test]
    fn non_effectful_requests_pass() {
        assert!(policy().decide(&EffectRequest::Other).is_allowed());
    }
}
