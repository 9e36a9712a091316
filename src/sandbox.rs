//! Command wrapper for running a case inside a filesystem jail.
//!
//! Jailing itself is done by an external tool; this type only knows how to
//! put that tool in front of a command line.

use std::env;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    prefix: Vec<String>,
}

impl Sandbox {
    pub fn new(prefix: Vec<String>) -> Self {
        Self { prefix }
    }

    /// `fakechroot chroot <root>`.
    pub fn fakechroot(root: impl AsRef<Path>) -> Self {
        Self::new(vec![
            "fakechroot".to_string(),
            "chroot".to_string(),
            root.as_ref().display().to_string(),
        ])
    }

    /// [`Sandbox::fakechroot`] if both tools are installed.
    pub fn detect(root: impl AsRef<Path>) -> Option<Self> {
        (on_path("fakechroot") && on_path("chroot")).then(|| Self::fakechroot(root))
    }

    pub fn wrap(&self, argv: Vec<String>) -> Vec<String> {
        self.prefix.iter().cloned().chain(argv).collect()
    }
}

fn on_path(program: &str) -> bool {
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_prefixes_command() {
        let sandbox = Sandbox::fakechroot("/srv/jail");
        let argv = sandbox.wrap(vec!["./prog".to_string(), "-v".to_string()]);
        assert_eq!(argv, ["fakechroot", "chroot", "/srv/jail", "./prog", "-v"]);
    }

    #[test]
    fn test_on_path() {
        assert!(on_path("sh"));
        assert!(!on_path("definitely-not-a-real-program-xyz"));
    }
}
