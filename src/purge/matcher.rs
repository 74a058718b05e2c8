//! purge::matcher
//!
//! Path predicates and their compiled form.
//!
//! # Glob Syntax
//!
//! - `*` matches within one path component, `?` matches one character
//! - `**` matches any number of components, including none
//! - `[abc]` / `[!abc]` character classes
//! - A pattern without `/` matches the file name at any depth
//!
//! # Directory Policy
//!
//! Under [`DirectoryPolicy::Prefix`] an exact path or glob that names a
//! directory also matches every file beneath it. Under
//! [`DirectoryPolicy::FilesOnly`] only file paths are compared.

use std::collections::HashMap;

use regex::bytes::Regex as BytesRegex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::PurgeError;
use crate::core::types::Oid;
use crate::git::TreeEntry;

/// How exact paths and globs treat directories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectoryPolicy {
    /// A match on a directory matches everything under it
    #[default]
    Prefix,
    /// Only file paths match
    FilesOnly,
}

/// What to match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPredicate {
    /// A literal path, relative to the repository root
    Exact(String),
    /// A glob pattern
    Glob(String),
    /// A regex matched against file contents
    Content(String),
    /// Matches if any inner predicate matches
    AnyOf(Vec<PathPredicate>),
}

impl PathPredicate {
    fn needs_content(&self) -> bool {
        match self {
            PathPredicate::Content(_) => true,
            PathPredicate::AnyOf(all) => all.iter().any(PathPredicate::needs_content),
            _ => false,
        }
    }
}

impl std::fmt::Display for PathPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathPredicate::Exact(p) => write!(f, "path '{}'", p),
            PathPredicate::Glob(g) => write!(f, "glob '{}'", g),
            PathPredicate::Content(r) => write!(f, "content /{}/", r),
            PathPredicate::AnyOf(all) => {
                let parts: Vec<String> = all.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(" or "))
            }
        }
    }
}

/// Normalize a user-supplied path: strip `./`, leading and trailing `/`.
///
/// # Errors
///
/// Empty paths and paths with `.` or `..` components.
pub fn normalize_path(raw: &str) -> Result<String, PurgeError> {
    let trimmed = raw.trim_start_matches("./").trim_matches('/');
    if trimmed.is_empty() {
        return Err(PurgeError::InvalidPredicate {
            message: format!("empty path: '{}'", raw),
        });
    }
    if trimmed
        .split('/')
        .any(|c| c.is_empty() || c == "." || c == "..")
    {
        return Err(PurgeError::InvalidPredicate {
            message: format!("path must not contain empty, '.' or '..' components: '{}'", raw),
        });
    }
    Ok(trimmed.to_string())
}

/// Translate a glob to an anchored regex.
fn glob_to_regex(glob: &str) -> Result<Regex, PurgeError> {
    let glob = glob.trim_start_matches("./").trim_start_matches('/');
    if glob.is_empty() {
        return Err(PurgeError::InvalidPredicate {
            message: "empty glob".to_string(),
        });
    }

    let mut out = String::from("^");
    if !glob.contains('/') {
        out.push_str("(?:.*/)?");
    }

    let chars: Vec<char> = glob.trim_end_matches('/').chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_start = i == 0 || chars[i - 1] == '/';
                let slash_after = chars.get(i + 2) == Some(&'/');
                if at_start && slash_after {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else if at_start && i + 2 == chars.len() {
                    out.push_str(".*");
                    i += 2;
                } else {
                    out.push_str("[^/]*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '[' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&c| c == ']')
                    .map(|p| p + i + 1)
                    .ok_or_else(|| PurgeError::InvalidPredicate {
                        message: format!("unclosed '[' in glob '{}'", glob),
                    })?;
                let mut class: String = chars[i + 1..close].iter().collect();
                if let Some(rest) = class.strip_prefix('!') {
                    class = format!("^{}", rest);
                }
                out.push('[');
                out.push_str(&class.replace('\\', "\\\\"));
                out.push(']');
                i = close + 1;
            }
            c => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    out.push('$');

    Regex::new(&out).map_err(|e| PurgeError::InvalidPredicate {
        message: format!("glob '{}': {}", glob, e),
    })
}

#[derive(Debug)]
enum Compiled {
    Exact(String),
    Glob(Regex),
    Content(BytesRegex),
}

/// A compiled [`PathPredicate`].
#[derive(Debug)]
pub struct PathMatcher {
    rules: Vec<Compiled>,
    policy: DirectoryPolicy,
    needs_content: bool,
}

impl PathMatcher {
    /// Compile a predicate.
    ///
    /// # Errors
    ///
    /// [`PurgeError::InvalidPredicate`] for malformed paths, globs or
    /// regexes, and for an empty `AnyOf`.
    pub fn compile(predicate: &PathPredicate, policy: DirectoryPolicy) -> Result<Self, PurgeError> {
        let mut rules = Vec::new();
        Self::compile_into(predicate, &mut rules)?;
        if rules.is_empty() {
            return Err(PurgeError::InvalidPredicate {
                message: "no paths, globs or content patterns given".to_string(),
            });
        }
        Ok(Self {
            rules,
            policy,
            needs_content: predicate.needs_content(),
        })
    }

    fn compile_into(predicate: &PathPredicate, rules: &mut Vec<Compiled>) -> Result<(), PurgeError> {
        match predicate {
            PathPredicate::Exact(p) => rules.push(Compiled::Exact(normalize_path(p)?)),
            PathPredicate::Glob(g) => rules.push(Compiled::Glob(glob_to_regex(g)?)),
            PathPredicate::Content(r) => {
                let re = BytesRegex::new(r).map_err(|e| PurgeError::InvalidPredicate {
                    message: format!("content pattern: {}", e),
                })?;
                rules.push(Compiled::Content(re));
            }
            PathPredicate::AnyOf(all) => {
                for inner in all {
                    Self::compile_into(inner, rules)?;
                }
            }
        }
        Ok(())
    }

    /// Whether any rule inspects blob contents.
    pub fn needs_content(&self) -> bool {
        self.needs_content
    }

    /// Path-only match. Content rules never match here.
    pub fn matches_path(&self, path: &str) -> bool {
        self.rules.iter().any(|rule| match rule {
            Compiled::Exact(p) => {
                path == p
                    || (self.policy == DirectoryPolicy::Prefix
                        && path.len() > p.len()
                        && path.starts_with(p.as_str())
                        && path.as_bytes()[p.len()] == b'/')
            }
            Compiled::Glob(re) => {
                re.is_match(path)
                    || (self.policy == DirectoryPolicy::Prefix
                        && path
                            .match_indices('/')
                            .any(|(idx, _)| re.is_match(&path[..idx])))
            }
            Compiled::Content(_) => false,
        })
    }

    /// Full match for a tree entry, loading content only when a content
    /// rule exists and no path rule already matched.
    pub fn matches_entry<F>(&self, entry: &TreeEntry, mut load: F) -> Result<bool, PurgeError>
    where
        F: FnMut(&Oid) -> Result<Vec<u8>, PurgeError>,
    {
        if self.matches_path(&entry.path) {
            return Ok(true);
        }
        if !self.needs_content {
            return Ok(false);
        }
        let content = load(&entry.blob)?;
        Ok(self.rules.iter().any(|rule| match rule {
            Compiled::Content(re) => re.is_match(&content),
            _ => false,
        }))
    }
}

/// Per-run memo of content-rule verdicts, keyed by blob id.
#[derive(Debug, Default)]
pub struct ContentCache {
    verdicts: HashMap<Oid, bool>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match an entry, consulting and filling the cache.
    pub fn matches<F>(&mut self, matcher: &PathMatcher, entry: &TreeEntry, load: F) -> Result<bool, PurgeError>
    where
        F: FnMut(&Oid) -> Result<Vec<u8>, PurgeError>,
    {
        if matcher.matches_path(&entry.path) {
            return Ok(true);
        }
        if !matcher.needs_content() {
            return Ok(false);
        }
        if let Some(hit) = self.verdicts.get(&entry.blob) {
            return Ok(*hit);
        }
        let verdict = matcher.matches_entry(entry, load)?;
        self.verdicts.insert(entry.blob.clone(), verdict);
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(predicate: PathPredicate, policy: DirectoryPolicy) -> PathMatcher {
        PathMatcher::compile(&predicate, policy).expect("compile")
    }

    mod normalize {
        use super::*;

        #[test]
        fn strips_decoration() {
            assert_eq!(normalize_path("./config/secret.env").unwrap(), "config/secret.env");
            assert_eq!(normalize_path("/secrets/").unwrap(), "secrets");
        }

        #[test]
        fn rejects_traversal_and_empty() {
            assert!(normalize_path("").is_err());
            assert!(normalize_path("/").is_err());
            assert!(normalize_path("a/../b").is_err());
            assert!(normalize_path("a//b").is_err());
        }
    }

    mod exact {
        use super::*;

        #[test]
        fn prefix_policy_matches_directory_contents() {
            let m = matcher(PathPredicate::Exact("secrets".into()), DirectoryPolicy::Prefix);
            assert!(m.matches_path("secrets"));
            assert!(m.matches_path("secrets/prod.env"));
            assert!(!m.matches_path("secrets-old/prod.env"));
            assert!(!m.matches_path("app/secrets"));
        }

        #[test]
        fn files_only_policy_is_literal() {
            let m = matcher(PathPredicate::Exact("secrets".into()), DirectoryPolicy::FilesOnly);
            assert!(m.matches_path("secrets"));
            assert!(!m.matches_path("secrets/prod.env"));
        }
    }

    mod glob {
        use super::*;

        #[test]
        fn basename_pattern_matches_at_any_depth() {
            let m = matcher(PathPredicate::Glob("*.env".into()), DirectoryPolicy::FilesOnly);
            assert!(m.matches_path(".env"));
            assert!(m.matches_path("config/prod.env"));
            assert!(!m.matches_path("config/prod.envrc"));
        }

        #[test]
        fn anchored_pattern_with_slash() {
            let m = matcher(PathPredicate::Glob("config/*.key".into()), DirectoryPolicy::FilesOnly);
            assert!(m.matches_path("config/id.key"));
            assert!(!m.matches_path("other/config/id.key"));
            assert!(!m.matches_path("config/nested/id.key"));
        }

        #[test]
        fn double_star_spans_components() {
            let m = matcher(PathPredicate::Glob("**/creds/*.json".into()), DirectoryPolicy::FilesOnly);
            assert!(m.matches_path("creds/a.json"));
            assert!(m.matches_path("deep/down/creds/a.json"));

            let m = matcher(PathPredicate::Glob("vault/**".into()), DirectoryPolicy::FilesOnly);
            assert!(m.matches_path("vault/a/b/c"));
            assert!(!m.matches_path("other/vault/a"));
        }

        #[test]
        fn character_classes() {
            let m = matcher(PathPredicate::Glob("key[0-9].pem".into()), DirectoryPolicy::FilesOnly);
            assert!(m.matches_path("key1.pem"));
            assert!(!m.matches_path("keyx.pem"));

            let m = matcher(PathPredicate::Glob("key[!0-9].pem".into()), DirectoryPolicy::FilesOnly);
            assert!(m.matches_path("keyx.pem"));
        }

        #[test]
        fn prefix_policy_matches_directory_glob() {
            let m = matcher(PathPredicate::Glob("secret*".into()), DirectoryPolicy::Prefix);
            assert!(m.matches_path("secrets/prod.env"));
            assert!(m.matches_path("app/secret_dir/x"));

            let m = matcher(PathPredicate::Glob("secret*".into()), DirectoryPolicy::FilesOnly);
            assert!(!m.matches_path("secrets/prod.env"));
        }

        #[test]
        fn unclosed_class_rejected() {
            assert!(PathMatcher::compile(&PathPredicate::Glob("a[bc".into()), DirectoryPolicy::Prefix).is_err());
        }
    }

    mod content {
        use super::*;

        fn entry(path: &str) -> TreeEntry {
            TreeEntry {
                path: path.into(),
                mode: TreeEntry::MODE_FILE,
                blob: Oid::new("a".repeat(40)).unwrap(),
            }
        }

        #[test]
        fn matches_blob_bytes() {
            let m = matcher(PathPredicate::Content("ghp_[A-Za-z0-9]{8}".into()), DirectoryPolicy::Prefix);
            assert!(m.needs_content());
            assert!(!m.matches_path("any"));
            assert!(m
                .matches_entry(&entry("notes.txt"), |_| Ok(b"token ghp_ABCDEFGH".to_vec()))
                .unwrap());
            assert!(!m
                .matches_entry(&entry("notes.txt"), |_| Ok(b"nothing here".to_vec()))
                .unwrap());
        }

        #[test]
        fn cache_loads_each_blob_once() {
            let m = matcher(PathPredicate::Content("secret".into()), DirectoryPolicy::Prefix);
            let mut cache = ContentCache::new();
            let mut loads = 0;
            for path in ["a", "b", "c"] {
                let hit = cache
                    .matches(&m, &entry(path), |_| {
                        loads += 1;
                        Ok(b"secret".to_vec())
                    })
                    .unwrap();
                assert!(hit);
            }
            assert_eq!(loads, 1);
        }

        #[test]
        fn path_match_skips_content_load() {
            let m = matcher(
                PathPredicate::AnyOf(vec![
                    PathPredicate::Exact(".env".into()),
                    PathPredicate::Content("x".into()),
                ]),
                DirectoryPolicy::Prefix,
            );
            let hit = m
                .matches_entry(&entry(".env"), |_| panic!("content must not be read"))
                .unwrap();
            assert!(hit);
        }
    }

    #[test]
    fn empty_any_of_rejected() {
        assert!(PathMatcher::compile(&PathPredicate::AnyOf(vec![]), DirectoryPolicy::Prefix).is_err());
    }

    #[test]
    fn display_lists_alternatives() {
        let p = PathPredicate::AnyOf(vec![
            PathPredicate::Exact("a".into()),
            PathPredicate::Glob("*.b".into()),
        ]);
        assert_eq!(p.to_string(), "path 'a' or glob '*.b'");
    }
}
