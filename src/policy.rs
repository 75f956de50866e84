//! Exact-match allow-list of request methods and paths.

use std::collections::HashSet;

/// The set of (method, path) pairs the proxy lets through.
///
/// Built once at startup and never modified, so it can be shared between
/// connections without locking. Both dimensions are deny-by-default: an empty
/// list permits nothing. Matching is exact and case-sensitive; there is no
/// wildcard or prefix matching.
#[derive(Debug, Clone, Default)]
pub struct AllowListPolicy {
    methods: HashSet<String>,
    paths: HashSet<String>,
}

impl AllowListPolicy {
    pub fn new<M, P>(methods: M, paths: P) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            methods: methods.into_iter().map(Into::into).collect(),
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn permits_method(&self, method: &str) -> bool {
        self.methods.contains(method)
    }

    pub fn permits_path(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn permits(&self, method: &str, path: &str) -> bool {
        self.permits_method(method) && self.permits_path(path)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(String::as_str)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }
}
