//! GitHub ownership scope derived from a repository/org/enterprise URL.

use url::Url;

use crate::error::{ProviderError, Result};

const ENTERPRISES_SEGMENT: &str = "enterprises";

/// Which entity a runner registers against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeKind {
    Organization { org: String },
    Repository { org: String, repo: String },
    Enterprise { enterprise: String },
}

/// Ownership scope plus the `scheme://host` base URL it lives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubScope {
    pub base_url: String,
    pub kind: ScopeKind,
}

impl GitHubScope {
    /// Classify a URL.
    ///
    /// Path segments are split on `/` with empty segments dropped:
    /// one segment is an organization, `enterprises/<slug>` is an enterprise,
    /// any other two segments are `<org>/<repo>`; anything else is rejected.
    ///
    /// `base_url` is the normalized origin: the host is lower-cased and an
    /// explicit default port is dropped (`https://GHE.corp:443/org` yields
    /// `https://ghe.corp`).
    pub fn classify(raw_url: &str) -> Result<Self> {
        let invalid = |reason: &str| ProviderError::InvalidScope {
            url: raw_url.to_string(),
            reason: reason.to_string(),
        };

        if raw_url.trim().is_empty() {
            return Err(invalid("no repository URL supplied"));
        }

        let url = Url::parse(raw_url).map_err(|e| invalid(&e.to_string()))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("URL has no host"))?;

        let base_url = match url.port() {
            Some(port) => format!("{}://{host}:{port}", url.scheme()),
            None => format!("{}://{host}", url.scheme()),
        };

        let segments: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).collect();

        let kind = match segments.as_slice() {
            [org] => ScopeKind::Organization {
                org: (*org).to_string(),
            },
            [first, enterprise] if *first == ENTERPRISES_SEGMENT => ScopeKind::Enterprise {
                enterprise: (*enterprise).to_string(),
            },
            [org, repo] => ScopeKind::Repository {
                org: (*org).to_string(),
                repo: (*repo).to_string(),
            },
            _ => return Err(invalid("URL does not match the expected patterns")),
        };

        Ok(Self { base_url, kind })
    }

    /// Organization name, empty for enterprise scopes.
    #[must_use]
    pub fn org(&self) -> &str {
        match &self.kind {
            ScopeKind::Organization { org } | ScopeKind::Repository { org, .. } => org,
            ScopeKind::Enterprise { .. } => "",
        }
    }

    /// Repository name, empty unless the scope is a repository.
    #[must_use]
    pub fn repo(&self) -> &str {
        match &self.kind {
            ScopeKind::Repository { repo, .. } => repo,
            _ => "",
        }
    }

    /// Enterprise slug, empty unless the scope is an enterprise.
    #[must_use]
    pub fn enterprise(&self) -> &str {
        match &self.kind {
            ScopeKind::Enterprise { enterprise } => enterprise,
            _ => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_organization_scope() {
        let scope = GitHubScope::classify("https://github.com/testorg").unwrap();
        assert_eq!(scope.base_url, "https://github.com");
        assert_eq!(
            scope.kind,
            ScopeKind::Organization {
                org: "testorg".to_string()
            }
        );
        assert_eq!(scope.org(), "testorg");
        assert_eq!(scope.repo(), "");
        assert_eq!(scope.enterprise(), "");
    }

    #[test]
    fn test_repository_scope() {
        let scope = GitHubScope::classify("https://github.com/org/repo").unwrap();
        assert_eq!(scope.org(), "org");
        assert_eq!(scope.repo(), "repo");
        assert_eq!(scope.enterprise(), "");
    }

    #[test]
    fn test_base_url_is_normalized() {
        let scope = GitHubScope::classify("https://GHE.corp:443/org").unwrap();
        assert_eq!(scope.base_url, "https://ghe.corp");
        let scope = GitHubScope::classify("https://ghe.corp:8443/org").unwrap();
        assert_eq!(scope.base_url, "https://ghe.corp:8443");
    }

    #[test]
    fn test_enterprise_scope() {
        let scope = GitHubScope::classify("https://ghe.example.com/enterprises/ent1").unwrap();
        assert_eq!(scope.base_url, "https://ghe.example.com");
        assert_eq!(
            scope.kind,
            ScopeKind::Enterprise {
                enterprise: "ent1".to_string()
            }
        );
        assert_eq!(scope.org(), "");
    }

    #[test]
    fn test_trailing_and_duplicate_slashes_are_ignored() {
        let scope = GitHubScope::classify("https://github.com//org/repo/").unwrap();
        assert_eq!(scope.org(), "org");
        assert_eq!(scope.repo(), "repo");
    }

    #[test]
    fn test_base_url_keeps_port_and_drops_path() {
        let scope = GitHubScope::classify("http://localhost:8080/org").unwrap();
        assert_eq!(scope.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_invalid_scopes() {
        for url in [
            "",
            "   ",
            "https://github.com/a/b/c",
            "https://github.com",
            "https://github.com/",
            "github.com/org",
            "not a url",
        ] {
            let err = GitHubScope::classify(url).unwrap_err();
            assert!(
                matches!(err, ProviderError::InvalidScope { .. }),
                "{url:?} gave {err:?}"
            );
        }
    }
}
