//! Module identity and the escaping rules for proxy URLs.
//!
//! Module paths and versions are case-sensitive, but the proxy protocol
//! requires case-insensitive-safe URLs: every uppercase letter is encoded as
//! `!` followed by its lowercase form (`!m` decodes to `M`).

use crate::error::{Result, SumdbError};

/// A module path paired with a version, the natural key of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleVersion {
    /// Module path, e.g. `golang.org/x/mod`.
    pub path: String,
    /// Module version, e.g. `v0.17.0`.
    pub version: String,
}

impl ModuleVersion {
    /// Create a module version from its two components.
    pub fn new(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }

    /// Parse a `path@version` string.
    ///
    /// Rejects paths containing `@`, which keeps the string form unambiguous
    /// (it doubles as the in-flight deduplication key).
    pub fn parse(s: &str) -> Result<Self> {
        let (path, version) = s.split_once('@').ok_or_else(|| SumdbError::InvalidModule {
            reason: format!("expected path@version, got {s:?}"),
        })?;
        if path.is_empty() || version.is_empty() {
            return Err(SumdbError::InvalidModule {
                reason: format!("empty path or version in {s:?}"),
            });
        }
        if version.contains('@') {
            return Err(SumdbError::InvalidModule {
                reason: format!("multiple '@' in {s:?}"),
            });
        }
        Ok(Self::new(path, version))
    }

    /// The single-flight key for this module version.
    pub fn flight_key(&self) -> String {
        format!("{}@{}", self.path, self.version)
    }

    /// The escaped `(path, version)` pair used to build proxy URLs.
    pub fn escaped(&self) -> Result<(String, String)> {
        Ok((escape_path(&self.path)?, escape_version(&self.version)?))
    }
}

impl std::fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.path, self.version)
    }
}

/// Escape a module path for use in a proxy URL.
pub fn escape_path(path: &str) -> Result<String> {
    check_chars(path, "path")?;
    Ok(escape(path))
}

/// Escape a module version for use in a proxy URL.
pub fn escape_version(version: &str) -> Result<String> {
    if version.contains('/') {
        return Err(SumdbError::InvalidModule {
            reason: format!("version {version:?} contains '/'"),
        });
    }
    check_chars(version, "version")?;
    Ok(escape(version))
}

/// Invert [`escape_path`].
pub fn unescape_path(escaped: &str) -> Result<String> {
    let path = unescape(escaped, "path")?;
    check_chars(&path, "path")?;
    Ok(path)
}

/// Invert [`escape_version`].
pub fn unescape_version(escaped: &str) -> Result<String> {
    let version = unescape(escaped, "version")?;
    if version.contains('/') {
        return Err(SumdbError::InvalidModule {
            reason: format!("version {version:?} contains '/'"),
        });
    }
    check_chars(&version, "version")?;
    Ok(version)
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_uppercase() {
            out.push('!');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape(escaped: &str, what: &str) -> Result<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c.is_ascii_uppercase() {
            return Err(SumdbError::InvalidModule {
                reason: format!("escaped {what} {escaped:?} contains uppercase letter"),
            });
        }
        if c == '!' {
            match chars.next() {
                Some(l) if l.is_ascii_lowercase() => out.push(l.to_ascii_uppercase()),
                _ => {
                    return Err(SumdbError::InvalidModule {
                        reason: format!("invalid '!' escape in {what} {escaped:?}"),
                    })
                }
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

// The character set accepted in paths and versions. This is the set the
// proxy protocol can carry in a URL path segment; deeper structural rules
// (element lengths, reserved names) are the upstream's concern.
fn check_chars(s: &str, what: &str) -> Result<()> {
    if s.is_empty() {
        return Err(SumdbError::InvalidModule {
            reason: format!("empty {what}"),
        });
    }
    for c in s.chars() {
        let ok = c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | '+' | '/');
        if !ok {
            return Err(SumdbError::InvalidModule {
                reason: format!("{what} {s:?} contains disallowed character {c:?}"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_module() {
        let m = ModuleVersion::parse("golang.org/x/mod@v0.17.0").unwrap();
        assert_eq!(m.path, "golang.org/x/mod");
        assert_eq!(m.version, "v0.17.0");
        assert_eq!(m.flight_key(), "golang.org/x/mod@v0.17.0");
    }

    #[test]
    fn test_parse_module_invalid() {
        assert!(ModuleVersion::parse("no-version").is_err());
        assert!(ModuleVersion::parse("@v1.0.0").is_err());
        assert!(ModuleVersion::parse("path@").is_err());
        assert!(ModuleVersion::parse("a@b@c").is_err());
    }

    #[test]
    fn test_escape_lowercase_passthrough() {
        assert_eq!(escape_path("golang.org/x/mod").unwrap(), "golang.org/x/mod");
        assert_eq!(escape_version("v1.5.1").unwrap(), "v1.5.1");
    }

    #[test]
    fn test_escape_uppercase() {
        assert_eq!(
            escape_path("github.com/Azure/azure-sdk").unwrap(),
            "github.com/!azure/azure-sdk"
        );
        assert_eq!(escape_version("v1.0.0-RC1").unwrap(), "v1.0.0-!r!c1");
    }

    #[test]
    fn test_unescape_round_trip() {
        for s in ["github.com/Masterminds/semver", "v2.0.0-Beta.1"] {
            let esc = escape(s);
            assert_eq!(unescape(&esc, "path").unwrap(), s);
        }
    }

    #[test]
    fn test_unescape_rejects_bad_escapes() {
        assert!(unescape_path("github.com/!Azure").is_err());
        assert!(unescape_path("github.com/azure!").is_err());
        assert!(unescape_path("github.com/Azure").is_err());
    }

    #[test]
    fn test_disallowed_characters() {
        assert!(escape_path("example.com/a b").is_err());
        assert!(escape_version("v1.0.0/extra").is_err());
    }
}
