//! Image reference parsing.
//!
//! Parses references like `r8.im/acme/llama:v1` into structured components.
//! Two references name the same image for lookup purposes iff their
//! canonical forms match.

use cog_core::error::{CogError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Validated image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedRef {
    original: String,
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ParsedRef {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `llama` → docker.io/library/llama:latest
    /// - `acme/llama:v1` → docker.io/acme/llama:v1
    /// - `r8.im/acme/llama` → r8.im/acme/llama:latest
    /// - `localhost:5000/llama@sha256:abc...` → digest-addressed, no tag
    pub fn parse(reference: &str) -> Result<Self> {
        let original = reference.trim();
        if original.is_empty() {
            return Err(CogError::InvalidReference("empty image reference".to_string()));
        }

        let (name_tag, digest) = match original.rsplit_once('@') {
            Some((name, digest)) => {
                validate_digest(original, digest)?;
                (name, Some(digest.to_string()))
            }
            None => (original, None),
        };

        // A tag colon can only appear after the last slash; an earlier colon is a port.
        let last_slash = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_slash..].rfind(':') {
            Some(colon) => {
                let split = last_slash + colon;
                (&name_tag[..split], Some(name_tag[split + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if let Some(ref tag) = tag {
            validate_tag(original, tag)?;
        }

        let (registry, repository) = split_registry_repository(original, name)?;

        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ParsedRef {
            original: original.to_string(),
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// The string this reference was parsed from.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Registry host, including port if present.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// `registry/repository` without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Canonical string form: `registry/repository[:tag][@digest]`.
    pub fn canonical(&self) -> String {
        let mut s = self.name();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    /// Whether two references name the same image.
    pub fn is_equivalent(&self, other: &ParsedRef) -> bool {
        self.canonical() == other.canonical()
    }

    /// Same repository, addressed by `digest` instead of tag.
    pub fn with_digest(&self, digest: &str) -> Self {
        let canonical = format!("{}@{}", self.name(), digest);
        ParsedRef {
            original: canonical,
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.to_string()),
        }
    }
}

impl std::fmt::Display for ParsedRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl std::str::FromStr for ParsedRef {
    type Err = CogError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(original: &str, name: &str) -> Result<(String, String)> {
    let (registry, repository) = match name.split_once('/') {
        // The first component is a registry if it looks like a hostname.
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first.to_string(), rest.to_string())
        }
        Some(_) => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        None => (DEFAULT_REGISTRY.to_string(), format!("library/{}", name)),
    };

    if repository.is_empty() || repository.split('/').any(|c| c.is_empty()) {
        return Err(CogError::InvalidReference(format!(
            "empty repository component in '{}'",
            original
        )));
    }
    let valid = repository
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/'));
    if !valid {
        return Err(CogError::InvalidReference(format!(
            "repository '{}' must be lowercase alphanumerics separated by '.', '_', '-' or '/'",
            repository
        )));
    }

    Ok((registry, repository))
}

fn validate_tag(original: &str, tag: &str) -> Result<()> {
    let valid = !tag.is_empty()
        && tag.len() <= 128
        && !tag.starts_with(['.', '-'])
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(CogError::InvalidReference(format!(
            "invalid tag '{}' in '{}'",
            tag, original
        )))
    }
}

fn validate_digest(original: &str, digest: &str) -> Result<()> {
    match digest.split_once(':') {
        Some((algorithm, hex))
            if !algorithm.is_empty()
                && !hex.is_empty()
                && hex.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            Ok(())
        }
        _ => Err(CogError::InvalidReference(format!(
            "invalid digest in '{}': expected algorithm:hex",
            original
        ))),
    }
}
