use std::fmt;

pub const DEFAULT_HOST: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";

/// A container image as written in a pod spec: `[host/]path[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub host: String,
    pub path: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    MissingPath(String),
    InvalidDigest(String),
}

impl std::error::Error for ParseError {}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "image reference is empty"),
            ParseError::MissingPath(image) => write!(f, "image path is missing: {}", image),
            ParseError::InvalidDigest(image) => write!(f, "invalid image digest: {}", image),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let (name, digest) = match s.split_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(ParseError::InvalidDigest(s.to_string()));
                }
                (name, Some(digest.to_string()))
            }
            None => (s, None),
        };

        // A colon after the last slash starts the tag, earlier ones belong to a host port
        let (name, tag) = match name.rfind(':') {
            Some(pos) if pos > name.rfind('/').unwrap_or(0) => {
                (&name[..pos], Some(name[pos + 1..].to_string()))
            }
            _ => (name, None),
        };

        let (host, path) = match name.split_once('/') {
            Some((first, rest)) if is_host(first) => (first.to_string(), rest.to_string()),
            _ => (DEFAULT_HOST.to_string(), name.to_string()),
        };

        if path.is_empty() {
            return Err(ParseError::MissingPath(s.to_string()));
        }

        Ok(Self {
            host,
            path,
            tag,
            digest,
        })
    }

    /// `host/path`, without tag or digest.
    pub fn url(&self) -> String {
        format!("{}/{}", self.host, self.path)
    }

    /// Tag used by the container runtime when none is written.
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }
}

fn is_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}
