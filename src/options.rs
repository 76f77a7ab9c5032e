//! Per-container options read from pod annotations.
//!
//! Annotations are keyed by container name, e.g.
//! `enable.version-checker.io/my-container: "true"`.

use regex::Regex;
use std::collections::BTreeMap;
use thiserror::Error;

pub const ENABLE_ANNOTATION_KEY: &str = "enable.version-checker.io";
pub const USE_SHA_ANNOTATION_KEY: &str = "use-sha.version-checker.io";
pub const MATCH_REGEX_ANNOTATION_KEY: &str = "match-regex.version-checker.io";
pub const OVERRIDE_URL_ANNOTATION_KEY: &str = "override-url.version-checker.io";

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Compare image digests instead of tags.
    pub use_sha: bool,
    /// Only tags matching this expression are candidates.
    pub match_regex: Option<Regex>,
    /// Look up tags for this `host/path` instead of the container image.
    pub override_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("invalid value {value:?} for {key}, expected \"true\" or \"false\"")]
    InvalidBool { key: String, value: String },
    #[error("invalid regex {value:?} for {key}: {source}")]
    InvalidRegex {
        key: String,
        value: String,
        #[source]
        source: regex::Error,
    },
    #[error("cannot define use-sha.version-checker.io together with match-regex.version-checker.io")]
    ShaWithRegex,
    #[error("{key} must not be empty")]
    EmptyOverrideUrl { key: String },
}

/// Reads the annotations of one pod.
pub struct Builder<'a> {
    annotations: Option<&'a BTreeMap<String, String>>,
}

impl<'a> Builder<'a> {
    pub fn new(annotations: Option<&'a BTreeMap<String, String>>) -> Self {
        Self { annotations }
    }

    fn get(&self, key: &str, container_name: &str) -> Option<(String, &'a str)> {
        let key = format!("{}/{}", key, container_name);
        let value = self.annotations?.get(&key)?;
        Some((key, value.as_str()))
    }

    /// An explicit enable annotation wins over `default_all`.
    pub fn is_enabled(&self, default_all: bool, container_name: &str) -> bool {
        match self.get(ENABLE_ANNOTATION_KEY, container_name) {
            Some((_, value)) => value.trim() == "true",
            None => default_all,
        }
    }

    pub fn options(&self, container_name: &str) -> Result<Options, OptionsError> {
        let mut opts = Options::default();

        if let Some((key, value)) = self.get(USE_SHA_ANNOTATION_KEY, container_name) {
            opts.use_sha = match value.trim() {
                "true" => true,
                "false" => false,
                _ => {
                    return Err(OptionsError::InvalidBool {
                        key,
                        value: value.to_owned(),
                    });
                }
            };
        }

        if let Some((key, value)) = self.get(MATCH_REGEX_ANNOTATION_KEY, container_name) {
            let regex = Regex::new(value).map_err(|source| OptionsError::InvalidRegex {
                key,
                value: value.to_owned(),
                source,
            })?;
            opts.match_regex = Some(regex);
        }

        if let Some((key, value)) = self.get(OVERRIDE_URL_ANNOTATION_KEY, container_name) {
            let value = value.trim();
            if value.is_empty() {
                return Err(OptionsError::EmptyOverrideUrl { key });
            }
            opts.override_url = Some(value.to_owned());
        }

        if opts.use_sha && opts.match_regex.is_some() {
            return Err(OptionsError::ShaWithRegex);
        }

        Ok(opts)
    }
}
