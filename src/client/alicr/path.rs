use anyhow::{Context, Result};
use regex::Regex;

/// Namespace Alibaba Cloud uses for images referenced without one.
pub const DEFAULT_NAMESPACE: &str = "acs";

/// Public, VPC and international registry hosts, e.g. `registry-vpc.cn-hangzhou.aliyuncs.com`.
pub(super) fn host_pattern() -> Result<Regex> {
    Regex::new(r"^registry(?:-vpc|-intl)?\.([a-z0-9-]+)\.aliyuncs\.com$")
        .context("Invalid regex pattern for Alibaba Cloud registry hosts")
}

/// Region token of `host`, if the host belongs to Alibaba Cloud.
pub(super) fn region_from_host<'h>(pattern: &Regex, host: &'h str) -> Option<&'h str> {
    let captures = pattern.captures(host)?;
    captures.get(1).map(|region| region.as_str())
}

pub(super) fn repo_image_from_path(path: &str) -> (String, String) {
    match path.rfind('/') {
        None => (DEFAULT_NAMESPACE.to_owned(), path.to_owned()),
        Some(last) => (path[..last].to_owned(), path[last + 1..].to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RegistryClient;
    use crate::client::alicr::{Client, Options};

    fn client() -> Client {
        Client::new(Options::default(), reqwest::Client::new()).unwrap()
    }

    #[test]
    fn test_is_host() {
        let cases = [
            ("an empty host should be false", "", false),
            ("random string should be false", "foobar", false),
            ("random string with dots should be false", "foobar.foo", false),
            ("registry.aliyuncs.com with no region should be false", "registry.aliyuncs.com", false),
            ("wrong suffix should be false", "registry.cn-shanghai.aliyun.com", false),
            ("empty region should be false", "registry..aliyuncs.com", false),
            ("enterprise instance host should be false", "foo-registry.cn-hangzhou.cr.aliyuncs.com", false),
            ("registry.region.aliyuncs.com should be true", "registry.cn-shanghai.aliyuncs.com", true),
            ("vpc host should be true", "registry-vpc.cn-hangzhou.aliyuncs.com", true),
            ("international host should be true", "registry-intl.ap-southeast-1.aliyuncs.com", true),
        ];

        let handler = client();
        for (name, host, expected) in cases {
            assert_eq!(handler.is_host(host), expected, "{}: {}", name, host);
        }
    }

    #[test]
    fn test_region_from_host() {
        let pattern = host_pattern().unwrap();
        assert_eq!(
            region_from_host(&pattern, "registry.cn-shanghai.aliyuncs.com"),
            Some("cn-shanghai")
        );
        assert_eq!(
            region_from_host(&pattern, "registry-vpc.eu-central-1.aliyuncs.com"),
            Some("eu-central-1")
        );
        assert_eq!(region_from_host(&pattern, "docker.io"), None);
    }

    #[test]
    fn test_repo_image() {
        let cases = [
            ("single image should return as image", "aliyun-ingress-controller", "acs", "aliyun-ingress-controller"),
            ("two segments to path should return both", "aliacs-app-catalog/istio-operator", "aliacs-app-catalog", "istio-operator"),
            ("only the last separator splits", "a/b/c", "a/b", "c"),
        ];

        let handler = client();
        for (name, path, repo, image) in cases {
            assert_eq!(
                handler.repo_image_from_path(path),
                (repo.to_owned(), image.to_owned()),
                "{}",
                name
            );
        }
    }
}
