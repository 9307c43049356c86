//! Version support and upgrade policy for the kubeadm strategy.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::KubernetesVersion;
use crate::error::{BootstrapError, Result};

/// Oldest supported release.
pub const MIN_VERSION: &str = "1.25.0";

/// First unsupported release.
pub const MAX_VERSION_EXCLUSIVE: &str = "1.32.0";

/// kubeadm switched to the `v1beta4` config API in this minor release.
const V1BETA4_FROM_MINOR: u64 = 31;

static IMAGE_TAG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"image:\s*["']?\S+:(v?\d+\.\d+\.\d+[\w.+-]*)"#).ok());

static CONFIG_VERSION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?m)^kubernetesVersion:[ \t]*"?(v?\d+\.\d+\.\d+[\w.+-]*)"?[ \t]*$"#).ok()
});

static KUBELET_PATH: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"/(v\d+\.\d+\.\d+[\w.+-]*)/kubelet\b").ok());

/// kubeadm configuration API revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigApi {
    V1Beta3,
    V1Beta4,
}

impl ConfigApi {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1Beta3 => "v1beta3",
            Self::V1Beta4 => "v1beta4",
        }
    }
}

fn bound(text: &str) -> KubernetesVersion {
    // Constants above are valid semver.
    text.parse().unwrap_or_else(|_| unreachable!("invalid version constant {text}"))
}

/// Supported range as `(min, max_exclusive)`.
#[must_use]
pub fn supported_range() -> (KubernetesVersion, KubernetesVersion) {
    (bound(MIN_VERSION), bound(MAX_VERSION_EXCLUSIVE))
}

/// Fail fast on versions this strategy cannot install.
///
/// # Errors
/// Returns a configuration error naming the supported range.
pub fn ensure_supported(version: &KubernetesVersion) -> Result<()> {
    let (min, max) = supported_range();
    if !version.semver().pre.is_empty() {
        return Err(BootstrapError::config_at(
            "pre-release Kubernetes versions are not supported",
            version.as_str(),
        ));
    }
    if *version < min || *version >= max {
        return Err(BootstrapError::config_at(
            format!("kubeadm strategy supports Kubernetes {min} up to (not including) {max}"),
            version.as_str(),
        ));
    }
    Ok(())
}

/// Config API revision for a version.
#[must_use]
pub fn config_api(version: &KubernetesVersion) -> ConfigApi {
    if version.major() > 1 || version.minor() >= V1BETA4_FROM_MINOR {
        ConfigApi::V1Beta4
    } else {
        ConfigApi::V1Beta3
    }
}

/// Check the upgrade policy: forward only, at most one minor release ahead
/// of the oldest running component.
///
/// # Errors
/// Returns [`BootstrapError::Upgrade`] when the move is not allowed.
pub fn check_upgrade(
    oldest: &KubernetesVersion,
    newest: &KubernetesVersion,
    target: &KubernetesVersion,
) -> Result<()> {
    let refuse = |from: &KubernetesVersion, message: &str| BootstrapError::Upgrade {
        from: from.to_string(),
        to: target.to_string(),
        message: message.to_string(),
    };

    if target < newest {
        return Err(refuse(newest, "downgrades are not supported"));
    }
    if target.major() != oldest.major() {
        return Err(refuse(oldest, "major version upgrades are not supported"));
    }
    if target.minor() > oldest.minor() + 1 {
        return Err(refuse(
            oldest,
            "control plane can only move one minor version at a time",
        ));
    }
    Ok(())
}

/// Version from a static pod manifest's `image:` line.
#[must_use]
pub fn parse_image_version(text: &str) -> Option<KubernetesVersion> {
    let re = IMAGE_TAG.as_ref()?;
    let captures = re.captures(text)?;
    captures.get(1)?.as_str().parse().ok()
}

/// Version from the kubelet binary path in a systemd unit.
#[must_use]
pub fn parse_kubelet_version(unit: &str) -> Option<KubernetesVersion> {
    let re = KUBELET_PATH.as_ref()?;
    let captures = re.captures(unit)?;
    captures.get(1)?.as_str().parse().ok()
}

/// Version a staged kubeadm configuration was rendered for.
#[must_use]
pub fn parse_config_version(document: &str) -> Option<KubernetesVersion> {
    let re = CONFIG_VERSION.as_ref()?;
    let captures = re.captures(document)?;
    captures.get(1)?.as_str().parse().ok()
}

/// Rewrite the `kubernetesVersion` line of a staged configuration, leaving
/// every other line as it was applied.
#[must_use]
pub fn with_config_version(document: &str, version: &KubernetesVersion) -> Option<String> {
    let re = CONFIG_VERSION.as_ref()?;
    let found = re.find(document)?;
    Some(format!(
        "{}kubernetesVersion: {}{}",
        &document[..found.start()],
        version.tag(),
        &document[found.end()..]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn v(text: &str) -> KubernetesVersion {
        text.parse().unwrap()
    }

    #[test]
    fn test_supported_range() {
        assert!(ensure_supported(&v("1.28.0")).is_ok());
        assert!(ensure_supported(&v("1.31.4")).is_ok());
        assert_eq!(
            ensure_supported(&v("1.20.0")).unwrap_err().kind(),
            ErrorKind::Configuration
        );
        assert!(ensure_supported(&v("1.32.0")).is_err());
        assert!(ensure_supported(&v("1.29.0-rc.1")).is_err());
    }

    #[test]
    fn test_config_api_switch() {
        assert_eq!(config_api(&v("1.30.2")), ConfigApi::V1Beta3);
        assert_eq!(config_api(&v("1.31.0")), ConfigApi::V1Beta4);
    }

    #[test]
    fn test_upgrade_policy() {
        let current = v("1.28.0");
        assert!(check_upgrade(&current, &current, &v("1.29.0")).is_ok());
        assert!(check_upgrade(&current, &current, &v("1.28.4")).is_ok());
        assert!(check_upgrade(&current, &current, &current).is_ok());

        let err = check_upgrade(&current, &current, &v("1.27.9")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upgrade);
        assert!(err.to_string().contains("downgrades"));

        let err = check_upgrade(&current, &current, &v("1.30.0")).unwrap_err();
        assert!(err.to_string().contains("one minor version"));

        // Partially upgraded: scheduler still on 1.28, apiserver on 1.29.
        assert!(check_upgrade(&v("1.28.0"), &v("1.29.0"), &v("1.29.0")).is_ok());
        assert!(check_upgrade(&v("1.28.0"), &v("1.29.0"), &v("1.28.0")).is_err());
    }

    #[test]
    fn test_parse_image_version() {
        let line = "    image: registry.k8s.io/kube-apiserver:v1.28.0\n";
        assert_eq!(parse_image_version(line), Some(v("1.28.0")));
        let quoted = "    image: \"registry.k8s.io/kube-scheduler:v1.29.3\"";
        assert_eq!(parse_image_version(quoted), Some(v("1.29.3")));
        assert_eq!(parse_image_version("image: pause"), None);
    }

    #[test]
    fn test_parse_kubelet_version() {
        let unit = "[Service]\nExecStart=\nExecStart=/var/lib/kubestrap/binaries/v1.28.0/kubelet --config=/var/lib/kubelet/config.yaml\n";
        assert_eq!(parse_kubelet_version(unit), Some(v("1.28.0")));
        assert_eq!(parse_kubelet_version("ExecStart=/usr/bin/kubelet"), None);
    }

    #[test]
    fn test_config_version_rewrite_keeps_other_lines() {
        let staged = "kind: ClusterConfiguration\nkubernetesVersion: v1.28.0\napiServer:\n  extraArgs:\n    audit-log-maxage: \"30\"\n";
        assert_eq!(parse_config_version(staged), Some(v("1.28.0")));

        let next = with_config_version(staged, &v("1.29.0")).unwrap();
        assert_eq!(parse_config_version(&next), Some(v("1.29.0")));
        assert_eq!(
            next,
            staged.replace("kubernetesVersion: v1.28.0", "kubernetesVersion: v1.29.0")
        );

        assert_eq!(parse_config_version("kind: InitConfiguration\n"), None);
        assert_eq!(with_config_version("kind: InitConfiguration\n", &v("1.29.0")), None);
    }
}
