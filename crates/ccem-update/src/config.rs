use serde::{Deserialize, Serialize};

use crate::{UpdateChannel, UpdateError};

/// Which channels may move the installation to an older release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DowngradePolicy {
    /// Every channel may downgrade.
    Always,
    /// Only the stable channel may downgrade, so leaving beta rolls back to
    /// the newest stable build while beta never goes backwards on its own.
    #[default]
    StableOnly,
    Never,
}

impl DowngradePolicy {
    pub fn allows(self, channel: UpdateChannel) -> bool {
        match self {
            DowngradePolicy::Always => true,
            DowngradePolicy::StableOnly => channel == UpdateChannel::Stable,
            DowngradePolicy::Never => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DowngradePolicy::Always => "always",
            DowngradePolicy::StableOnly => "stable-only",
            DowngradePolicy::Never => "never",
        }
    }
}

impl std::fmt::Display for DowngradePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DowngradePolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "always" => Ok(Self::Always),
            "stable-only" => Ok(Self::StableOnly),
            "never" => Ok(Self::Never),
            _ => anyhow::bail!(
                "invalid downgrade policy '{}'; expected always|stable-only|never",
                value
            ),
        }
    }
}

/// Location of and credentials for the release feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConfiguration {
    repository_url: String,
    access_token: Option<String>,
    downgrade_policy: DowngradePolicy,
    api_base_url: Option<String>,
}

impl UpdateConfiguration {
    /// Fails with [`UpdateError::Configuration`] when `repository_url` is blank.
    pub fn new(repository_url: impl Into<String>) -> Result<Self, UpdateError> {
        let repository_url = repository_url.into();
        if repository_url.trim().is_empty() {
            return Err(UpdateError::Configuration(
                "a valid release repository URL is required".to_string(),
            ));
        }
        Ok(Self {
            repository_url: repository_url.trim().to_string(),
            access_token: None,
            downgrade_policy: DowngradePolicy::default(),
            api_base_url: None,
        })
    }

    /// Sets the token used for private repositories; blank tokens are ignored.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.access_token = Some(token.trim().to_string()).filter(|value| !value.is_empty());
        self
    }

    pub fn with_downgrade_policy(mut self, policy: DowngradePolicy) -> Self {
        self.downgrade_policy = policy;
        self
    }

    /// Overrides the releases API host (GitHub Enterprise, test servers).
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn repository_url(&self) -> &str {
        &self.repository_url
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn downgrade_policy(&self) -> DowngradePolicy {
        self.downgrade_policy
    }

    pub fn api_base_url(&self) -> Option<&str> {
        self.api_base_url.as_deref()
    }
}

/// Channel-bound knobs handed to an update manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    pub explicit_channel: String,
    pub allow_downgrade: bool,
    pub include_prerelease: bool,
}

/// Maps configuration plus channel onto manager options.
pub fn derive_manager_options(
    configuration: &UpdateConfiguration,
    channel: UpdateChannel,
) -> ManagerOptions {
    ManagerOptions {
        explicit_channel: channel.as_str().to_string(),
        allow_downgrade: configuration.downgrade_policy().allows(channel),
        include_prerelease: channel.is_prerelease(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_downgrade_policy_parses_cli_spellings() {
        assert_eq!("stable-only".parse::<DowngradePolicy>().unwrap(), DowngradePolicy::StableOnly);
        assert_eq!("STABLE_ONLY".parse::<DowngradePolicy>().unwrap(), DowngradePolicy::StableOnly);
        assert_eq!("never".parse::<DowngradePolicy>().unwrap(), DowngradePolicy::Never);
        assert!("sometimes".parse::<DowngradePolicy>().is_err());
        assert_eq!(DowngradePolicy::default().to_string(), "stable-only");
    }

    #[test]
    fn unit_configuration_rejects_blank_repository_url() {
        for blank in ["", "   ", "\t\n"] {
            let error = UpdateConfiguration::new(blank).expect_err("blank url must fail");
            assert!(matches!(error, UpdateError::Configuration(_)));
        }
        let config = UpdateConfiguration::new(" https://github.com/mchave3/CCEM ").expect("valid");
        assert_eq!(config.repository_url(), "https://github.com/mchave3/CCEM");
        assert_eq!(config.access_token(), None);
    }

    #[test]
    fn unit_configuration_ignores_blank_access_token() {
        let config = UpdateConfiguration::new("https://github.com/mchave3/CCEM")
            .expect("valid")
            .with_access_token("  ");
        assert_eq!(config.access_token(), None);
        let config = config.with_access_token("ghp_secret");
        assert_eq!(config.access_token(), Some("ghp_secret"));
    }

    #[test]
    fn unit_derive_manager_options_default_policy_downgrades_only_on_stable() {
        let config = UpdateConfiguration::new("https://github.com/mchave3/CCEM").expect("valid");

        let stable = derive_manager_options(&config, UpdateChannel::Stable);
        assert_eq!(
            stable,
            ManagerOptions {
                explicit_channel: "stable".to_string(),
                allow_downgrade: true,
                include_prerelease: false,
            }
        );

        let beta = derive_manager_options(&config, UpdateChannel::Beta);
        assert_eq!(
            beta,
            ManagerOptions {
                explicit_channel: "beta".to_string(),
                allow_downgrade: false,
                include_prerelease: true,
            }
        );
    }

    #[test]
    fn unit_derive_manager_options_honors_explicit_policies() {
        let base = UpdateConfiguration::new("https://github.com/mchave3/CCEM").expect("valid");
        let always = base.clone().with_downgrade_policy(DowngradePolicy::Always);
        let never = base.with_downgrade_policy(DowngradePolicy::Never);
        for channel in [UpdateChannel::Stable, UpdateChannel::Beta] {
            assert!(derive_manager_options(&always, channel).allow_downgrade);
            assert!(!derive_manager_options(&never, channel).allow_downgrade);
        }
    }
}
