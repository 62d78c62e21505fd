//! Session creation parameters.

use std::collections::HashMap;

use sandbox_context::{ContextSync, SyncPolicy};
use sandbox_core::{CreateSessionRequest, PersistenceEntry};
use serde::{Deserialize, Serialize};

/// Whether an app rule allows or blocks the listed packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppRuleType {
    White,
    Black,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppManagerRule {
    pub rule_type: AppRuleType,
    pub app_package_name_list: Vec<String>,
}

/// Mobile-image specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileExtraConfig {
    pub lock_resolution: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_manager_rule: Option<AppManagerRule>,
}

/// Image-family specific settings passed through at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraConfigs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile: Option<MobileExtraConfig>,
}

/// Parameters for creating a session.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionParams {
    pub labels: HashMap<String, String>,
    pub image_id: Option<String>,
    pub context_syncs: Vec<ContextSync>,
    pub extra_configs: Option<ExtraConfigs>,
    pub is_vpc: bool,
    pub enable_browser_replay: bool,
}

impl CreateSessionParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn image(mut self, image_id: impl Into<String>) -> Self {
        self.image_id = Some(image_id.into());
        self
    }

    #[must_use]
    pub fn context_sync(mut self, binding: ContextSync) -> Self {
        self.context_syncs.push(binding);
        self
    }

    #[must_use]
    pub fn extra_configs(mut self, extra: ExtraConfigs) -> Self {
        self.extra_configs = Some(extra);
        self
    }

    #[must_use]
    pub const fn vpc(mut self, is_vpc: bool) -> Self {
        self.is_vpc = is_vpc;
        self
    }

    #[must_use]
    pub const fn browser_replay(mut self, enabled: bool) -> Self {
        self.enable_browser_replay = enabled;
        self
    }

    /// Lower into the remote create call arguments.
    ///
    /// # Errors
    /// Returns error if a sync policy or the extra configs fail to encode.
    pub fn to_request(&self) -> Result<CreateSessionRequest, serde_json::Error> {
        let persistence_data = self
            .context_syncs
            .iter()
            .map(|b| -> Result<PersistenceEntry, serde_json::Error> {
                Ok(PersistenceEntry {
                    context_id: b.context_id().to_string(),
                    path: b.path().to_string(),
                    policy: b.policy().map(SyncPolicy::to_json).transpose()?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CreateSessionRequest {
            labels: self.labels.clone(),
            image_id: self.image_id.clone(),
            persistence_data,
            extra_configs: self.extra_configs.as_ref().map(serde_json::to_value).transpose()?,
            vpc_resource: self.is_vpc,
            enable_record: self.enable_browser_replay,
        })
    }
}

#[cfg(test)]
mod tests {
    use sandbox_context::UploadMode;
    use tokio_test::assert_ok;

    use super::*;

    #[test]
    fn test_to_request() {
        let policy = SyncPolicy::default().with_upload_mode(UploadMode::Archive);
        let params = CreateSessionParams::new()
            .label("project", "demo")
            .image("linux_latest")
            .context_sync(assert_ok!(ContextSync::new("ctx-1", "/tmp/data", Some(policy))))
            .extra_configs(ExtraConfigs {
                mobile: Some(MobileExtraConfig {
                    lock_resolution: true,
                    app_manager_rule: Some(AppManagerRule {
                        rule_type: AppRuleType::White,
                        app_package_name_list: vec!["com.example.app".into()],
                    }),
                }),
            })
            .vpc(true)
            .browser_replay(true);

        let req = assert_ok!(params.to_request());
        assert_eq!(req.labels["project"], "demo");
        assert_eq!(req.image_id.as_deref(), Some("linux_latest"));
        assert!(req.vpc_resource);
        assert!(req.enable_record);
        assert_eq!(req.persistence_data.len(), 1);
        assert_eq!(req.persistence_data[0].path, "/tmp/data");
        let policy: serde_json::Value =
            serde_json::from_str(req.persistence_data[0].policy.as_deref().unwrap()).unwrap();
        assert_eq!(policy["uploadPolicy"]["uploadMode"], "Archive");
        let extra = req.extra_configs.unwrap();
        assert_eq!(extra["mobile"]["lockResolution"], true);
        assert_eq!(extra["mobile"]["appManagerRule"]["ruleType"], "White");
    }

    #[test]
    fn test_binding_without_policy_sends_none() {
        let params = CreateSessionParams::new()
            .context_sync(assert_ok!(ContextSync::new("ctx-1", "/home/user", None)));
        assert!(assert_ok!(params.to_request()).persistence_data[0].policy.is_none());
    }
}
