use common::{storage::types::build_job::Platform, utils::config::AppConfig};

/// Progress checkpoints reported while a job moves through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressMilestones {
    pub staging: u8,
    pub preparing: u8,
    pub building_start: u8,
    pub building_end: u8,
    pub publishing: u8,
}

impl ProgressMilestones {
    pub const MOBILE: Self = Self {
        staging: 10,
        preparing: 30,
        building_start: 50,
        building_end: 90,
        publishing: 90,
    };

    pub const DESKTOP: Self = Self {
        staging: 20,
        preparing: 50,
        building_start: 60,
        building_end: 60,
        publishing: 80,
    };

    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Mobile => Self::MOBILE,
            Platform::Desktop => Self::DESKTOP,
        }
    }

    /// Progress reported when toolchain step `index` of `total` starts.
    pub fn building_at(&self, index: usize, total: usize) -> u8 {
        if total == 0 {
            return self.building_start;
        }
        let span = usize::from(self.building_end.saturating_sub(self.building_start));
        let offset = span.saturating_mul(index.min(total)) / total;
        self.building_start
            .saturating_add(u8::try_from(offset).unwrap_or(u8::MAX))
            .min(self.building_end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobileProfile {
    pub app_id: String,
    pub app_name: String,
    pub web_dir: String,
    pub min_sdk: u32,
    pub target_sdk: u32,
    pub npm_command: String,
    pub npx_command: String,
    pub gradle_command: String,
}

impl Default for MobileProfile {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

impl MobileProfile {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            app_id: config.mobile_app_id.clone(),
            app_name: config.mobile_app_name.clone(),
            web_dir: "www".to_string(),
            min_sdk: config.mobile_min_sdk,
            target_sdk: config.mobile_target_sdk,
            npm_command: config.npm_command.clone(),
            npx_command: config.npx_command.clone(),
            gradle_command: config.gradle_command.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildTuning {
    pub max_extracted_bytes: u64,
    pub preserve_failed_workspaces: bool,
}

impl Default for BuildTuning {
    fn default() -> Self {
        Self {
            max_extracted_bytes: 512 * 1024 * 1024,
            preserve_failed_workspaces: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildConfig {
    pub tuning: BuildTuning,
    pub mobile: MobileProfile,
}

impl BuildConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: BuildTuning {
                max_extracted_bytes: config.max_extracted_bytes,
                preserve_failed_workspaces: config.preserve_failed_workspaces,
            },
            mobile: MobileProfile::from_app_config(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mobile_building_progress_is_interpolated() {
        let milestones = ProgressMilestones::MOBILE;

        assert_eq!(milestones.building_at(0, 6), 50);
        assert_eq!(milestones.building_at(3, 6), 70);
        assert_eq!(milestones.building_at(6, 6), 90);
        assert_eq!(milestones.building_at(9, 6), 90);
        assert_eq!(milestones.building_at(0, 0), 50);
    }

    #[test]
    fn milestones_never_decrease() {
        for milestones in [ProgressMilestones::MOBILE, ProgressMilestones::DESKTOP] {
            assert!(milestones.staging <= milestones.preparing);
            assert!(milestones.preparing <= milestones.building_start);
            assert!(milestones.building_start <= milestones.building_end);
            assert!(milestones.building_end <= milestones.publishing);
        }
    }

    #[test]
    fn build_config_follows_app_config() {
        let app = AppConfig {
            max_extracted_bytes: 4096,
            preserve_failed_workspaces: false,
            mobile_app_id: "org.example.game".into(),
            ..AppConfig::default()
        };

        let config = BuildConfig::from_app_config(&app);

        assert_eq!(config.tuning.max_extracted_bytes, 4096);
        assert!(!config.tuning.preserve_failed_workspaces);
        assert_eq!(config.mobile.app_id, "org.example.game");
        assert_eq!(config.mobile.web_dir, "www");
    }
}
