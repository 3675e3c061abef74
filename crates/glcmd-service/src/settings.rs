//! Thin logging wrappers over the singleton repositories.

use glcmd_db::settings as repo;
use glcmd_schemas::{DeviceInfo, GlucoseTargets, UserPreferences};
use sqlx::SqlitePool;
use tracing::debug;

use crate::ServiceError;

#[derive(Clone)]
pub struct SettingsService {
    pool: SqlitePool,
}

impl SettingsService {
    pub fn new(pool: SqlitePool) -> Self {
        SettingsService { pool }
    }

    pub async fn save_glucose_targets(&self, t: &GlucoseTargets) -> Result<(), ServiceError> {
        repo::save_glucose_targets(&self.pool, t).await?;
        debug!(low = t.target_low, high = t.target_high, "glucose targets saved");
        Ok(())
    }

    pub async fn glucose_targets(&self) -> Result<GlucoseTargets, ServiceError> {
        Ok(repo::find_glucose_targets(&self.pool).await?)
    }

    pub async fn save_user_preferences(&self, p: &UserPreferences) -> Result<(), ServiceError> {
        repo::save_user_preferences(&self.pool, p).await?;
        debug!("user preferences saved");
        Ok(())
    }

    pub async fn user_preferences(&self) -> Result<UserPreferences, ServiceError> {
        Ok(repo::find_user_preferences(&self.pool).await?)
    }

    pub async fn save_device_info(&self, d: &DeviceInfo) -> Result<(), ServiceError> {
        repo::save_device_info(&self.pool, d).await?;
        debug!("device info saved");
        Ok(())
    }

    pub async fn device_info(&self) -> Result<DeviceInfo, ServiceError> {
        Ok(repo::find_device_info(&self.pool).await?)
    }
}
