//! 流水线配置。
//!
//! # 教案式说明
//! - **意图 (Why)**：高水位与监听器上限是部署相关的调优参数，应允许运维通过 TOML 调整，
//!   而非散落在构造调用处；
//! - **契约 (What)**：
//!   - `high_water_mark`：转换阶段待交付队列达到该长度时，写入返回 `Saturated`，必须 `>= 1`；
//!   - `max_listeners`：单种信号监听器数量告警阈值，`0` 表示不设上限；
//!   - 未出现的字段取默认值，未知字段视为错误；
//! - **风险 (Trade-offs)**：配置只在构造时读取一次，运行期修改需要重建阶段。

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::signal::DEFAULT_MAX_LISTENERS;

/// 转换阶段默认高水位。
pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowConfig {
    pub high_water_mark: usize,
    pub max_listeners: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            max_listeners: DEFAULT_MAX_LISTENERS,
        }
    }
}

impl FlowConfig {
    /// 从 TOML 文本载入并校验。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigurationError> {
        let config: Self =
            toml::from_str(source).map_err(|error| ConfigurationError::InvalidConfig {
                detail: error.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.high_water_mark == 0 {
            return Err(ConfigurationError::InvalidConfig {
                detail: "high_water_mark must be at least 1".to_owned(),
            });
        }
        Ok(())
    }

    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    pub fn with_max_listeners(mut self, max_listeners: usize) -> Self {
        self.max_listeners = max_listeners;
        self
    }
}
