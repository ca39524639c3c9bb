//! 同步子系统配置
//!
//! 所有上限都是硬上限：请求超出即返回校验错误，而不是截断后部分执行

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 最近窗口拉取：单频道消息数上限
    pub max_recent_per_channel: u32,
    /// 最近窗口拉取：单次请求总消息数上限
    pub max_recent_total: u32,
    /// 增量拉取：单次请求总消息数上限
    pub max_incremental_total: u32,
    /// 增量可行性判定上限：待拉取总数不超过该值时才建议走增量同步
    ///
    /// 注意：这是"增量同步是否划算"的全局判定，与单次请求的 max_posts 无关，
    /// 通常也比它小
    pub incremental_estimate_ceiling: u64,
    /// 幂等提交记录的存活时间（秒）
    ///
    /// 过期后同一 token 会被当作全新提交，产生第二条消息——这是有界陈旧性
    /// 的既定行为，不是 bug
    pub pending_ttl_secs: u64,
    /// 幂等提交缓存的最大条目数
    pub pending_cache_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_recent_per_channel: 30,
            max_recent_total: 1000,
            max_incremental_total: 1000,
            incremental_estimate_ceiling: 500,
            pending_ttl_secs: 30,
            pending_cache_size: 10000,
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder {
            config: SyncConfig::default(),
        }
    }

    /// 幂等记录 TTL
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }
}

/// 同步配置构建器
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn max_recent_per_channel(mut self, value: u32) -> Self {
        self.config.max_recent_per_channel = value;
        self
    }

    pub fn max_recent_total(mut self, value: u32) -> Self {
        self.config.max_recent_total = value;
        self
    }

    pub fn max_incremental_total(mut self, value: u32) -> Self {
        self.config.max_incremental_total = value;
        self
    }

    pub fn incremental_estimate_ceiling(mut self, value: u64) -> Self {
        self.config.incremental_estimate_ceiling = value;
        self
    }

    pub fn pending_ttl_secs(mut self, value: u64) -> Self {
        self.config.pending_ttl_secs = value;
        self
    }

    pub fn pending_cache_size(mut self, value: usize) -> Self {
        self.config.pending_cache_size = value;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let config = SyncConfig::default();
        assert_eq!(config.max_recent_per_channel, 30);
        assert_eq!(config.max_recent_total, 1000);
        assert!(config.incremental_estimate_ceiling <= config.max_incremental_total as u64);
    }

    #[test]
    fn test_builder() {
        let config = SyncConfig::builder()
            .max_recent_per_channel(10)
            .pending_ttl_secs(5)
            .build();
        assert_eq!(config.max_recent_per_channel, 10);
        assert_eq!(config.pending_ttl(), Duration::from_secs(5));
        // 未覆盖的字段保持默认值
        assert_eq!(config.max_recent_total, 1000);
    }
}
