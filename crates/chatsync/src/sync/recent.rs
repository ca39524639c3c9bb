//! 最近窗口拉取
//!
//! 给定一组频道，在全局总量预算内拉取每个频道最近的 N 条消息，
//! 并把存储往返次数压到最低。
//!
//! 分批规则：每批的频道数 = 剩余预算 / 单频道上限，即"假设批内每个频道
//! 都拉满"时还放得下多少个频道。预算放不下一个完整批次时，剩余频道在
//! 本次调用中不处理，由客户端追加请求续拉。这是刻意用单次完整性换取
//! 往返次数和可预测的最坏情况。

use std::sync::Arc;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{ChatSyncError, Result, ValidationCode};
use crate::store::PostStore;
use crate::sync::RecentSyncResponse;

/// 最近窗口拉取器
pub struct RecentWindowFetcher {
    store: Arc<dyn PostStore>,
    config: SyncConfig,
}

impl RecentWindowFetcher {
    pub fn new(store: Arc<dyn PostStore>, config: SyncConfig) -> Self {
        Self { store, config }
    }

    /// 拉取每个频道最近的 per_channel 条消息，总量不超过 max_total
    ///
    /// 返回的消息按请求中的频道顺序排列，每个频道内部从旧到新
    pub async fn fetch_recent(
        &self,
        channel_ids: &[u64],
        max_total: u32,
        per_channel: u32,
    ) -> Result<RecentSyncResponse> {
        self.validate(channel_ids, max_total, per_channel)?;

        let mut posts = Vec::new();
        let mut collected: u32 = 0;
        let mut idx = 0;

        while idx < channel_ids.len() {
            // 剩余预算还放得下多少个"拉满"的频道
            let batch_size = ((max_total - collected) / per_channel) as usize;
            if batch_size == 0 {
                debug!(
                    "预算耗尽，剩余频道延后处理: collected={}, deferred={}",
                    collected,
                    channel_ids.len() - idx
                );
                break;
            }

            let end = (idx + batch_size).min(channel_ids.len());
            let batch = &channel_ids[idx..end];

            // 一次往返拉取整批
            let mut by_channel = self.store.recent_by_channels(batch, per_channel).await?;

            for &channel_id in batch {
                if let Some(mut channel_posts) = by_channel.remove(&channel_id) {
                    // 存储层从新到旧返回，响应要求从旧到新
                    channel_posts.reverse();
                    collected += channel_posts.len() as u32;
                    posts.extend(channel_posts);
                }
            }

            debug!(
                "最近窗口批次完成: batch_channels={}, collected={}",
                batch.len(),
                collected
            );
            idx = end;
        }

        Ok(RecentSyncResponse { posts })
    }

    fn validate(&self, channel_ids: &[u64], max_total: u32, per_channel: u32) -> Result<()> {
        if channel_ids.is_empty() {
            return Err(ChatSyncError::validation(
                ValidationCode::NoChannels,
                "频道列表为空",
            ));
        }
        if per_channel == 0 {
            return Err(ChatSyncError::validation(
                ValidationCode::PerChannelZero,
                "messagesPerChannel 不能为 0",
            ));
        }
        if per_channel > self.config.max_recent_per_channel {
            return Err(ChatSyncError::validation(
                ValidationCode::PerChannelTooBig,
                format!(
                    "messagesPerChannel={} 超过上限 {}",
                    per_channel, self.config.max_recent_per_channel
                ),
            ));
        }
        if max_total > self.config.max_recent_total {
            return Err(ChatSyncError::validation(
                ValidationCode::TotalTooBig,
                format!(
                    "maxTotalMessages={} 超过上限 {}",
                    max_total, self.config.max_recent_total
                ),
            ));
        }
        if max_total < per_channel {
            return Err(ChatSyncError::validation(
                ValidationCode::TotalLessThanPerChannel,
                format!(
                    "maxTotalMessages={} 小于 messagesPerChannel={}",
                    max_total, per_channel
                ),
            ));
        }
        Ok(())
    }
}
