//! 增量可行性判定
//!
//! 回答"这组游标走增量同步划不划算"，只做计数，不传输消息体：
//! - 有游标的频道：批量统计游标之后的消息数
//! - 无游标的频道：直接读频道行上的预计算计数器（不扫 post 表）
//!
//! 判定上限独立于具体请求的 maxMessages——它衡量的是增量同步整体是否
//! 值得，而不是一页装不装得下。

use std::sync::Arc;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{ChatSyncError, Result, ValidationCode};
use crate::store::{CursorPivot, PostStore};
use crate::sync::ChannelCursor;

/// 增量可行性判定器
pub struct FeasibilityEstimator {
    store: Arc<dyn PostStore>,
    config: SyncConfig,
}

impl FeasibilityEstimator {
    pub fn new(store: Arc<dyn PostStore>, config: SyncConfig) -> Self {
        Self { store, config }
    }

    /// 判定这组游标是否适合走增量同步
    ///
    /// true 当且仅当待拉取总数不超过配置的判定上限
    pub async fn can_sync_incrementally(&self, cursors: &[ChannelCursor]) -> Result<bool> {
        if cursors.is_empty() {
            return Err(ChatSyncError::validation(
                ValidationCode::NoChannels,
                "游标列表为空",
            ));
        }

        // 拆分：有游标的走计数查询，无游标的走预计算计数器
        let resolved = crate::sync::resolve_cursor_refs(self.store.as_ref(), cursors).await?;

        let mut pivots: Vec<CursorPivot> = Vec::new();
        let mut uncursored: Vec<u64> = Vec::new();

        for cursor in cursors {
            match resolved.get(&cursor.channel_id) {
                Some(&after) => pivots.push(CursorPivot {
                    channel_id: cursor.channel_id,
                    after: Some(after),
                }),
                // 游标失效的频道按"一无所有"估算
                None => uncursored.push(cursor.channel_id),
            }
        }

        let mut pending: u64 = 0;

        if !pivots.is_empty() {
            let counts = self.store.count_after(&pivots).await?;
            pending += counts.values().sum::<u64>();
        }

        if !uncursored.is_empty() {
            let overview = self.store.channel_overview(&uncursored).await?;
            pending += overview
                .values()
                .map(|c| c.total_msg_count.max(0) as u64)
                .sum::<u64>();
        }

        let allow = pending <= self.config.incremental_estimate_ceiling;
        debug!(
            "增量可行性判定: pending={}, ceiling={}, allow={}",
            pending, self.config.incremental_estimate_ceiling, allow
        );
        Ok(allow)
    }
}
