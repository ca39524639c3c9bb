//! 基于游标的增量拉取
//!
//! 职责：
//! - 把客户端游标解析成存储层锚点（含"无游标从最早一条开始"的注入）
//! - 批量预估每个频道的待拉取数量
//! - 在全局预算内按请求顺序分配额度，只允许一个"溢出频道"被截断
//! - 为每个频道给出 complete 标记，指示是否还需续拉
//!
//! 往返次数固定：游标解析 1 次 + 最早消息注入 1 次 + 计数 1 次 + 拉取 1 次，
//! 与频道数量无关。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{ChatSyncError, Result, ValidationCode};
use crate::store::{CursorPivot, PostStore};
use crate::sync::{ChannelCursor, ChannelSyncResult, IncrementalSyncResponse};

/// 单个频道的额度规划
struct ChannelPlan {
    channel_id: u64,
    pivot: CursorPivot,
    /// 计数往返预估的待拉取数
    counted: u64,
    /// 分配到的拉取额度（溢出频道会小于 counted）
    limit: u32,
    /// 是否是被截断的溢出频道
    clamped: bool,
}

/// 增量游标解析器
pub struct IncrementalResolver {
    store: Arc<dyn PostStore>,
    config: SyncConfig,
}

impl IncrementalResolver {
    pub fn new(store: Arc<dyn PostStore>, config: SyncConfig) -> Self {
        Self { store, config }
    }

    /// 拉取每个游标之后的消息，总量不超过 max_posts
    ///
    /// 响应只包含本次处理过的频道；预算耗尽后的频道整体延后，客户端
    /// 用原游标重发。被截断的溢出频道最多一个，且一定是响应中最后一个
    /// 拿到消息的频道。
    pub async fn fetch_incremental(
        &self,
        cursors: &[ChannelCursor],
        max_posts: u32,
    ) -> Result<IncrementalSyncResponse> {
        if cursors.is_empty() {
            return Err(ChatSyncError::validation(
                ValidationCode::NoChannels,
                "游标列表为空",
            ));
        }
        if max_posts > self.config.max_incremental_total {
            return Err(ChatSyncError::validation(
                ValidationCode::TotalTooBig,
                format!(
                    "maxMessages={} 超过上限 {}",
                    max_posts, self.config.max_incremental_total
                ),
            ));
        }

        // 1. 游标解析 + 最早消息注入
        let (pivots, mut empty_channels) = self.resolve_pivots(cursors).await?;

        // 2. 批量计数
        let pivot_list: Vec<CursorPivot> = pivots.values().copied().collect();
        let counts = self.store.count_after(&pivot_list).await?;

        // 3. 按请求顺序分配额度，最多一个溢出频道
        let mut plans: Vec<ChannelPlan> = Vec::new();
        let mut total: u64 = 0;
        let budget = max_posts as u64;

        for cursor in cursors {
            if empty_channels.contains(&cursor.channel_id) {
                continue;
            }
            let pivot = match pivots.get(&cursor.channel_id) {
                Some(p) => *p,
                None => continue,
            };
            let counted = counts.get(&cursor.channel_id).copied().unwrap_or(0);

            if counted == 0 {
                // 无待拉取消息：不进入拉取往返，直接标记完成
                empty_channels.insert(cursor.channel_id);
                continue;
            }

            let remaining = budget - total;
            if remaining == 0 {
                // 预算已满，剩余频道整体延后
                break;
            }

            if counted <= remaining {
                total += counted;
                plans.push(ChannelPlan {
                    channel_id: cursor.channel_id,
                    pivot,
                    counted,
                    limit: counted as u32,
                    clamped: false,
                });
            } else {
                // 溢出频道：截断到恰好用完预算，之后的频道不再处理
                plans.push(ChannelPlan {
                    channel_id: cursor.channel_id,
                    pivot,
                    counted,
                    limit: remaining as u32,
                    clamped: true,
                });
                total = budget;
                break;
            }
        }

        debug!(
            "增量额度分配完成: channels={}, planned_total={}, budget={}",
            plans.len(),
            total,
            budget
        );

        // 4. 批量拉取
        let fetch_pivots: Vec<CursorPivot> = plans.iter().map(|p| p.pivot).collect();
        let fetch_limits: Vec<u32> = plans.iter().map(|p| p.limit).collect();
        let mut fetched = self.store.get_after(&fetch_pivots, &fetch_limits).await?;

        // 5. 按请求顺序组装响应
        let processed_upto = last_processed_index(cursors, &plans, &empty_channels);
        let mut channels = Vec::new();
        for cursor in cursors.iter().take(processed_upto + 1) {
            if empty_channels.contains(&cursor.channel_id) {
                channels.push(ChannelSyncResult {
                    channel_id: cursor.channel_id,
                    posts: Vec::new(),
                    complete: true,
                });
                continue;
            }
            if let Some(plan) = plans.iter().find(|p| p.channel_id == cursor.channel_id) {
                let posts = fetched.remove(&plan.channel_id).unwrap_or_default();
                // 计数与拉取之间有新消息到达时，非溢出频道拿到的可能比预估
                // 多——这不是错误，complete 只看预估是否被满足
                let complete = !plan.clamped && posts.len() as u64 >= plan.counted;
                channels.push(ChannelSyncResult {
                    channel_id: plan.channel_id,
                    posts,
                    complete,
                });
            }
        }

        Ok(IncrementalSyncResponse { channels })
    }

    /// 把游标解析成锚点
    ///
    /// 返回 (channel_id -> 锚点, 零消息频道集合)。
    /// - 有游标且能解析：锚点 = 游标消息的 (created_at, post_id)
    /// - 无游标或游标消息已不存在：锚点 = 从频道最早一条开始（含最早一条）；
    ///   频道没有任何未删除消息时直接归入零消息集合
    async fn resolve_pivots(
        &self,
        cursors: &[ChannelCursor],
    ) -> Result<(HashMap<u64, CursorPivot>, HashSet<u64>)> {
        let resolved = super::resolve_cursor_refs(self.store.as_ref(), cursors).await?;

        let mut pivots: HashMap<u64, CursorPivot> = HashMap::new();
        let mut fresh_ids: Vec<u64> = Vec::new();

        for cursor in cursors {
            match resolved.get(&cursor.channel_id) {
                Some(&after) => {
                    pivots.insert(
                        cursor.channel_id,
                        CursorPivot {
                            channel_id: cursor.channel_id,
                            after: Some(after),
                        },
                    );
                }
                None => fresh_ids.push(cursor.channel_id),
            }
        }

        let mut empty_channels = HashSet::new();
        if !fresh_ids.is_empty() {
            let oldest = self.store.oldest_per_channel(&fresh_ids).await?;
            for channel_id in fresh_ids {
                if oldest.contains_key(&channel_id) {
                    // 从头开始，最早一条也要包含在结果里（"晚于空"即全部）
                    pivots.insert(
                        channel_id,
                        CursorPivot {
                            channel_id,
                            after: None,
                        },
                    );
                } else {
                    empty_channels.insert(channel_id);
                }
            }
        }

        Ok((pivots, empty_channels))
    }
}

/// 找到请求顺序中最后一个被处理的频道下标
///
/// 溢出频道之后的频道不出现在响应里，因此组装时只走到这里为止
fn last_processed_index(
    cursors: &[ChannelCursor],
    plans: &[ChannelPlan],
    empty_channels: &HashSet<u64>,
) -> usize {
    let mut last = 0;
    for (idx, cursor) in cursors.iter().enumerate() {
        let planned = plans.iter().any(|p| p.channel_id == cursor.channel_id);
        if planned || empty_channels.contains(&cursor.channel_id) {
            last = idx;
        }
    }
    last
}
