//! 多频道消息同步模块
//!
//! 职责：
//! - 最近窗口拉取（全量快照，分批控制往返次数）
//! - 基于游标的增量拉取（单频道溢出截断 + 完成标记）
//! - 增量可行性判定（只读计数，不传输消息体）
//! - 成员差量解析（added / removed / updated）
//! - 幂等提交保护（客户端重试去重）

pub mod estimator;
pub mod guard;
pub mod incremental;
pub mod membership;
pub mod recent;

pub use estimator::FeasibilityEstimator;
pub use guard::DuplicateSubmitGuard;
pub use incremental::IncrementalResolver;
pub use membership::MembershipDeltaResolver;
pub use recent::RecentWindowFetcher;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::store::{Post, PostRef, PostStore};

/// 客户端游标：某频道内"已拥有到该消息为止"
///
/// last_post_id 为 None 表示客户端在该频道一无所有
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCursor {
    pub channel_id: u64,
    pub last_post_id: Option<u64>,
}

impl ChannelCursor {
    pub fn new(channel_id: u64, last_post_id: Option<u64>) -> Self {
        Self {
            channel_id,
            last_post_id,
        }
    }

    /// 无游标（全新频道）
    pub fn fresh(channel_id: u64) -> Self {
        Self {
            channel_id,
            last_post_id: None,
        }
    }
}

/// 批量把游标解析成 (created_at, post_id) 锚点引用
///
/// 只返回能解析的频道；游标缺失、或指向已不存在消息的频道不出现在
/// 结果里，调用方统一按"一无所有"处理。失效游标的回退策略集中在
/// 这一处，增量拉取和可行性判定共用同一套规则。
pub(crate) async fn resolve_cursor_refs(
    store: &dyn PostStore,
    cursors: &[ChannelCursor],
) -> Result<HashMap<u64, PostRef>> {
    let cursor_ids: Vec<u64> = cursors.iter().filter_map(|c| c.last_post_id).collect();
    if cursor_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let posts = store.get_by_ids(&cursor_ids).await?;
    let refs: HashMap<u64, PostRef> = posts
        .iter()
        .map(|p| {
            (
                p.post_id,
                PostRef {
                    post_id: p.post_id,
                    created_at: p.created_at,
                },
            )
        })
        .collect();

    let mut resolved = HashMap::new();
    for cursor in cursors {
        if let Some(post_ref) = cursor.last_post_id.and_then(|id| refs.get(&id).copied()) {
            resolved.insert(cursor.channel_id, post_ref);
        }
    }
    Ok(resolved)
}

/// 最近窗口拉取的响应
///
/// 消息按请求中的频道顺序排列，每个频道内部从旧到新
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentSyncResponse {
    pub posts: Vec<Post>,
}

/// 单个频道的增量拉取结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSyncResult {
    pub channel_id: u64,
    /// 晚于游标的消息，从旧到新
    pub posts: Vec<Post>,
    /// true 表示该频道已无更多待拉取消息；
    /// false 表示客户端需要带着更新后的游标再次请求
    pub complete: bool,
}

/// 增量拉取的响应
///
/// 只包含本次实际处理过的频道；因预算耗尽未处理的频道不出现在结果中，
/// 客户端用原游标重发即可
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalSyncResponse {
    pub channels: Vec<ChannelSyncResult>,
}

/// 增量可行性判定的响应
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeasibilityResponse {
    pub allow: bool,
}

/// 成员差量解析的响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDelta {
    /// 用户新加入、但客户端尚未声明的频道
    pub added: Vec<u64>,
    /// 客户端仍声明、但用户已不再有效归属的频道
    pub removed: Vec<u64>,
    /// 双方都有、但最近活动标记与客户端游标不一致的频道
    pub updated: Vec<u64>,
}
