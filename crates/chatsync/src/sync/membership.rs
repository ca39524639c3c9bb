//! 成员差量解析
//!
//! 对比客户端声明的频道集合与服务端当前的成员关系，给出三类差量：
//! - added: 服务端有、客户端没声明 → 客户端应新增
//! - removed: 客户端声明了、但已退出/被移出/频道被删 → 客户端应丢弃
//! - updated: 双方都有、但最近活动标记和客户端游标不一致 → 有新内容
//!
//! 无论频道多少，固定两次批量往返：成员集合一次，频道行一次。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::store::{Channel, MembershipStore, PostStore};
use crate::sync::{ChannelCursor, ChannelDelta};

/// 成员差量解析器
pub struct MembershipDeltaResolver {
    posts: Arc<dyn PostStore>,
    membership: Arc<dyn MembershipStore>,
}

impl MembershipDeltaResolver {
    pub fn new(posts: Arc<dyn PostStore>, membership: Arc<dyn MembershipStore>) -> Self {
        Self { posts, membership }
    }

    /// 解析用户的频道差量
    ///
    /// 最近活动标记由写入路径异步推进，读到的值允许瞬时滞后——差量解析
    /// 是最终一致的，不追求严格一致
    pub async fn resolve_channel_delta(
        &self,
        user_id: u64,
        client_cursors: &[ChannelCursor],
    ) -> Result<ChannelDelta> {
        // 往返 1：当前有效成员关系
        let current: Vec<u64> = self.membership.active_channels_for_user(user_id).await?;
        let current_set: HashSet<u64> = current.iter().copied().collect();

        let declared: Vec<u64> = client_cursors.iter().map(|c| c.channel_id).collect();
        let declared_set: HashSet<u64> = declared.iter().copied().collect();

        // 往返 2：声明集 ∪ 当前集的频道行（软删除标记 + 最近活动标记）
        let mut overview_ids: Vec<u64> = declared.clone();
        for channel_id in &current {
            if !declared_set.contains(channel_id) {
                overview_ids.push(*channel_id);
            }
        }
        let overview: HashMap<u64, Channel> = self.posts.channel_overview(&overview_ids).await?;

        // removed: 声明了但已被删除、或不再是有效成员
        let mut removed = Vec::new();
        for channel_id in &declared {
            let gone = match overview.get(channel_id) {
                Some(channel) => channel.is_deleted() || !current_set.contains(channel_id),
                // 频道行都不存在了，同样视为应丢弃
                None => true,
            };
            if gone {
                removed.push(*channel_id);
            }
        }

        // added: 当前成员中客户端未声明的
        let added: Vec<u64> = current
            .iter()
            .copied()
            .filter(|channel_id| !declared_set.contains(channel_id))
            .collect();

        // updated: 双方都有且频道存活，最近活动标记与客户端游标不一致
        let mut updated = Vec::new();
        for cursor in client_cursors {
            if !current_set.contains(&cursor.channel_id) {
                continue;
            }
            let channel = match overview.get(&cursor.channel_id) {
                Some(c) if !c.is_deleted() => c,
                _ => continue,
            };
            let known = cursor.last_post_id.unwrap_or(0);
            if channel.last_post_id != known {
                updated.push(cursor.channel_id);
            }
        }

        debug!(
            "成员差量解析完成: user_id={}, added={}, removed={}, updated={}",
            user_id,
            added.len(),
            removed.len(),
            updated.len()
        );

        Ok(ChannelDelta {
            added,
            removed,
            updated,
        })
    }
}
