//! 同步服务门面
//!
//! 把五个同步组件和存储接在一起，向路由层暴露完整的同步操作集：
//! - sync_recent: 最近窗口拉取
//! - check_incremental: 增量可行性判定
//! - sync_incremental: 基于游标的增量拉取
//! - resolve_channel_delta: 成员差量解析
//! - create_post: 走幂等保护的消息创建
//!
//! 路由、序列化、鉴权都在本 crate 之外；这里只负责同步语义。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::info;

use crate::config::SyncConfig;
use crate::error::{ChatSyncError, Result};
use crate::store::{MembershipStore, Post, PostDraft, PostStore};
use crate::sync::{
    ChannelCursor, ChannelDelta, DuplicateSubmitGuard, FeasibilityEstimator, FeasibilityResponse,
    IncrementalResolver, IncrementalSyncResponse, MembershipDeltaResolver, RecentSyncResponse,
    RecentWindowFetcher,
};

/// 同步服务
pub struct SyncService {
    posts: Arc<dyn PostStore>,
    recent: RecentWindowFetcher,
    incremental: IncrementalResolver,
    estimator: FeasibilityEstimator,
    membership_delta: MembershipDeltaResolver,
    guard: DuplicateSubmitGuard,
    snowflake: Arc<snowflake_me::Snowflake>,
}

impl SyncService {
    /// 组装同步服务
    ///
    /// Snowflake 生成器用随机 machine_id / data_center_id 初始化，
    /// 避免容器环境下的 IP 地址检测失败
    pub fn new(
        posts: Arc<dyn PostStore>,
        membership: Arc<dyn MembershipStore>,
        config: SyncConfig,
    ) -> Result<Self> {
        let mut rng = StdRng::from_entropy();
        let machine_id: u16 = rng.gen_range(0..32);
        let data_center_id: u16 = rng.gen_range(0..32);

        let snowflake = snowflake_me::Snowflake::builder()
            .machine_id(&|| Ok(machine_id))
            .data_center_id(&|| Ok(data_center_id))
            .finalize()
            .map_err(|e| ChatSyncError::Other(format!("初始化 Snowflake 失败: {:?}", e)))?;

        info!(
            "✅ 同步服务初始化完成 (machine_id={}, data_center_id={})",
            machine_id, data_center_id
        );

        Ok(Self {
            posts: posts.clone(),
            recent: RecentWindowFetcher::new(posts.clone(), config.clone()),
            incremental: IncrementalResolver::new(posts.clone(), config.clone()),
            estimator: FeasibilityEstimator::new(posts.clone(), config.clone()),
            membership_delta: MembershipDeltaResolver::new(posts.clone(), membership),
            guard: DuplicateSubmitGuard::new(posts, &config),
            snowflake: Arc::new(snowflake),
        })
    }

    /// 最近窗口拉取
    pub async fn sync_recent(
        &self,
        channel_ids: &[u64],
        max_total: u32,
        per_channel: u32,
    ) -> Result<RecentSyncResponse> {
        self.recent
            .fetch_recent(channel_ids, max_total, per_channel)
            .await
    }

    /// 增量可行性判定
    pub async fn check_incremental(&self, cursors: &[ChannelCursor]) -> Result<FeasibilityResponse> {
        let allow = self.estimator.can_sync_incrementally(cursors).await?;
        Ok(FeasibilityResponse { allow })
    }

    /// 基于游标的增量拉取
    pub async fn sync_incremental(
        &self,
        cursors: &[ChannelCursor],
        max_posts: u32,
    ) -> Result<IncrementalSyncResponse> {
        self.incremental.fetch_incremental(cursors, max_posts).await
    }

    /// 成员差量解析
    pub async fn resolve_channel_delta(
        &self,
        user_id: u64,
        client_cursors: &[ChannelCursor],
    ) -> Result<ChannelDelta> {
        self.membership_delta
            .resolve_channel_delta(user_id, client_cursors)
            .await
    }

    /// 创建消息
    ///
    /// client_token 是客户端提供的幂等 token：同一 token 在 TTL 内重复
    /// 提交会拿到同一条消息；不提供则每次都创建新消息
    pub async fn create_post(&self, draft: PostDraft, client_token: Option<&str>) -> Result<Post> {
        let posts = self.posts.clone();
        let snowflake = self.snowflake.clone();

        self.guard
            .guarded_create(client_token, move || async move {
                let post_id = snowflake
                    .next_id()
                    .map_err(|e| ChatSyncError::Other(format!("生成消息 ID 失败: {:?}", e)))?;
                let post = Post {
                    post_id,
                    channel_id: draft.channel_id,
                    from_uid: draft.from_uid,
                    content: draft.content,
                    created_at: chrono::Utc::now().timestamp_millis(),
                    is_deleted: 0,
                };
                posts.insert(&post).await?;
                Ok(post)
            })
            .await
    }

    /// 清理过期的幂等记录（由宿主进程的周期任务调用）
    pub fn cleanup_pending(&self) {
        self.guard.cleanup_expired();
    }
}
