//! 存储模块 - 同步子系统的数据访问层
//!
//! 采用分层架构设计：
//! - PostStore / MembershipStore: 异步存储接口，同步组件只依赖这两个 trait
//! - SqliteSyncStore: 基于 SQLite 的参考实现
//! - DAO Layer: 数据访问层，每张表一个专门的操作模块
//! - Entities: 数据实体定义，类型安全的数据传输
//!
//! 每个 trait 方法对应一次存储往返：上层组件按"批量往返次数"而不是
//! "单行查询次数"来组织调用

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;

pub mod dao;
pub mod entities;
pub mod sqlite;

pub use entities::{Channel, CursorPivot, MemberStatus, Post, PostDraft, PostRef};
pub use sqlite::SqliteSyncStore;

/// 消息存储接口
///
/// 所有批量方法的返回值都以 channel_id 为键；请求中不存在对应数据的频道
/// 不会出现在结果里，调用方需要自己处理缺失项
#[async_trait]
pub trait PostStore: Send + Sync {
    /// 插入一条消息，并在同一事务内维护频道计数器和最近活动标记
    async fn insert(&self, post: &Post) -> Result<()>;

    /// 按 post_id 获取单条消息（已软删除的消息也返回，由调用方判断）
    async fn get_by_id(&self, post_id: u64) -> Result<Option<Post>>;

    /// 批量按 post_id 获取消息（一次往返）
    async fn get_by_ids(&self, post_ids: &[u64]) -> Result<Vec<Post>>;

    /// 批量获取每个频道最近的 limit_per_channel 条未删除消息（一次往返）
    ///
    /// 每个频道内按创建顺序从新到旧返回
    async fn recent_by_channels(
        &self,
        channel_ids: &[u64],
        limit_per_channel: u32,
    ) -> Result<HashMap<u64, Vec<Post>>>;

    /// 批量统计每个锚点之后的未删除消息数（一次往返）
    async fn count_after(&self, pivots: &[CursorPivot]) -> Result<HashMap<u64, u64>>;

    /// 批量获取每个锚点之后的未删除消息，每频道最多 limit 条（一次往返）
    ///
    /// 每个频道内按创建顺序从旧到新返回；limits 与 pivots 一一对应
    async fn get_after(
        &self,
        pivots: &[CursorPivot],
        limits: &[u32],
    ) -> Result<HashMap<u64, Vec<Post>>>;

    /// 批量获取每个频道最早的未删除消息引用（一次往返）
    ///
    /// 没有未删除消息的频道不出现在结果中
    async fn oldest_per_channel(&self, channel_ids: &[u64]) -> Result<HashMap<u64, PostRef>>;

    /// 批量获取频道行：计数器、最近活动标记、软删除状态（一次往返）
    async fn channel_overview(&self, channel_ids: &[u64]) -> Result<HashMap<u64, Channel>>;
}

/// 成员关系存储接口
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// 获取用户当前有效加入的频道集合（不含已退出、不含已软删除的频道）
    async fn active_channels_for_user(&self, user_id: u64) -> Result<Vec<u64>>;
}
