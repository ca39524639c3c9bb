//! chatsync - 多频道消息同步子系统
//!
//! 面向带宽受限、连接不稳定的客户端（典型是移动端），提供：
//! - 📥 最近窗口拉取：一组频道各取最近 N 条，分批控制存储往返
//! - 🔁 增量同步：基于每频道游标续拉，全局预算 + 单溢出频道截断
//! - 📊 可行性判定：只读计数，预判增量同步是否划算
//! - 📋 成员差量：added / removed / updated 三类频道变更
//! - 🔐 幂等提交：客户端重试不会产生重复消息
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chatsync::{SyncConfig, SyncService};
//! use chatsync::store::SqliteSyncStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SqliteSyncStore::open("chatsync.db").await?);
//!     let service = SyncService::new(store.clone(), store, SyncConfig::default())?;
//!
//!     // 客户端带游标请求增量同步
//!     let cursors = vec![chatsync::ChannelCursor::new(100, Some(42))];
//!     if service.check_incremental(&cursors).await?.allow {
//!         let response = service.sync_incremental(&cursors, 200).await?;
//!         for channel in response.channels {
//!             println!("channel={} posts={} complete={}",
//!                 channel.channel_id, channel.posts.len(), channel.complete);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod service;
pub mod store;
pub mod sync;

// 重新导出核心类型，方便使用
pub use config::SyncConfig;
pub use error::{ChatSyncError, Result, ValidationCode};
pub use service::SyncService;
pub use store::{Channel, MembershipStore, Post, PostDraft, PostStore};
pub use sync::{
    ChannelCursor, ChannelDelta, ChannelSyncResult, DuplicateSubmitGuard, FeasibilityEstimator,
    FeasibilityResponse, IncrementalResolver, IncrementalSyncResponse, MembershipDeltaResolver,
    RecentSyncResponse, RecentWindowFetcher,
};
