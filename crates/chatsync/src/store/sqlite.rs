//! SQLite 存储实现
//!
//! 本模块提供：
//! - PostStore / MembershipStore 的参考实现
//! - WAL 模式和基本性能优化
//! - 写入路径的事务管理（消息落库与频道计数器同事务）
//!
//! 连接模型沿用单连接 + 互斥锁：每次"批量往返"对应一次连接持有期，
//! 任何组件都不会跨越 await 点持有连接之外的锁

use async_trait::async_trait;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{ChatSyncError, Result};
use crate::store::dao::{ChannelDao, MembershipDao, PostDao};
use crate::store::entities::{Channel, CursorPivot, Post, PostRef};
use crate::store::{MembershipStore, PostStore};

/// SQLite 同步存储
#[derive(Clone)]
pub struct SqliteSyncStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSyncStore {
    /// 打开（或创建）数据库文件
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| ChatSyncError::Database(format!("打开数据库失败: {}", e)))?;

        // 启用 WAL 模式和其他优化
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| ChatSyncError::Database(format!("设置 WAL 模式失败: {}", e)))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| ChatSyncError::Database(format!("设置同步模式失败: {}", e)))?;

        init_schema(&conn)?;

        info!("✅ 同步存储初始化完成: {}", path.as_ref().display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 打开内存数据库（测试用）
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ============================================================
    // 写入辅助 - 频道与成员关系的维护入口
    // ============================================================

    /// 创建频道
    pub async fn create_channel(&self, channel_id: u64, now: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        ChannelDao::new(&conn).create(channel_id, now)
    }

    /// 软删除频道
    pub async fn delete_channel(&self, channel_id: u64, now: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        ChannelDao::new(&conn).soft_delete(channel_id, now)
    }

    /// 用户加入频道
    pub async fn join_channel(&self, channel_id: u64, user_id: u64, now: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        MembershipDao::new(&conn).join(channel_id, user_id, now)
    }

    /// 用户退出频道
    pub async fn leave_channel(&self, channel_id: u64, user_id: u64, now: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        MembershipDao::new(&conn).leave(channel_id, user_id, now)
    }

    /// 软删除消息，并回退频道计数器（同一事务）
    pub async fn soft_delete_post(&self, post_id: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        let tx = conn.unchecked_transaction()?;
        {
            let posts = PostDao::new(&tx);
            let post = posts
                .get_by_id(post_id)?
                .ok_or_else(|| ChatSyncError::NotFound(format!("post_id={}", post_id)))?;
            if posts.soft_delete(post_id)? {
                ChannelDao::new(&tx).record_post_removed(post.channel_id)?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl PostStore for SqliteSyncStore {
    async fn insert(&self, post: &Post) -> Result<()> {
        let conn = self.conn.lock().await;
        let tx = conn.unchecked_transaction()?;
        {
            PostDao::new(&tx).insert(post)?;
            let channels = ChannelDao::new(&tx);
            // 频道行可能尚未存在（首条消息先于频道登记到达）
            channels.create(post.channel_id, post.created_at)?;
            channels.record_post(post.channel_id, post.post_id, post.created_at)?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_by_id(&self, post_id: u64) -> Result<Option<Post>> {
        let conn = self.conn.lock().await;
        PostDao::new(&conn).get_by_id(post_id)
    }

    async fn get_by_ids(&self, post_ids: &[u64]) -> Result<Vec<Post>> {
        let conn = self.conn.lock().await;
        PostDao::new(&conn).get_by_ids(post_ids)
    }

    async fn recent_by_channels(
        &self,
        channel_ids: &[u64],
        limit_per_channel: u32,
    ) -> Result<HashMap<u64, Vec<Post>>> {
        let conn = self.conn.lock().await;
        PostDao::new(&conn).recent_by_channels(channel_ids, limit_per_channel)
    }

    async fn count_after(&self, pivots: &[CursorPivot]) -> Result<HashMap<u64, u64>> {
        let conn = self.conn.lock().await;
        PostDao::new(&conn).count_after(pivots)
    }

    async fn get_after(
        &self,
        pivots: &[CursorPivot],
        limits: &[u32],
    ) -> Result<HashMap<u64, Vec<Post>>> {
        let conn = self.conn.lock().await;
        PostDao::new(&conn).get_after(pivots, limits)
    }

    async fn oldest_per_channel(&self, channel_ids: &[u64]) -> Result<HashMap<u64, PostRef>> {
        let conn = self.conn.lock().await;
        PostDao::new(&conn).oldest_per_channel(channel_ids)
    }

    async fn channel_overview(&self, channel_ids: &[u64]) -> Result<HashMap<u64, Channel>> {
        let conn = self.conn.lock().await;
        ChannelDao::new(&conn).get_by_ids(channel_ids)
    }
}

#[async_trait]
impl MembershipStore for SqliteSyncStore {
    async fn active_channels_for_user(&self, user_id: u64) -> Result<Vec<u64>> {
        let conn = self.conn.lock().await;
        MembershipDao::new(&conn).active_channels(user_id)
    }
}

/// 建表
pub(crate) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS post (
            post_id     INTEGER PRIMARY KEY,
            channel_id  INTEGER NOT NULL,
            from_uid    INTEGER NOT NULL,
            content     TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            is_deleted  INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_post_channel_order
            ON post (channel_id, created_at, post_id);

        CREATE TABLE IF NOT EXISTS channel (
            channel_id      INTEGER PRIMARY KEY,
            total_msg_count INTEGER NOT NULL DEFAULT 0,
            last_post_id    INTEGER NOT NULL DEFAULT 0,
            last_post_at    INTEGER NOT NULL DEFAULT 0,
            deleted_at      INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channel_member (
            channel_id  INTEGER NOT NULL,
            member_uid  INTEGER NOT NULL,
            status      INTEGER NOT NULL DEFAULT 0,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL,
            PRIMARY KEY (channel_id, member_uid)
        );
        CREATE INDEX IF NOT EXISTS idx_member_uid
            ON channel_member (member_uid, status);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_post(post_id: u64, channel_id: u64, created_at: i64) -> Post {
        Post {
            post_id,
            channel_id,
            from_uid: 1,
            content: "hello".into(),
            created_at,
            is_deleted: 0,
        }
    }

    #[tokio::test]
    async fn test_insert_maintains_counters() {
        let store = SqliteSyncStore::open_in_memory().await.unwrap();

        store.insert(&make_post(1, 100, 1000)).await.unwrap();
        store.insert(&make_post(2, 100, 1001)).await.unwrap();

        let overview = store.channel_overview(&[100]).await.unwrap();
        let channel = &overview[&100];
        assert_eq!(channel.total_msg_count, 2);
        assert_eq!(channel.last_post_id, 2);
        assert_eq!(channel.last_post_at, 1001);
    }

    #[tokio::test]
    async fn test_soft_delete_post_reverts_counter() {
        let store = SqliteSyncStore::open_in_memory().await.unwrap();

        store.insert(&make_post(1, 100, 1000)).await.unwrap();
        store.soft_delete_post(1).await.unwrap();

        let overview = store.channel_overview(&[100]).await.unwrap();
        assert_eq!(overview[&100].total_msg_count, 0);

        // 不存在的消息报 NotFound
        let err = store.soft_delete_post(99).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatsync.db");

        let store = SqliteSyncStore::open(&path).await.unwrap();
        store.insert(&make_post(1, 100, 1000)).await.unwrap();
        drop(store);

        // 重新打开后数据仍在
        let store = SqliteSyncStore::open(&path).await.unwrap();
        let post = store.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(post.channel_id, 100);
    }

    #[tokio::test]
    async fn test_membership_roundtrip() {
        let store = SqliteSyncStore::open_in_memory().await.unwrap();

        store.create_channel(100, 1000).await.unwrap();
        store.create_channel(200, 1000).await.unwrap();
        store.join_channel(100, 7, 1000).await.unwrap();
        store.join_channel(200, 7, 1000).await.unwrap();
        store.leave_channel(200, 7, 2000).await.unwrap();

        let channels = store.active_channels_for_user(7).await.unwrap();
        assert_eq!(channels, vec![100]);
    }
}
