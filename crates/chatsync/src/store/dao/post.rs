//! 消息数据访问层 - 封装所有消息相关的数据库操作
//!
//! 功能包括：
//! - 消息插入与软删除
//! - 按频道批量拉取最近窗口（窗口函数，一条语句一次往返）
//! - 按锚点批量统计/拉取增量（单事务内的预编译语句循环）
//!
//! "晚于锚点"的比较规则统一为：created_at 更大，或 created_at 相同且
//! post_id 更大（同一毫秒内按 post_id 定序）

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;

use crate::error::{ChatSyncError, Result};
use crate::store::entities::{CursorPivot, Post, PostRef};

/// 消息数据访问对象
pub struct PostDao<'a> {
    conn: &'a Connection,
}

impl<'a> PostDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// 插入新消息
    pub fn insert(&self, post: &Post) -> Result<()> {
        let sql = "INSERT INTO post (
            post_id, channel_id, from_uid, content, created_at, is_deleted
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

        self.conn.execute(
            sql,
            params![
                post.post_id as i64, // u64 -> i64
                post.channel_id as i64,
                post.from_uid as i64,
                post.content,
                post.created_at,
                post.is_deleted,
            ],
        )?;

        Ok(())
    }

    /// 按 post_id 获取单条消息（包含已软删除的）
    pub fn get_by_id(&self, post_id: u64) -> Result<Option<Post>> {
        let sql = "SELECT post_id, channel_id, from_uid, content, created_at, is_deleted
            FROM post WHERE post_id = ?1";

        let post = self
            .conn
            .query_row(sql, params![post_id as i64], row_to_post)
            .optional()?;

        Ok(post)
    }

    /// 批量按 post_id 获取消息
    pub fn get_by_ids(&self, post_ids: &[u64]) -> Result<Vec<Post>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT post_id, channel_id, from_uid, content, created_at, is_deleted
            FROM post WHERE post_id IN ({})",
            placeholders(post_ids.len())
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(post_ids.iter().map(|id| *id as i64)),
            row_to_post,
        )?;

        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    /// 批量获取每个频道最近的 limit 条未删除消息
    ///
    /// 一条窗口函数语句完成，每个频道内从新到旧返回
    pub fn recent_by_channels(
        &self,
        channel_ids: &[u64],
        limit: u32,
    ) -> Result<HashMap<u64, Vec<Post>>> {
        if channel_ids.is_empty() || limit == 0 {
            return Ok(HashMap::new());
        }

        let sql = format!(
            "SELECT post_id, channel_id, from_uid, content, created_at, is_deleted FROM (
                SELECT post_id, channel_id, from_uid, content, created_at, is_deleted,
                    ROW_NUMBER() OVER (
                        PARTITION BY channel_id
                        ORDER BY created_at DESC, post_id DESC
                    ) AS rn
                FROM post
                WHERE is_deleted = 0 AND channel_id IN ({})
            ) WHERE rn <= ?
            ORDER BY channel_id, created_at DESC, post_id DESC",
            placeholders(channel_ids.len())
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut values: Vec<i64> = channel_ids.iter().map(|id| *id as i64).collect();
        values.push(limit as i64);

        let rows = stmt.query_map(params_from_iter(values), row_to_post)?;

        let mut result: HashMap<u64, Vec<Post>> = HashMap::new();
        for row in rows {
            let post = row?;
            result.entry(post.channel_id).or_default().push(post);
        }
        Ok(result)
    }

    /// 批量统计每个锚点之后的未删除消息数
    ///
    /// 在单个连接持有期内用两条预编译语句循环完成，对外表现为一次批量往返
    pub fn count_after(&self, pivots: &[CursorPivot]) -> Result<HashMap<u64, u64>> {
        let mut with_pivot = self.conn.prepare(
            "SELECT COUNT(*) FROM post
            WHERE channel_id = ?1 AND is_deleted = 0
              AND (created_at > ?2 OR (created_at = ?2 AND post_id > ?3))",
        )?;
        let mut from_start = self
            .conn
            .prepare("SELECT COUNT(*) FROM post WHERE channel_id = ?1 AND is_deleted = 0")?;

        let mut result = HashMap::new();
        for pivot in pivots {
            let count: i64 = match pivot.after {
                Some(after) => with_pivot.query_row(
                    params![pivot.channel_id as i64, after.created_at, after.post_id as i64],
                    |row| row.get(0),
                )?,
                None => from_start.query_row(params![pivot.channel_id as i64], |row| row.get(0))?,
            };
            result.insert(pivot.channel_id, count as u64);
        }
        Ok(result)
    }

    /// 批量获取每个锚点之后的未删除消息，每频道最多 limits[i] 条
    ///
    /// 每个频道内从旧到新返回；limits 与 pivots 一一对应
    pub fn get_after(
        &self,
        pivots: &[CursorPivot],
        limits: &[u32],
    ) -> Result<HashMap<u64, Vec<Post>>> {
        if pivots.len() != limits.len() {
            return Err(ChatSyncError::Other(format!(
                "锚点与额度数量不一致: {} != {}",
                pivots.len(),
                limits.len()
            )));
        }

        let mut with_pivot = self.conn.prepare(
            "SELECT post_id, channel_id, from_uid, content, created_at, is_deleted
            FROM post
            WHERE channel_id = ?1 AND is_deleted = 0
              AND (created_at > ?2 OR (created_at = ?2 AND post_id > ?3))
            ORDER BY created_at ASC, post_id ASC
            LIMIT ?4",
        )?;
        let mut from_start = self.conn.prepare(
            "SELECT post_id, channel_id, from_uid, content, created_at, is_deleted
            FROM post
            WHERE channel_id = ?1 AND is_deleted = 0
            ORDER BY created_at ASC, post_id ASC
            LIMIT ?2",
        )?;

        let mut result: HashMap<u64, Vec<Post>> = HashMap::new();
        for (pivot, &limit) in pivots.iter().zip(limits.iter()) {
            if limit == 0 {
                continue;
            }
            let mut posts = Vec::new();
            let rows = match pivot.after {
                Some(after) => with_pivot.query_map(
                    params![
                        pivot.channel_id as i64,
                        after.created_at,
                        after.post_id as i64,
                        limit as i64
                    ],
                    row_to_post,
                )?,
                None => from_start.query_map(
                    params![pivot.channel_id as i64, limit as i64],
                    row_to_post,
                )?,
            };
            for row in rows {
                posts.push(row?);
            }
            result.insert(pivot.channel_id, posts);
        }
        Ok(result)
    }

    /// 批量获取每个频道最早的未删除消息引用
    pub fn oldest_per_channel(&self, channel_ids: &[u64]) -> Result<HashMap<u64, PostRef>> {
        if channel_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            "SELECT channel_id, post_id, created_at FROM (
                SELECT channel_id, post_id, created_at,
                    ROW_NUMBER() OVER (
                        PARTITION BY channel_id
                        ORDER BY created_at ASC, post_id ASC
                    ) AS rn
                FROM post
                WHERE is_deleted = 0 AND channel_id IN ({})
            ) WHERE rn = 1",
            placeholders(channel_ids.len())
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(channel_ids.iter().map(|id| *id as i64)),
            |row| {
                let channel_id: i64 = row.get(0)?;
                let post_id: i64 = row.get(1)?;
                let created_at: i64 = row.get(2)?;
                Ok((
                    channel_id as u64,
                    PostRef {
                        post_id: post_id as u64,
                        created_at,
                    },
                ))
            },
        )?;

        let mut result = HashMap::new();
        for row in rows {
            let (channel_id, post_ref) = row?;
            result.insert(channel_id, post_ref);
        }
        Ok(result)
    }

    /// 软删除一条消息，返回是否有行被更新
    pub fn soft_delete(&self, post_id: u64) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE post SET is_deleted = 1 WHERE post_id = ?1 AND is_deleted = 0",
            params![post_id as i64],
        )?;
        Ok(affected > 0)
    }
}

/// 行映射
fn row_to_post(row: &Row<'_>) -> rusqlite::Result<Post> {
    let post_id: i64 = row.get(0)?;
    let channel_id: i64 = row.get(1)?;
    let from_uid: i64 = row.get(2)?;
    Ok(Post {
        post_id: post_id as u64, // i64 -> u64
        channel_id: channel_id as u64,
        from_uid: from_uid as u64,
        content: row.get(3)?,
        created_at: row.get(4)?,
        is_deleted: row.get(5)?,
    })
}

/// 生成 "?, ?, ?" 形式的占位符串
fn placeholders(count: usize) -> String {
    let mut s = "?,".repeat(count);
    s.pop();
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::init_schema;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn make_post(post_id: u64, channel_id: u64, created_at: i64) -> Post {
        Post {
            post_id,
            channel_id,
            from_uid: 42,
            content: format!("post-{}", post_id),
            created_at,
            is_deleted: 0,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let conn = test_conn();
        let dao = PostDao::new(&conn);

        let post = make_post(1, 100, 1000);
        dao.insert(&post).unwrap();

        let loaded = dao.get_by_id(1).unwrap().unwrap();
        assert_eq!(loaded, post);
        assert!(dao.get_by_id(2).unwrap().is_none());
    }

    #[test]
    fn test_recent_by_channels_window() {
        let conn = test_conn();
        let dao = PostDao::new(&conn);

        for i in 1..=5u64 {
            dao.insert(&make_post(i, 100, 1000 + i as i64)).unwrap();
        }
        for i in 6..=7u64 {
            dao.insert(&make_post(i, 200, 2000 + i as i64)).unwrap();
        }

        let result = dao.recent_by_channels(&[100, 200, 300], 3).unwrap();
        // 频道 100：最近 3 条，从新到旧
        let ch100: Vec<u64> = result[&100].iter().map(|p| p.post_id).collect();
        assert_eq!(ch100, vec![5, 4, 3]);
        // 频道 200：只有 2 条
        assert_eq!(result[&200].len(), 2);
        // 频道 300：无消息，不出现在结果中
        assert!(!result.contains_key(&300));
    }

    #[test]
    fn test_count_and_get_after_tie_break() {
        let conn = test_conn();
        let dao = PostDao::new(&conn);

        // 同一毫秒内的三条消息，按 post_id 定序
        dao.insert(&make_post(10, 100, 1000)).unwrap();
        dao.insert(&make_post(11, 100, 1000)).unwrap();
        dao.insert(&make_post(12, 100, 1000)).unwrap();

        let pivot = CursorPivot {
            channel_id: 100,
            after: Some(PostRef {
                post_id: 10,
                created_at: 1000,
            }),
        };
        let counts = dao.count_after(&[pivot]).unwrap();
        assert_eq!(counts[&100], 2);

        let fetched = dao.get_after(&[pivot], &[10]).unwrap();
        let ids: Vec<u64> = fetched[&100].iter().map(|p| p.post_id).collect();
        assert_eq!(ids, vec![11, 12]);
    }

    #[test]
    fn test_get_after_from_start() {
        let conn = test_conn();
        let dao = PostDao::new(&conn);

        dao.insert(&make_post(1, 100, 1000)).unwrap();
        dao.insert(&make_post(2, 100, 1001)).unwrap();

        let pivot = CursorPivot {
            channel_id: 100,
            after: None,
        };
        assert_eq!(dao.count_after(&[pivot]).unwrap()[&100], 2);

        let fetched = dao.get_after(&[pivot], &[1]).unwrap();
        let ids: Vec<u64> = fetched[&100].iter().map(|p| p.post_id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_get_after_rejects_mismatched_limits() {
        let conn = test_conn();
        let dao = PostDao::new(&conn);

        dao.insert(&make_post(1, 100, 1000)).unwrap();
        let pivot = CursorPivot {
            channel_id: 100,
            after: None,
        };
        // 锚点两个、额度一个：拒绝而不是静默截断
        let err = dao.get_after(&[pivot, pivot], &[5]).unwrap_err();
        assert_eq!(err.code(), "internal_error");
    }

    #[test]
    fn test_oldest_skips_soft_deleted() {
        let conn = test_conn();
        let dao = PostDao::new(&conn);

        dao.insert(&make_post(1, 100, 1000)).unwrap();
        dao.insert(&make_post(2, 100, 1001)).unwrap();
        assert!(dao.soft_delete(1).unwrap());
        // 重复删除不再生效
        assert!(!dao.soft_delete(1).unwrap());

        let oldest = dao.oldest_per_channel(&[100]).unwrap();
        assert_eq!(oldest[&100].post_id, 2);

        // 软删除后最近窗口也不应包含
        let recent = dao.recent_by_channels(&[100], 10).unwrap();
        assert_eq!(recent[&100].len(), 1);
    }
}
