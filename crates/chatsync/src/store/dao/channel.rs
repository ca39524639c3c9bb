//! channel DAO 实现
//!
//! channel 表同时承担每频道计数器：total_msg_count 与最近活动标记由
//! 写入路径在消息落库的同一事务里维护

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;

use crate::error::Result;
use crate::store::entities::Channel;

pub struct ChannelDao<'a> {
    conn: &'a Connection,
}

impl<'a> ChannelDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// 创建频道（已存在则忽略）
    pub fn create(&self, channel_id: u64, now: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO channel (channel_id, total_msg_count, last_post_id, last_post_at, deleted_at, created_at)
            VALUES (?1, 0, 0, 0, 0, ?2)
            ON CONFLICT(channel_id) DO NOTHING",
            params![channel_id as i64, now],
        )?;
        Ok(())
    }

    /// 按 channel_id 获取频道行
    pub fn get_by_id(&self, channel_id: u64) -> Result<Option<Channel>> {
        let channel = self
            .conn
            .query_row(
                "SELECT channel_id, total_msg_count, last_post_id, last_post_at, deleted_at
                FROM channel WHERE channel_id = ?1",
                params![channel_id as i64],
                row_to_channel,
            )
            .optional()?;
        Ok(channel)
    }

    /// 批量获取频道行
    pub fn get_by_ids(&self, channel_ids: &[u64]) -> Result<HashMap<u64, Channel>> {
        if channel_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut s = "?,".repeat(channel_ids.len());
        s.pop();
        let sql = format!(
            "SELECT channel_id, total_msg_count, last_post_id, last_post_at, deleted_at
            FROM channel WHERE channel_id IN ({})",
            s
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(channel_ids.iter().map(|id| *id as i64)),
            row_to_channel,
        )?;

        let mut result = HashMap::new();
        for row in rows {
            let channel = row?;
            result.insert(channel.channel_id, channel);
        }
        Ok(result)
    }

    /// 消息落库后的计数器维护：计数 +1，刷新最近活动标记
    pub fn record_post(&self, channel_id: u64, post_id: u64, created_at: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE channel SET
                total_msg_count = total_msg_count + 1,
                last_post_id = ?2,
                last_post_at = ?3
            WHERE channel_id = ?1",
            params![channel_id as i64, post_id as i64, created_at],
        )?;
        Ok(())
    }

    /// 消息软删除后的计数器回退
    ///
    /// 最近活动标记不回退：它只用于"有没有新内容"的差量判断，指向一条
    /// 已删除消息是可接受的瞬时状态
    pub fn record_post_removed(&self, channel_id: u64) -> Result<()> {
        self.conn.execute(
            "UPDATE channel SET total_msg_count = MAX(total_msg_count - 1, 0)
            WHERE channel_id = ?1",
            params![channel_id as i64],
        )?;
        Ok(())
    }

    /// 软删除频道
    pub fn soft_delete(&self, channel_id: u64, now: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE channel SET deleted_at = ?2 WHERE channel_id = ?1 AND deleted_at = 0",
            params![channel_id as i64, now],
        )?;
        Ok(())
    }
}

fn row_to_channel(row: &Row<'_>) -> rusqlite::Result<Channel> {
    let channel_id: i64 = row.get(0)?;
    let last_post_id: i64 = row.get(2)?;
    Ok(Channel {
        channel_id: channel_id as u64, // i64 -> u64
        total_msg_count: row.get(1)?,
        last_post_id: last_post_id as u64,
        last_post_at: row.get(3)?,
        deleted_at: row.get(4)?,
    })
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

    #[test]
    fn test_counter_lifecycle() {
        let conn = test_conn();
        let dao = ChannelDao::new(&conn);

        dao.create(100, 1000).unwrap();
        // 重复创建应被忽略
        dao.create(100, 2000).unwrap();

        dao.record_post(100, 7, 1500).unwrap();
        dao.record_post(100, 8, 1600).unwrap();

        let channel = dao.get_by_id(100).unwrap().unwrap();
        assert_eq!(channel.total_msg_count, 2);
        assert_eq!(channel.last_post_id, 8);
        assert_eq!(channel.last_post_at, 1600);

        dao.record_post_removed(100).unwrap();
        let channel = dao.get_by_id(100).unwrap().unwrap();
        assert_eq!(channel.total_msg_count, 1);
        // 最近活动标记不回退
        assert_eq!(channel.last_post_id, 8);
    }

    #[test]
    fn test_soft_delete_and_batch_get() {
        let conn = test_conn();
        let dao = ChannelDao::new(&conn);

        dao.create(100, 1000).unwrap();
        dao.create(200, 1000).unwrap();
        dao.soft_delete(200, 3000).unwrap();

        let channels = dao.get_by_ids(&[100, 200, 300]).unwrap();
        assert_eq!(channels.len(), 2);
        assert!(!channels[&100].is_deleted());
        assert!(channels[&200].is_deleted());
    }
}
