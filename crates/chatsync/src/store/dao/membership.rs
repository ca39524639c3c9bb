//! channel_member DAO 实现

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::store::entities::MemberStatus;

pub struct MembershipDao<'a> {
    conn: &'a Connection,
}

impl<'a> MembershipDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// 加入频道（重复加入时恢复为 Active）
    pub fn join(&self, channel_id: u64, member_uid: u64, now: i64) -> Result<()> {
        let sql = "INSERT INTO channel_member (channel_id, member_uid, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(channel_id, member_uid) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at";

        self.conn.execute(
            sql,
            params![
                channel_id as i64,
                member_uid as i64,
                MemberStatus::Active as i32,
                now
            ],
        )?;
        Ok(())
    }

    /// 退出频道（主动退出和被移出走同一条路径）
    pub fn leave(&self, channel_id: u64, member_uid: u64, now: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE channel_member SET status = ?3, updated_at = ?4
            WHERE channel_id = ?1 AND member_uid = ?2",
            params![
                channel_id as i64,
                member_uid as i64,
                MemberStatus::Left as i32,
                now
            ],
        )?;
        Ok(())
    }

    /// 获取用户当前有效加入的频道集合
    ///
    /// 已软删除的频道在这里一并过滤掉，调用方拿到的就是"活跃成员关系"
    pub fn active_channels(&self, member_uid: u64) -> Result<Vec<u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT cm.channel_id FROM channel_member cm
            JOIN channel c ON c.channel_id = cm.channel_id
            WHERE cm.member_uid = ?1 AND cm.status = ?2 AND c.deleted_at = 0
            ORDER BY cm.channel_id",
        )?;

        let rows = stmt.query_map(
            params![member_uid as i64, MemberStatus::Active as i32],
            |row| {
                let channel_id: i64 = row.get(0)?;
                Ok(channel_id as u64)
            },
        )?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::dao::ChannelDao;
    use crate::store::sqlite::init_schema;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_join_leave_rejoin() {
        let conn = test_conn();
        let channels = ChannelDao::new(&conn);
        let dao = MembershipDao::new(&conn);

        channels.create(100, 1000).unwrap();
        channels.create(200, 1000).unwrap();

        dao.join(100, 1, 1000).unwrap();
        dao.join(200, 1, 1000).unwrap();
        assert_eq!(dao.active_channels(1).unwrap(), vec![100, 200]);

        dao.leave(100, 1, 2000).unwrap();
        assert_eq!(dao.active_channels(1).unwrap(), vec![200]);

        dao.join(100, 1, 3000).unwrap();
        assert_eq!(dao.active_channels(1).unwrap(), vec![100, 200]);
    }

    #[test]
    fn test_deleted_channel_excluded() {
        let conn = test_conn();
        let channels = ChannelDao::new(&conn);
        let dao = MembershipDao::new(&conn);

        channels.create(100, 1000).unwrap();
        dao.join(100, 1, 1000).unwrap();

        channels.soft_delete(100, 2000).unwrap();
        assert!(dao.active_channels(1).unwrap().is_empty());
    }
}
