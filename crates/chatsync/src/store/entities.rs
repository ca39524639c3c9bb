//! 数据实体定义 - 对应数据库表结构
//!
//! 这里定义了同步子系统涉及的所有表对应的 Rust 结构体，用于：
//! - 类型安全的数据传输
//! - 统一的数据表示
//! - 序列化/反序列化支持

use serde::{Deserialize, Serialize};

/// 消息实体 - 对应 post 表
///
/// post_id 由服务端雪花算法生成，全局唯一且按创建顺序可排序；
/// created_at 为毫秒时间戳，单频道内单调不减，相同时间戳按 post_id 定序
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub post_id: u64,
    pub channel_id: u64,
    pub from_uid: u64,
    pub content: String,
    /// 创建时间（毫秒时间戳）
    pub created_at: i64,
    /// 软删除标记（0 = 正常，1 = 已删除）
    pub is_deleted: i32,
}

/// 消息创建入参
///
/// post_id 和 created_at 由写入路径统一生成，不由调用方提供
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDraft {
    pub channel_id: u64,
    pub from_uid: u64,
    pub content: String,
}

/// 频道实体 - 对应 channel 表
///
/// 该表同时承担每频道计数器的角色：total_msg_count 由写入路径维护，
/// 读取方（可行性判定、成员差量）容忍瞬时的轻微滞后
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: u64,
    /// 未删除消息总数（预计算计数器，避免 COUNT(*) 扫表）
    pub total_msg_count: i64,
    /// 最后一条消息的 post_id（最近活动标记，0 = 无消息）
    pub last_post_id: u64,
    /// 最后一条消息的创建时间（毫秒时间戳，0 = 无消息）
    pub last_post_at: i64,
    /// 软删除时间（毫秒时间戳，0 = 正常）
    pub deleted_at: i64,
}

impl Channel {
    /// 频道是否已被软删除
    pub fn is_deleted(&self) -> bool {
        self.deleted_at > 0
    }
}

/// 成员状态 - channel_member 表的 status 字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    /// 正常在频道中
    Active = 0,
    /// 已退出或被移出
    Left = 1,
}

/// 消息游标引用 - (post_id, created_at) 二元组
///
/// "晚于游标"的比较规则：created_at 更大，或 created_at 相同且 post_id 更大
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    pub post_id: u64,
    pub created_at: i64,
}

/// 增量查询锚点 - 某频道内"晚于该点"的范围起点
#[derive(Debug, Clone, Copy)]
pub struct CursorPivot {
    pub channel_id: u64,
    /// None 表示从频道最早的消息开始（"晚于空"即全部）
    pub after: Option<PostRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_deleted_flag() {
        let mut channel = Channel {
            channel_id: 1,
            total_msg_count: 0,
            last_post_id: 0,
            last_post_at: 0,
            deleted_at: 0,
        };
        assert!(!channel.is_deleted());
        channel.deleted_at = 1700000000000;
        assert!(channel.is_deleted());
    }
}
