//! DAO 层 - 每张表一个专门的数据访问模块
//!
//! DAO 持有 `&Connection`，只做 SQL 封装，不做业务判断；
//! 事务边界由上层（SqliteSyncStore）控制

pub mod channel;
pub mod membership;
pub mod post;

pub use channel::ChannelDao;
pub use membership::MembershipDao;
pub use post::PostDao;
