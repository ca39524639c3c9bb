use std::fmt;
use rusqlite;

/// 校验错误码 - 与客户端约定的稳定字符串
///
/// 客户端依据 code 字段做分支处理，所以这里的字符串一旦发布就不能改
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCode {
    /// 单频道消息数超过上限
    PerChannelTooBig,
    /// 总消息数超过上限
    TotalTooBig,
    /// 总上限小于单频道上限
    TotalLessThanPerChannel,
    /// 单频道消息数为零
    PerChannelZero,
    /// 请求中没有任何频道
    NoChannels,
}

impl ValidationCode {
    /// 获取稳定的错误码字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::PerChannelTooBig => "per_channel_too_big",
            ValidationCode::TotalTooBig => "total_too_big",
            ValidationCode::TotalLessThanPerChannel => "total_less_than_per_channel",
            ValidationCode::PerChannelZero => "per_channel_zero",
            ValidationCode::NoChannels => "no_channels",
        }
    }
}

#[derive(Debug)]
pub enum ChatSyncError {
    /// 请求参数校验失败（调用方可修复，不自动重试）
    Validation {
        code: ValidationCode,
        message: String,
    },
    SqliteError(rusqlite::Error),
    Database(String),
    JsonError(String),
    NotFound(String),
    /// 相同幂等 token 的首次提交仍在进行中（可重试的竞争条件，不是故障）
    SubmissionPending(String),
    Other(String),
}

impl fmt::Display for ChatSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatSyncError::Validation { code, message } => {
                write!(f, "Validation error [{}]: {}", code.as_str(), message)
            }
            ChatSyncError::SqliteError(e) => write!(f, "SQLite error: {}", e),
            ChatSyncError::Database(e) => write!(f, "Database error: {}", e),
            ChatSyncError::JsonError(e) => write!(f, "JSON error: {}", e),
            ChatSyncError::NotFound(e) => write!(f, "Not found: {}", e),
            ChatSyncError::SubmissionPending(token) => {
                write!(f, "Submission pending for token: {}", token)
            }
            ChatSyncError::Other(e) => write!(f, "Other error: {}", e),
        }
    }
}

impl std::error::Error for ChatSyncError {}

impl From<rusqlite::Error> for ChatSyncError {
    fn from(error: rusqlite::Error) -> Self {
        ChatSyncError::SqliteError(error)
    }
}

impl From<serde_json::Error> for ChatSyncError {
    fn from(error: serde_json::Error) -> Self {
        ChatSyncError::JsonError(error.to_string())
    }
}

impl ChatSyncError {
    /// 构造校验错误
    pub fn validation(code: ValidationCode, message: impl Into<String>) -> Self {
        ChatSyncError::Validation {
            code,
            message: message.into(),
        }
    }

    /// 获取机器可读错误码
    ///
    /// 存储类错误统一返回 "storage_error"，不向客户端暴露内部细节
    pub fn code(&self) -> &'static str {
        match self {
            ChatSyncError::Validation { code, .. } => code.as_str(),
            ChatSyncError::SqliteError(_) | ChatSyncError::Database(_) => "storage_error",
            ChatSyncError::JsonError(_) => "serialization_error",
            ChatSyncError::NotFound(_) => "not_found",
            ChatSyncError::SubmissionPending(_) => "submission_pending",
            ChatSyncError::Other(_) => "internal_error",
        }
    }

    /// HTTP 等价状态码（路由层直接使用）
    pub fn http_status(&self) -> u16 {
        match self {
            ChatSyncError::Validation { .. } => 400,
            ChatSyncError::NotFound(_) => 404,
            ChatSyncError::SubmissionPending(_) => 409,
            ChatSyncError::SqliteError(_)
            | ChatSyncError::Database(_)
            | ChatSyncError::JsonError(_)
            | ChatSyncError::Other(_) => 500,
        }
    }

    /// 判断是否是校验错误
    pub fn is_validation(&self) -> bool {
        matches!(self, ChatSyncError::Validation { .. })
    }
}

pub type Result<T> = std::result::Result<T, ChatSyncError>;
