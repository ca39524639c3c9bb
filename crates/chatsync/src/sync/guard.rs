//! 幂等提交保护
//!
//! 让消息创建对客户端重试幂等：同一幂等 token 的重复提交在 TTL 内
//! 返回同一条消息，而不是悄悄创建第二条。
//!
//! 每个 token 的状态机：absent → in-flight → resolved(post_id)，
//! TTL 到期或创建失败后回到 absent。所有状态转移都是持锁一瞬间的
//! test-and-set；锁从不跨越 create_fn 或任何存储往返。
//!
//! TTL 到期后同一 token 会创建第二条消息——这是有界陈旧性的既定行为。

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::{ChatSyncError, Result};
use crate::store::{Post, PostStore};

/// 单个 token 的提交状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingState {
    /// 首次提交已开始、尚未完成
    InFlight,
    /// 创建完成，记录产生的消息 ID
    Resolved(u64),
}

struct PendingRecord {
    state: PendingState,
    expires_at: Instant,
}

impl PendingRecord {
    fn expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// 幂等提交保护器
pub struct DuplicateSubmitGuard {
    store: Arc<dyn PostStore>,
    pending: Mutex<HashMap<String, PendingRecord>>,
    ttl: Duration,
    /// 缓存超过该值时在写入路径上触发一次过期清理
    cleanup_threshold: usize,
}

impl DuplicateSubmitGuard {
    pub fn new(store: Arc<dyn PostStore>, config: &SyncConfig) -> Self {
        Self {
            store,
            pending: Mutex::new(HashMap::new()),
            ttl: config.pending_ttl(),
            cleanup_threshold: config.pending_cache_size * 4 / 5, // 80% 阈值
        }
    }

    /// 包裹一次消息创建
    ///
    /// - token 为 None：完全绕过保护，永不去重
    /// - 首次提交：记录 in-flight 后执行 create_fn；失败即清除记录，
    ///   给后续重试留出干净的重来机会
    /// - in-flight 撞车：立即返回 submission_pending，调用方应稍后重试，
    ///   而不是在保护器内部排队等待
    /// - 已 resolved：查出已创建的消息原样返回
    pub async fn guarded_create<F, Fut>(&self, token: Option<&str>, create_fn: F) -> Result<Post>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Post>>,
    {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => return create_fn().await,
        };

        // test-and-set：拿到首发资格，或者观察到别人的状态
        let existing = {
            let mut pending = self.pending.lock();
            let now = Instant::now();
            match pending.get(token) {
                Some(record) if !record.expired(now) => Some(record.state),
                _ => {
                    pending.insert(
                        token.to_string(),
                        PendingRecord {
                            state: PendingState::InFlight,
                            expires_at: now + self.ttl,
                        },
                    );
                    None
                }
            }
        };

        match existing {
            None => self.run_create(token, create_fn).await,
            Some(PendingState::InFlight) => {
                debug!("幂等提交撞车: token={}", token);
                Err(ChatSyncError::SubmissionPending(token.to_string()))
            }
            Some(PendingState::Resolved(post_id)) => {
                info!("幂等命中，返回已创建消息: token={}, post_id={}", token, post_id);
                self.store
                    .get_by_id(post_id)
                    .await?
                    .ok_or_else(|| ChatSyncError::NotFound(format!("post_id={}", post_id)))
            }
        }
    }

    /// 首发路径：锁外执行 create_fn，结束后按结果转移状态
    async fn run_create<F, Fut>(&self, token: &str, create_fn: F) -> Result<Post>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Post>>,
    {
        match create_fn().await {
            Ok(post) => {
                let mut pending = self.pending.lock();
                pending.insert(
                    token.to_string(),
                    PendingRecord {
                        state: PendingState::Resolved(post.post_id),
                        expires_at: Instant::now() + self.ttl,
                    },
                );
                if pending.len() > self.cleanup_threshold {
                    cleanup_expired_internal(&mut pending);
                }
                debug!("幂等记录已落定: token={}, post_id={}", token, post.post_id);
                Ok(post)
            }
            Err(e) => {
                // 清掉记录，让后续重试当作全新提交
                self.pending.lock().remove(token);
                Err(e)
            }
        }
    }

    /// 清理过期记录（外部调用）
    pub fn cleanup_expired(&self) {
        let mut pending = self.pending.lock();
        cleanup_expired_internal(&mut pending);
    }

    /// 获取统计信息（当前条目数）
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// 内部清理方法（需要已持有锁）
fn cleanup_expired_internal(pending: &mut HashMap<String, PendingRecord>) {
    let now = Instant::now();
    let initial_count = pending.len();
    pending.retain(|_, record| !record.expired(now));

    let removed_count = initial_count - pending.len();
    if removed_count > 0 {
        info!(
            "🧹 清理过期幂等记录: 移除了 {} 条，剩余 {} 条",
            removed_count,
            pending.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteSyncStore;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::Notify;

    async fn setup(ttl_secs: u64) -> (Arc<SqliteSyncStore>, Arc<DuplicateSubmitGuard>) {
        let store = Arc::new(SqliteSyncStore::open_in_memory().await.unwrap());
        let config = SyncConfig::builder().pending_ttl_secs(ttl_secs).build();
        let guard = Arc::new(DuplicateSubmitGuard::new(store.clone(), &config));
        (store, guard)
    }

    fn make_post(post_id: u64) -> Post {
        Post {
            post_id,
            channel_id: 100,
            from_uid: 1,
            content: format!("p{}", post_id),
            created_at: 1_000_000 + post_id as i64,
            is_deleted: 0,
        }
    }

    /// 向存储真实写入的 create_fn
    fn creator(
        store: Arc<SqliteSyncStore>,
        next_id: Arc<AtomicU64>,
    ) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = Result<Post>> + Send>> {
        move || {
            Box::pin(async move {
                let post = make_post(next_id.fetch_add(1, Ordering::SeqCst));
                store.insert(&post).await?;
                Ok(post)
            })
        }
    }

    #[tokio::test]
    async fn test_same_token_returns_same_post() {
        let (store, guard) = setup(30).await;
        let next_id = Arc::new(AtomicU64::new(1));

        let first = guard
            .guarded_create(Some("tok-1"), creator(store.clone(), next_id.clone()))
            .await
            .unwrap();
        let second = guard
            .guarded_create(Some("tok-1"), creator(store.clone(), next_id.clone()))
            .await
            .unwrap();

        assert_eq!(first.post_id, second.post_id);
        // 只真正创建了一条
        assert_eq!(next_id.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_token_bypasses_guard() {
        let (store, guard) = setup(30).await;
        let next_id = Arc::new(AtomicU64::new(1));

        let first = guard
            .guarded_create(None, creator(store.clone(), next_id.clone()))
            .await
            .unwrap();
        let second = guard
            .guarded_create(None, creator(store.clone(), next_id.clone()))
            .await
            .unwrap();

        assert_ne!(first.post_id, second.post_id);
    }

    #[tokio::test]
    async fn test_expired_token_creates_new_post() {
        // TTL 为 0：记录立即过期，重复 token 按全新提交处理
        let (store, guard) = setup(0).await;
        let next_id = Arc::new(AtomicU64::new(1));

        let first = guard
            .guarded_create(Some("tok-1"), creator(store.clone(), next_id.clone()))
            .await
            .unwrap();
        let second = guard
            .guarded_create(Some("tok-1"), creator(store.clone(), next_id.clone()))
            .await
            .unwrap();

        assert_ne!(first.post_id, second.post_id);
    }

    #[tokio::test]
    async fn test_failed_create_allows_clean_retry() {
        let (store, guard) = setup(30).await;
        let next_id = Arc::new(AtomicU64::new(1));

        let err = guard
            .guarded_create(Some("tok-1"), || async {
                Err(ChatSyncError::Database("磁盘写入失败".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "storage_error");
        assert!(guard.is_empty());

        // 同一 token 的重试应当成功
        let post = guard
            .guarded_create(Some("tok-1"), creator(store.clone(), next_id.clone()))
            .await
            .unwrap();
        assert_eq!(post.post_id, 1);
    }

    #[tokio::test]
    async fn test_inflight_duplicate_gets_pending_error() {
        let (store, guard) = setup(30).await;

        let release = Arc::new(Notify::new());
        let release_create = release.clone();
        let store_create = store.clone();

        // 首发提交卡在 create_fn 里
        let guard_first = guard.clone();
        let first = tokio::spawn(async move {
            guard_first
                .guarded_create(Some("tok-1"), move || async move {
                    release_create.notified().await;
                    let post = make_post(1);
                    store_create.insert(&post).await?;
                    Ok(post)
                })
                .await
        });

        // 等首发记录落入 in-flight
        tokio::task::yield_now().await;
        while guard.is_empty() {
            tokio::task::yield_now().await;
        }

        // 撞车的重复提交：立即拿到 pending 错误，不阻塞等待
        let err = guard
            .guarded_create(Some("tok-1"), || async { Ok(make_post(2)) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "submission_pending");
        assert_eq!(err.http_status(), 409);

        // 放行首发；之后同 token 的提交拿到首发的结果
        release.notify_one();
        let first_post = first.await.unwrap().unwrap();
        let replay = guard
            .guarded_create(Some("tok-1"), || async { Ok(make_post(3)) })
            .await
            .unwrap();
        assert_eq!(replay.post_id, first_post.post_id);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let (store, guard) = setup(0).await;
        let next_id = Arc::new(AtomicU64::new(1));

        guard
            .guarded_create(Some("tok-1"), creator(store.clone(), next_id.clone()))
            .await
            .unwrap();
        guard
            .guarded_create(Some("tok-2"), creator(store.clone(), next_id.clone()))
            .await
            .unwrap();
        assert_eq!(guard.len(), 2);

        guard.cleanup_expired();
        assert_eq!(guard.len(), 0);
    }
}
