//! Recursion guard keyed per logical call chain.
//!
//! Inside [`call_chain`] the in-flight set lives in a `tokio::task_local!`,
//! so it follows the task across `.await` points and worker threads. Outside
//! such a scope the set falls back to a thread-local.

use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;

tokio::task_local! {
    static CHAIN: RefCell<HashSet<String>>;
}

thread_local! {
    static THREAD_CHAIN: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

/// Run `future` with its own in-flight set, unless one is already active.
pub async fn call_chain<F>(future: F) -> F::Output
where
    F: Future,
{
    if CHAIN.try_with(|_| ()).is_ok() {
        future.await
    } else {
        CHAIN.scope(RefCell::new(HashSet::new()), future).await
    }
}

/// Marks a recursion key as in flight until dropped.
#[derive(Debug)]
pub struct RecursionGuard {
    key: String,
}

impl RecursionGuard {
    /// Claim `key`, or `None` when it is already being processed higher up
    /// the current call chain.
    pub fn enter(key: String) -> Option<Self> {
        let inserted = match CHAIN.try_with(|set| set.borrow_mut().insert(key.clone())) {
            Ok(inserted) => inserted,
            Err(_) => THREAD_CHAIN
                .try_with(|set| set.borrow_mut().insert(key.clone()))
                .unwrap_or(true),
        };
        inserted.then_some(Self { key })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for RecursionGuard {
    fn drop(&mut self) {
        let removed = CHAIN.try_with(|set| set.borrow_mut().remove(&self.key));
        if removed.is_err() {
            let _ = THREAD_CHAIN.try_with(|set| set.borrow_mut().remove(&self.key));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_enter_is_refused_until_release() {
        let outer = RecursionGuard::enter("k".to_string()).expect("first claim");
        assert!(RecursionGuard::enter("k".to_string()).is_none());
        assert!(RecursionGuard::enter("other".to_string()).is_some());

        drop(outer);
        assert!(RecursionGuard::enter("k".to_string()).is_some());
    }

    #[test]
    fn threads_do_not_share_keys() {
        let _held = RecursionGuard::enter("shared".to_string()).expect("claim");
        let claimed_elsewhere = std::thread::spawn(|| {
            RecursionGuard::enter("shared".to_string()).is_some()
        })
        .join()
        .expect("thread joins");
        assert!(claimed_elsewhere);
    }

    #[tokio::test]
    async fn call_chain_survives_await_points() {
        call_chain(async {
            let _held = RecursionGuard::enter("task".to_string()).expect("claim");
            tokio::task::yield_now().await;
            assert!(RecursionGuard::enter("task".to_string()).is_none());
        })
        .await;

        call_chain(async {
            assert!(RecursionGuard::enter("task".to_string()).is_some());
        })
        .await;
    }

    #[tokio::test]
    async fn separate_tasks_have_separate_chains() {
        let first = tokio::spawn(call_chain(async {
            let guard = RecursionGuard::enter("entity".to_string());
            tokio::task::yield_now().await;
            guard.is_some()
        }));
        let second = tokio::spawn(call_chain(async {
            let guard = RecursionGuard::enter("entity".to_string());
            tokio::task::yield_now().await;
            guard.is_some()
        }));

        assert!(first.await.expect("join"));
        assert!(second.await.expect("join"));
    }
}
