//! Call context for handlers.
//!
//! The context is the single channel between the transport and a running
//! handler:
//! - cancellation and deadline (`cancel`, `is_cancelled`, `cancelled`)
//! - status signaling (`set_status`, `fail`)
//!
//! # Example
//!
//! ```ignore
//! fn say_hello(args: Args, ctx: Context) -> Result<Value, Status> {
//!     if args.str("name").is_none() {
//!         ctx.fail(Code::InvalidArgument, "name is required");
//!     }
//!     Ok(json!({ "message": "Hello!" }))
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tonic::{Code, Status};

#[derive(Debug)]
struct Inner {
    /// Route of the method being called.
    method: String,
    /// Absolute deadline for the call, if any.
    deadline: Option<Instant>,
    /// Set once by the transport (or the handler) to cancel the call.
    cancelled: AtomicBool,
    /// Wakes suspended `cancelled()` waiters.
    notify: Notify,
    /// Failure status set by the handler.
    status: Mutex<Option<Status>>,
}

/// Context passed to every handler invocation.
///
/// # Thread Safety
///
/// `Context` is `Clone`; clones share the same cancellation flag and status
/// slot, so the transport keeps one clone and hands another to the handler.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// Create a context for a call to `method` with no deadline.
    pub fn new(method: impl Into<String>) -> Self {
        Self::build(method.into(), None)
    }

    /// Create a context for a call to `method` that expires at `deadline`.
    pub fn with_deadline(method: impl Into<String>, deadline: Instant) -> Self {
        Self::build(method.into(), Some(deadline))
    }

    /// Create a context that expires `timeout` from now.
    pub fn with_timeout(method: impl Into<String>, timeout: Duration) -> Self {
        Self::build(method.into(), Some(Instant::now() + timeout))
    }

    fn build(method: String, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                method,
                deadline,
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                status: Mutex::new(None),
            }),
        }
    }

    /// Route of the method being called, `/package.Service/Method`.
    #[inline]
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// Deadline of the call, if any.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline; `None` without a deadline.
    pub fn time_remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// True once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.inner.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Cancel the call. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            tracing::debug!("Call to {} cancelled", self.inner.method);
        }
        self.inner.notify.notify_waiters();
    }

    /// True once the call was cancelled or its deadline passed.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire) || self.is_expired()
    }

    /// Wait until the call is cancelled or its deadline passes.
    ///
    /// The deadline is only armed as a timer when polled inside a tokio
    /// runtime. Elsewhere this waits for an explicit [`cancel`] only, and
    /// callers check [`is_cancelled`] to observe the deadline.
    ///
    /// [`cancel`]: Context::cancel
    /// [`is_cancelled`]: Context::is_cancelled
    pub async fn cancelled(&self) {
        let explicit = async {
            loop {
                let notified = self.inner.notify.notified();
                if self.inner.cancelled.load(Ordering::Acquire) {
                    return;
                }
                notified.await;
            }
        };

        let timer = self
            .inner
            .deadline
            .filter(|_| tokio::runtime::Handle::try_current().is_ok());

        match timer {
            Some(deadline) => {
                tokio::select! {
                    _ = explicit => {}
                    _ = tokio::time::sleep_until(deadline.into()) => {}
                }
            }
            None => explicit.await,
        }
    }

    /// Status reported to the caller when the call stops early.
    pub fn cancellation_status(&self) -> Status {
        if self.inner.cancelled.load(Ordering::Acquire) {
            Status::cancelled(format!("call to {} was cancelled", self.inner.method))
        } else {
            Status::deadline_exceeded(format!("deadline exceeded for {}", self.inner.method))
        }
    }

    /// Mark the call as failed.
    ///
    /// The status replaces the handler's reply (unary output) or ends the
    /// reply sequence (streaming output). The last status set wins.
    pub fn set_status(&self, status: Status) {
        *self
            .inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(status);
    }

    /// Mark the call as failed with `code` and `message`.
    pub fn fail(&self, code: Code, message: impl Into<String>) {
        self.set_status(Status::new(code, message));
    }

    /// True when a failure status has been set and not yet taken.
    pub fn has_status(&self) -> bool {
        self.inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Take the failure status, leaving none behind.
    pub fn take_status(&self) -> Option<Status> {
        self.inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_creation() {
        let ctx = Context::new("/helloworld.Greeter/SayHello");
        assert_eq!(ctx.method(), "/helloworld.Greeter/SayHello");
        assert!(ctx.deadline().is_none());
        assert!(ctx.time_remaining().is_none());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_context_is_clone() {
        let ctx = Context::new("/a.B/C");
        let ctx2 = ctx.clone();

        ctx2.cancel();
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.cancellation_status().code(), Code::Cancelled);
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = Context::with_deadline("/a.B/C", Instant::now());
        assert!(ctx.is_expired());
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.cancellation_status().code(), Code::DeadlineExceeded);
    }

    #[test]
    fn test_timeout_not_yet_expired() {
        let ctx = Context::with_timeout("/a.B/C", Duration::from_secs(60));
        assert!(!ctx.is_expired());
        assert!(ctx.time_remaining().unwrap() > Duration::from_secs(50));
    }

    #[test]
    fn test_status_slot() {
        let ctx = Context::new("/a.B/C");
        assert!(!ctx.has_status());

        ctx.fail(Code::NotFound, "first");
        ctx.fail(Code::PermissionDenied, "second");
        assert!(ctx.has_status());

        let status = ctx.take_status().unwrap();
        assert_eq!(status.code(), Code::PermissionDenied);
        assert_eq!(status.message(), "second");
        assert!(ctx.take_status().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let ctx = Context::new("/a.B/C");
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_after_deadline() {
        let ctx = Context::with_timeout("/a.B/C", Duration::from_millis(5));
        tokio::time::timeout(Duration::from_secs(1), ctx.cancelled())
            .await
            .unwrap();
    }

    #[test]
    fn test_cancelled_with_deadline_outside_tokio() {
        let ctx = Context::with_timeout("/a.B/C", Duration::from_secs(5));
        let canceller = ctx.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            canceller.cancel();
        });

        futures::executor::block_on(ctx.cancelled());
        handle.join().unwrap();
        assert_eq!(ctx.cancellation_status().code(), Code::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let ctx = Context::new("/a.B/C");
        ctx.cancel();
        ctx.cancelled().await;
    }
}
