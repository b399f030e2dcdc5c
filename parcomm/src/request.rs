//! Tokens for in-flight non-blocking operations.
//!
//! A [`Request`] is either null or refers to exactly one outstanding native
//! operation. It moves freely, can only be copied while null, and waits for
//! its operation when dropped, so an operation can never outlive the buffer
//! it writes into: the `'a` lifetime ties the token to that buffer.
//!
//! Output data does not flow through shared memory. The library hands the
//! produced bytes back in the [`Completion`] and the request's sink writes
//! them into the borrowed caller buffer at completion time.

use std::fmt;
use std::mem;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::errors::{check, escalate, Error, Result};
use crate::native::{codes, Completion, Native, RawRequest, ReturnCode};
use crate::status::Status;

/// Writes completion bytes into the caller's buffer.
pub(crate) type Sink<'a> = Box<dyn FnOnce(&[u8]) -> Result<()> + Send + 'a>;

/// Handle to an outstanding non-blocking operation.
pub struct Request<'a> {
    raw: RawRequest,
    native: Arc<dyn Native>,
    sink: Option<Sink<'a>>,
}

impl<'a> Request<'a> {
    /// A null token; waiting on it returns immediately.
    pub fn null(native: Arc<dyn Native>) -> Self {
        Self {
            raw: RawRequest::NULL,
            native,
            sink: None,
        }
    }

    /// Start a native operation and wrap the request it produced.
    pub(crate) fn issue<F>(native: Arc<dyn Native>, sink: Option<Sink<'a>>, call: F) -> Result<Self>
    where
        F: FnOnce(&dyn Native, &mut RawRequest) -> ReturnCode,
    {
        let mut raw = RawRequest::NULL;
        let code = call(native.as_ref(), &mut raw);
        check(native.as_ref(), code)?;
        trace!(request = ?raw, "issued request");
        Ok(Self { raw, native, sink })
    }

    /// The raw handle.
    pub const fn raw(&self) -> RawRequest {
        self.raw
    }

    /// Whether no operation is outstanding.
    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    /// The library this token belongs to.
    pub fn native(&self) -> &Arc<dyn Native> {
        &self.native
    }

    /// Block until the operation completes.
    pub fn wait(&mut self) -> Result<()> {
        self.wait_with_status().map(|_| ())
    }

    /// Block until the operation completes and return its status.
    ///
    /// A null token yields the empty status without calling the library.
    /// The token is null afterwards, whether or not the operation failed.
    pub fn wait_with_status(&mut self) -> Result<Status> {
        if self.is_null() {
            return Ok(Status::default());
        }
        trace!(request = ?self.raw, "waiting on request");
        let mut completion = Completion::default();
        let code = self.native.wait(&mut self.raw, &mut completion);
        self.raw = RawRequest::NULL;
        if let Err(error) = check(self.native.as_ref(), code) {
            self.sink = None;
            return Err(error);
        }
        self.deliver(completion)
    }

    /// Poll the operation without blocking.
    pub fn test(&mut self) -> Result<bool> {
        self.test_with_status().map(|status| status.is_some())
    }

    /// Poll the operation; `Some(status)` once it has completed.
    pub fn test_with_status(&mut self) -> Result<Option<Status>> {
        if self.is_null() {
            return Ok(Some(Status::default()));
        }
        let mut flag = false;
        let mut completion = Completion::default();
        let code = self.native.test(&mut self.raw, &mut flag, &mut completion);
        if let Err(error) = check(self.native.as_ref(), code) {
            self.raw = RawRequest::NULL;
            self.sink = None;
            return Err(error);
        }
        if !flag {
            return Ok(None);
        }
        trace!(request = ?self.raw, "request completed on test");
        self.raw = RawRequest::NULL;
        self.deliver(completion).map(Some)
    }

    /// Copy a null token.
    ///
    /// Two tokens for the same outstanding operation would both try to
    /// complete it, so copying a pending token is refused.
    pub fn try_clone(&self) -> Result<Self> {
        if self.is_null() {
            return Ok(Self::null(Arc::clone(&self.native)));
        }
        warn!(request = ?self.raw, "refused to copy a pending request");
        Err(Error::misuse("illegal copy of a live outstanding-operation token"))
    }

    /// Move the token out, leaving a null one in its place.
    #[must_use]
    pub fn take(&mut self) -> Self {
        let null = Self::null(Arc::clone(&self.native));
        mem::replace(self, null)
    }

    /// Replace this token with `other`, first waiting for the current
    /// operation. `other` is installed even if that wait fails.
    pub fn assign(&mut self, other: Self) -> Result<()> {
        let outcome = self.wait();
        *self = other;
        outcome
    }

    fn deliver(&mut self, completion: Completion) -> Result<Status> {
        let sink = self.sink.take();
        if let (Some(sink), Some(data)) = (sink, completion.data.as_deref()) {
            sink(data)?;
        }
        Ok(Status::from(completion.status))
    }
}

impl Drop for Request<'_> {
    fn drop(&mut self) {
        if self.is_null() {
            return;
        }
        trace!(request = ?self.raw, "dropping pending request, waiting for it");
        if let Err(error) = self.wait() {
            escalate("outstanding operation", &error);
        }
    }
}

impl fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("raw", &self.raw)
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

/// Library shared by the pending tokens of a batch, if any is pending.
fn batch_native(requests: &[Request<'_>]) -> Option<Arc<dyn Native>> {
    requests
        .iter()
        .find(|request| !request.is_null())
        .map(|request| Arc::clone(&request.native))
}

/// Hand every completion of a finished batch to its token.
///
/// All tokens end null. Completions that carry a failure code drop their
/// sink without writing.
fn settle(requests: &mut [Request<'_>], completions: Vec<Completion>) -> Result<()> {
    let mut first_failure = None;
    for (request, completion) in requests.iter_mut().zip(completions) {
        request.raw = RawRequest::NULL;
        if completion.status.error != codes::SUCCESS {
            request.sink = None;
            continue;
        }
        if let Err(error) = request.deliver(completion) {
            first_failure.get_or_insert(error);
        }
    }
    first_failure.map_or(Ok(()), Err)
}

/// Wait for every token with a single native call.
///
/// Every token is null afterwards. If any operation failed the result is one
/// aggregate failure; successful operations still deliver their data.
pub fn wait_all(requests: &mut [Request<'_>]) -> Result<()> {
    let Some(native) = batch_native(requests) else {
        return Ok(());
    };
    trace!(count = requests.len(), "waiting on request batch");
    let mut raws: Vec<RawRequest> = requests.iter().map(Request::raw).collect();
    let mut completions = vec![Completion::default(); raws.len()];
    let code = native.waitall(&mut raws, &mut completions);
    let delivered = settle(requests, completions);
    check(native.as_ref(), code)?;
    delivered
}

/// Complete every token if all operations have finished, else none.
pub fn test_all(requests: &mut [Request<'_>]) -> Result<bool> {
    let Some(native) = batch_native(requests) else {
        return Ok(true);
    };
    let mut raws: Vec<RawRequest> = requests.iter().map(Request::raw).collect();
    let mut completions = vec![Completion::default(); raws.len()];
    let mut flag = false;
    let code = native.testall(&mut raws, &mut flag, &mut completions);
    if code == codes::SUCCESS && !flag {
        return Ok(false);
    }
    let delivered = settle(requests, completions);
    check(native.as_ref(), code)?;
    delivered.map(|()| true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{RawComm, RawDatatype};
    use crate::testing::{ChaosNative, CountingNative, Entry, FailurePolicy, StubNative};
    use tracing_test::traced_test;

    fn barrier(native: &Arc<dyn Native>) -> Request<'static> {
        Request::issue(Arc::clone(native), None, |native, out| native.ibarrier(RawComm::WORLD, out)).unwrap()
    }

    fn echo<'a>(native: &Arc<dyn Native>, value: i32, into: &'a mut i32) -> Request<'a> {
        let sink: Sink<'a> = Box::new(move |bytes: &[u8]| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[..4]);
            *into = i32::from_ne_bytes(raw);
            Ok(())
        });
        Request::issue(Arc::clone(native), Some(sink), |native, out| {
            native.ibcast(&value.to_ne_bytes(), 1, RawDatatype::INT, 0, RawComm::WORLD, out)
        })
        .unwrap()
    }

    #[test]
    fn null_token_completes_without_native_calls() {
        let counting = CountingNative::new(StubNative::new());
        let mut request = Request::null(counting.shared());

        assert!(request.test().unwrap());
        assert_eq!(request.wait_with_status().unwrap(), Status::default());
        assert_eq!(counting.total(), 0);
    }

    #[test]
    fn second_wait_is_a_no_op() {
        let counting = CountingNative::new(StubNative::new());
        let native = counting.shared();
        let mut request = barrier(&native);

        request.wait().unwrap();
        request.wait().unwrap();

        assert_eq!(counting.calls(Entry::Wait), 1);
        assert!(request.is_null());
    }

    #[test]
    fn completion_writes_into_the_borrowed_buffer() {
        let native = StubNative::new().shared();
        let mut target = 0;

        let mut request = echo(&native, 42, &mut target);
        request.wait().unwrap();
        drop(request);

        assert_eq!(target, 42);
    }

    #[test]
    fn copying_a_pending_token_is_misuse() {
        let native = StubNative::new().shared();
        let mut request = barrier(&native);

        let error = request.try_clone().unwrap_err();
        assert!(error.is_misuse());
        assert_eq!(error.to_string(), "illegal copy of a live outstanding-operation token");

        request.wait().unwrap();
        assert!(request.try_clone().unwrap().is_null());
    }

    #[test]
    fn take_moves_the_operation_and_leaves_null() {
        let counting = CountingNative::new(StubNative::new());
        let native = counting.shared();
        let mut source = barrier(&native);

        let mut target = source.take();
        assert!(source.is_null());
        drop(source);
        assert_eq!(counting.calls(Entry::Wait), 0);

        target.wait().unwrap();
        assert_eq!(counting.calls(Entry::Wait), 1);
    }

    #[test]
    fn dropping_a_pending_token_waits_once() {
        let counting = CountingNative::new(StubNative::new());
        let native = counting.shared();
        let mut target = 0;

        drop(echo(&native, 7, &mut target));

        assert_eq!(counting.calls(Entry::Wait), 1);
        assert_eq!(target, 7);
    }

    #[test]
    fn assign_waits_on_the_replaced_operation() {
        let counting = CountingNative::new(StubNative::new());
        let native = counting.shared();
        let mut slot = barrier(&native);

        slot.assign(barrier(&native)).unwrap();
        assert_eq!(counting.calls(Entry::Wait), 1);
        assert!(!slot.is_null());

        slot.wait().unwrap();
        assert_eq!(counting.calls(Entry::Wait), 2);
    }

    #[test]
    fn test_polls_until_completion() {
        let counting = CountingNative::new(StubNative::new().with_pending_polls(2));
        let native = counting.shared();
        let mut request = barrier(&native);

        assert!(!request.test().unwrap());
        assert!(!request.test().unwrap());
        assert!(request.test_with_status().unwrap().is_some());
        assert!(request.is_null());
        assert_eq!(counting.calls(Entry::Test), 3);
    }

    #[test]
    fn wait_all_uses_one_native_call_and_nulls_every_token() {
        let counting = CountingNative::new(StubNative::new());
        let native = counting.shared();
        let (mut a, mut b) = (0, 0);

        let mut requests = vec![echo(&native, 1, &mut a), Request::null(Arc::clone(&native)), echo(&native, 2, &mut b)];
        wait_all(&mut requests).unwrap();

        assert!(requests.iter().all(Request::is_null));
        assert_eq!(counting.calls(Entry::Waitall), 1);
        assert_eq!(counting.calls(Entry::Wait), 0);
        drop(requests);
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn wait_all_over_null_tokens_does_nothing() {
        let counting = CountingNative::new(StubNative::new());
        let mut requests = vec![Request::null(counting.shared()), Request::null(counting.shared())];

        wait_all(&mut requests).unwrap();
        assert_eq!(counting.total(), 0);
    }

    #[test]
    fn wait_all_reports_one_aggregate_failure() {
        let chaos = ChaosNative::new(StubNative::new());
        let native = chaos.shared();
        let mut requests = vec![barrier(&native), barrier(&native)];

        chaos.add_policy(FailurePolicy::once(Entry::Waitall, codes::ERR_IN_STATUS));
        let error = wait_all(&mut requests).unwrap_err();

        assert_eq!(error.code(), Some(codes::ERR_IN_STATUS));
        assert!(requests.iter().all(Request::is_null));
    }

    #[test]
    fn test_all_is_all_or_nothing() {
        let native = StubNative::new().with_pending_polls(1).shared();
        let mut requests = vec![barrier(&native), barrier(&native)];

        assert!(!test_all(&mut requests).unwrap());
        assert!(requests.iter().all(|request| !request.is_null()));
        assert!(test_all(&mut requests).unwrap());
        assert!(requests.iter().all(Request::is_null));
    }

    #[test]
    fn issue_failures_surface_as_native_errors() {
        let native = StubNative::new().shared();
        let error = Request::issue(native, None, |native, out| native.ibarrier(RawComm::NULL, out)).unwrap_err();
        assert_eq!(error.code(), Some(codes::ERR_COMM));
    }

    #[test]
    #[traced_test]
    fn refused_copies_are_logged() {
        let native = StubNative::new().shared();
        let mut request = barrier(&native);
        let _ = request.try_clone();
        request.wait().unwrap();

        assert!(logs_contain("refused to copy a pending request"));
    }
}
