/// Classification for breaker bookkeeping.
///
/// Used to determine how the router responds to a failed backend attempt.
///
/// # Behavior Summary
///
/// | Class | Try Next Backend? | Record Breaker Failure? |
/// |-------|-------------------|-------------------------|
/// | `FailoverWithPenalty` | If fallback is enabled | Yes |
/// | `NextBackend` | If fallback is enabled | No |
/// | `Never` | No | No |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Record a breaker failure, then move on to the next candidate.
    ///
    /// Used for transport errors, timeouts, adapter-reported rate limits and
    /// auth failures. After enough consecutive penalties the breaker trips and
    /// the backend is excluded from routing until its cooldown elapses.
    FailoverWithPenalty,

    /// Move on to the next candidate without penalizing this backend.
    ///
    /// Used when the backend can't serve this request shape but is otherwise
    /// healthy.
    NextBackend,

    /// Terminal. The request itself is invalid or routing is exhausted.
    Never,
}
