//! Request priority levels and aggregation
//!
//! A coordinator multiplexes one network transaction across several
//! consumers, so the transaction's scheduling weight is the maximum urgency
//! of everyone sharing it.

/// Priority of a request sharing the network transaction.
///
/// Ordered by urgency: `Idle` is the least urgent, `Highest` the most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestPriority {
    /// Background work (prefetch)
    Idle,
    /// Below every interactive request
    Lowest,
    /// Non-blocking subresources (images)
    Low,
    /// Default for requests with no hint
    Medium,
    /// Render-blocking subresources (CSS, fonts)
    High,
    /// Main document
    Highest,
}

impl Default for RequestPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl RequestPriority {
    /// Aggregate priority over a set of sharers: the most urgent wins.
    /// An empty set aggregates to `Idle` so a consumer-less transaction
    /// never competes with live requests.
    pub fn aggregate<I>(priorities: I) -> Self
    where
        I: IntoIterator<Item = RequestPriority>,
    {
        priorities
            .into_iter()
            .max()
            .unwrap_or(RequestPriority::Idle)
    }
}
