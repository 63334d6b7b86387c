//! Summarization trigger policy.
//!
//! Kept separate from the manager so alternate triggers (time-based,
//! token-count-based) can be swapped in without touching storage or
//! orchestration.

/// Decides when a conversation's live history should be collapsed into a
/// summary. Implementations are stateless and never fail.
pub trait SummarizePolicy: Send + Sync {
    fn should_summarize(&self, messages_since_summary: u64, threshold: u64) -> bool;
}

/// Count-based trigger: summarize once the live message count reaches the
/// threshold. A threshold of zero disables summarization.
pub struct MessageCountPolicy;

impl SummarizePolicy for MessageCountPolicy {
    fn should_summarize(&self, messages_since_summary: u64, threshold: u64) -> bool {
        threshold > 0 && messages_since_summary >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_at_threshold() {
        let policy = MessageCountPolicy;
        assert!(!policy.should_summarize(4, 5));
        assert!(policy.should_summarize(5, 5));
        assert!(policy.should_summarize(6, 5));
    }

    #[test]
    fn zero_threshold_disables_summarization() {
        let policy = MessageCountPolicy;
        assert!(!policy.should_summarize(0, 0));
        assert!(!policy.should_summarize(1000, 0));
    }
}
