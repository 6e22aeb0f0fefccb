/// Identifies one display commit (buffer swap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitStamp {
    /// Number of commits performed before this one.
    pub frame: u64,
    /// Taken right after the swap returned, on the renderer's clock.
    pub timestamp_ns: u64,
}

/// Side effect bound to the next commit. Runs exactly once, after the swap.
pub type CommitHook = Box<dyn FnOnce(&CommitStamp)>;

/// Anything that performs commits and can run hooks on the next one.
pub trait OnCommit {
    fn call_on_commit(&mut self, hook: CommitHook);
}
