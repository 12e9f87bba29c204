//! Capacity limits for the runtime's collections
//!
//! Every growable collection in the runtime is backed by a [`Limit`]:
//! - [`Limit::Fixed`]: storage is reserved once and overflowing it is an error
//! - [`Limit::Dynamic`]: storage starts at the given size and grows geometrically
//!
//! [`RuntimeConfig`] bundles one limit per collection. The defaults keep the output
//! stream fixed and let everything else grow.

/// Storage policy for one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// Exactly this many entries; pushing past it fails
    Fixed(usize),
    /// Start with this many entries and grow by at least 1.5x when full
    Dynamic(usize),
}

impl Limit {
    /// Initial number of entries to reserve
    pub fn initial(self) -> usize {
        match self {
            Limit::Fixed(n) | Limit::Dynamic(n) => n,
        }
    }

    /// Maximum number of entries, if bounded
    pub fn max(self) -> Option<usize> {
        match self {
            Limit::Fixed(n) => Some(n),
            Limit::Dynamic(_) => None,
        }
    }

    /// Capacity to grow to once `current` entries are full
    pub fn grow(self, current: usize) -> Option<usize> {
        match self {
            Limit::Fixed(_) => None,
            Limit::Dynamic(_) => Some((current + current / 2).max(current + 1).max(4)),
        }
    }

    /// The same size, but fixed
    pub fn fixed(self) -> Limit {
        Limit::Fixed(self.initial())
    }
}

/// Limits for every collection a runner and its globals own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Temporary variables and frame markers
    pub runtime_stack: Limit,
    /// Evaluation stack
    pub eval_stack: Limit,
    /// Nesting depth of the live container stack
    pub container_depth: Limit,
    /// Simultaneously running ink threads
    pub thread_depth: Limit,
    /// Choices presented at once
    pub choices: Limit,
    /// Elements in the output stream (a string is one element)
    pub output: Limit,
    /// Tags collected per line
    pub active_tags: Limit,
}

impl RuntimeConfig {
    /// Default limits
    pub fn new() -> Self {
        RuntimeConfig {
            runtime_stack: Limit::Dynamic(20),
            eval_stack: Limit::Dynamic(20),
            container_depth: Limit::Dynamic(20),
            thread_depth: Limit::Dynamic(10),
            choices: Limit::Dynamic(10),
            output: Limit::Fixed(200),
            active_tags: Limit::Dynamic(10),
        }
    }

    /// Default sizes, none of them allowed to grow
    pub fn strict() -> Self {
        let base = Self::new();
        RuntimeConfig {
            runtime_stack: base.runtime_stack.fixed(),
            eval_stack: base.eval_stack.fixed(),
            container_depth: base.container_depth.fixed(),
            thread_depth: base.thread_depth.fixed(),
            choices: base.choices.fixed(),
            output: base.output.fixed(),
            active_tags: base.active_tags.fixed(),
        }
    }

    pub fn with_runtime_stack(mut self, limit: Limit) -> Self {
        self.runtime_stack = limit;
        self
    }

    pub fn with_eval_stack(mut self, limit: Limit) -> Self {
        self.eval_stack = limit;
        self
    }

    pub fn with_container_depth(mut self, limit: Limit) -> Self {
        self.container_depth = limit;
        self
    }

    pub fn with_thread_depth(mut self, limit: Limit) -> Self {
        self.thread_depth = limit;
        self
    }

    pub fn with_choices(mut self, limit: Limit) -> Self {
        self.choices = limit;
        self
    }

    pub fn with_output(mut self, limit: Limit) -> Self {
        self.output = limit;
        self
    }

    pub fn with_active_tags(mut self, limit: Limit) -> Self {
        self.active_tags = limit;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}
