/// Optimisation and instrumentation switches, read once per predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerSettings {
    /// Emit TRACEPOINT instructions around goals.
    pub trace: bool,
    pub tail_calls: bool,
    /// Environment-frame elimination.
    pub env_frames: bool,
    /// Choice-frame elimination.
    pub choice_frames: bool,
    /// The routine dump is logged at trace level from 4 upwards.
    pub verbose: u8,
    /// Ceiling on the optimisation fixpoint. Exceeding it is a compiler bug.
    pub max_fixpoint_iterations: usize,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        CompilerSettings {
            trace: true,
            tail_calls: true,
            env_frames: true,
            choice_frames: true,
            verbose: 0,
            max_fixpoint_iterations: 1000,
        }
    }
}

impl CompilerSettings {
    #[inline]
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    #[inline]
    pub fn with_tail_calls(mut self, tail_calls: bool) -> Self {
        self.tail_calls = tail_calls;
        self
    }

    #[inline]
    pub fn with_env_frames(mut self, env_frames: bool) -> Self {
        self.env_frames = env_frames;
        self
    }

    #[inline]
    pub fn with_choice_frames(mut self, choice_frames: bool) -> Self {
        self.choice_frames = choice_frames;
        self
    }

    #[inline]
    pub fn with_verbose(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    #[inline]
    pub fn with_max_fixpoint_iterations(mut self, n: usize) -> Self {
        self.max_fixpoint_iterations = n;
        self
    }

    /// Settings for tests comparing generated code: no instrumentation.
    pub fn quiet() -> Self {
        Self::default().with_trace(false)
    }
}
