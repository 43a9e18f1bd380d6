use parking_lot::Mutex;

/// Identifies the activation an async operation started under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeToken(u64);

#[derive(Debug, Default)]
struct ScopeState {
    generation: u64,
    active: bool,
    /// Session-affecting calls outstanding in the current generation.
    pending: usize,
}

/// Liveness guard for observer state.
///
/// Every activation or deactivation bumps the generation, so a token captured
/// before it no longer matches and writes made through it are dropped.
#[derive(Debug, Default)]
pub struct Scope {
    state: Mutex<ScopeState>,
}

impl Scope {
    pub fn activate(&self) -> ScopeToken {
        let mut s = self.state.lock();
        s.generation += 1;
        s.active = true;
        s.pending = 0;
        ScopeToken(s.generation)
    }

    pub fn deactivate(&self) {
        let mut s = self.state.lock();
        s.generation += 1;
        s.active = false;
        s.pending = 0;
    }

    pub fn token(&self) -> ScopeToken {
        ScopeToken(self.state.lock().generation)
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn is_live(&self, token: ScopeToken) -> bool {
        let s = self.state.lock();
        s.active && s.generation == token.0
    }

    /// Run `f` with the pending-call counter, but only while `token` is live.
    /// The check and `f` happen under one lock, so a concurrent deactivation
    /// either precedes the check or follows the write.
    pub fn run_if_live<R>(&self, token: ScopeToken, f: impl FnOnce(&mut usize) -> R) -> Option<R> {
        let mut s = self.state.lock();
        if s.active && s.generation == token.0 {
            Some(f(&mut s.pending))
        } else {
            None
        }
    }
}
