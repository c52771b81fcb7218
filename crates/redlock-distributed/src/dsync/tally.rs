use std::sync::Mutex;

/// Majority threshold for a server set of `total` members.
pub fn quorum(total: usize) -> usize {
    total / 2 + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Granted,
    Denied,
    /// A granted TTL inspection carrying the server's remaining lifetime.
    Ttl(i64),
}

#[derive(Debug, Default)]
struct TallyState {
    granted: usize,
    denied: usize,
    ttls: Vec<i64>,
}

/// Votes collected during one coordinator call. Workers record into it
/// concurrently; the reductions are order independent.
#[derive(Debug, Default)]
pub struct VoteTally {
    state: Mutex<TallyState>,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, vote: Vote) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match vote {
            Vote::Granted => state.granted += 1,
            Vote::Denied => state.denied += 1,
            Vote::Ttl(ttl) => {
                state.granted += 1;
                state.ttls.push(ttl);
            }
        }
    }

    pub fn granted(&self) -> usize {
        self.read(|state| state.granted)
    }

    pub fn denied(&self) -> usize {
        self.read(|state| state.denied)
    }

    pub fn has_quorum(&self, quorum: usize) -> bool {
        self.granted() >= quorum
    }

    /// The TTL every responding server agreed on, if they all agree.
    pub fn agreed_ttl(&self) -> Option<i64> {
        self.read(|state| {
            let (first, rest) = state.ttls.split_first()?;
            rest.iter().all(|ttl| ttl == first).then_some(*first)
        })
    }

    fn read<T>(&self, f: impl FnOnce(&TallyState) -> T) -> T {
        match self.state.lock() {
            Ok(guard) => f(&*guard),
            Err(poisoned) => f(&*poisoned.into_inner()),
        }
    }
}
