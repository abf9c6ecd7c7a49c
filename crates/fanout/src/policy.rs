//! Selection policies: reducing N results into one outcome.
//!
//! A [`SelectionPolicy`] starts a fresh [`Reduction`] per inbound request.
//! The reduction sees results in completion order and may settle early; if it
//! does not, it is finished once every result is in.

use std::fmt;
use std::sync::Arc;

use crate::response::FanoutResult;

/// How a fanout ended.
#[derive(Debug)]
pub enum Outcome {
    /// This result is written to the caller.
    Success(FanoutResult),
    /// The fanout failed. The result, when present, represents the failure;
    /// `None` means nothing usable arrived.
    Failure(Option<FanoutResult>),
}

/// Per-request reduction state.
pub trait Reduction: Send {
    /// Observe one result. Returning `Some` settles the fanout; remaining
    /// attempts are abandoned.
    fn observe(&mut self, result: FanoutResult) -> Option<Outcome>;

    /// Settle with what has been observed.
    fn finish(self: Box<Self>) -> Outcome;
}

pub trait SelectionPolicy: Send + Sync {
    fn start(&self, endpoints: usize) -> Box<dyn Reduction>;
}

type Predicate = Arc<dyn Fn(&FanoutResult) -> bool + Send + Sync>;

fn default_predicate() -> Predicate {
    Arc::new(FanoutResult::is_success)
}

/// The first result satisfying the predicate wins.
///
/// When none does, the failure with the highest status stands for the
/// fanout; ties keep the one that completed first.
#[derive(Clone)]
pub struct FirstSuccess {
    predicate: Predicate,
}

impl FirstSuccess {
    /// Success means a response with a status below 400.
    pub fn new() -> Self {
        Self {
            predicate: default_predicate(),
        }
    }

    /// Use a custom success predicate.
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&FanoutResult) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl Default for FirstSuccess {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FirstSuccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirstSuccess").finish_non_exhaustive()
    }
}

impl SelectionPolicy for FirstSuccess {
    fn start(&self, _endpoints: usize) -> Box<dyn Reduction> {
        Box::new(FirstSuccessReduction {
            predicate: self.predicate.clone(),
            failure: None,
        })
    }
}

struct FirstSuccessReduction {
    predicate: Predicate,
    failure: Option<FanoutResult>,
}

impl Reduction for FirstSuccessReduction {
    fn observe(&mut self, result: FanoutResult) -> Option<Outcome> {
        if (self.predicate)(&result) {
            return Some(Outcome::Success(result));
        }

        let worse = match &self.failure {
            Some(current) => result.status() > current.status(),
            None => true,
        };
        if worse {
            self.failure = Some(result);
        }
        None
    }

    fn finish(self: Box<Self>) -> Outcome {
        Outcome::Failure(self.failure)
    }
}

/// Every endpoint must succeed. The first failure settles the fanout as a
/// failure; otherwise the first result to complete is written.
#[derive(Clone)]
pub struct AllSucceed {
    predicate: Predicate,
}

impl AllSucceed {
    pub fn new() -> Self {
        Self {
            predicate: default_predicate(),
        }
    }

    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&FanoutResult) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl Default for AllSucceed {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AllSucceed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllSucceed").finish_non_exhaustive()
    }
}

impl SelectionPolicy for AllSucceed {
    fn start(&self, endpoints: usize) -> Box<dyn Reduction> {
        Box::new(AllSucceedReduction {
            predicate: self.predicate.clone(),
            expected: endpoints,
            seen: 0,
            first: None,
        })
    }
}

struct AllSucceedReduction {
    predicate: Predicate,
    expected: usize,
    seen: usize,
    first: Option<FanoutResult>,
}

impl Reduction for AllSucceedReduction {
    fn observe(&mut self, result: FanoutResult) -> Option<Outcome> {
        self.seen += 1;
        if !(self.predicate)(&result) {
            return Some(Outcome::Failure(Some(result)));
        }
        if self.first.is_none() {
            self.first = Some(result);
        }
        None
    }

    fn finish(self: Box<Self>) -> Outcome {
        let this = *self;
        match this.first {
            Some(first) if this.seen == this.expected => Outcome::Success(first),
            _ => Outcome::Failure(None),
        }
    }
}
