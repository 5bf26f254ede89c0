use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
};

/// Failure delivered to `on_failure` observers. Cheap to clone so every
/// observer of a job sees the same error.
#[derive(Clone)]
pub struct JobError(Arc<anyhow::Error>);

impl JobError {
    pub fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl fmt::Debug for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobError({:#})", self.0)
    }
}

impl std::error::Error for JobError {}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err)
    }
}

type SuccessFn<T> = Box<dyn FnOnce(&T) + Send>;
type FailureFn = Box<dyn FnOnce(&JobError) + Send>;

enum Observer<T> {
    Success(SuccessFn<T>),
    Failure(FailureFn),
}

enum Outcome<T> {
    Pending,
    Resolved(Arc<T>),
    Rejected(JobError),
}

impl<T> Outcome<T> {
    fn settled(&self) -> Option<Settled<T>> {
        match self {
            Outcome::Pending => None,
            Outcome::Resolved(v) => Some(Settled::Resolved(v.clone())),
            Outcome::Rejected(e) => Some(Settled::Rejected(e.clone())),
        }
    }
}

enum Settled<T> {
    Resolved(Arc<T>),
    Rejected(JobError),
}

struct Shared<T> {
    outcome: Outcome<T>,
    observers: Vec<Observer<T>>,
    wakers: Vec<Waker>,
}

/// Single-completion, multi-subscriber result of a render job.
///
/// Observers run exactly once, in registration order, on the thread that
/// completes the job. Registering after completion runs the observer
/// immediately. Clones share the same state.
pub struct JobResult<T> {
    shared: Arc<Mutex<Shared<T>>>,
}

impl<T> Clone for JobResult<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for JobResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.lock().outcome {
            Outcome::Pending => "pending",
            Outcome::Resolved(_) => "resolved",
            Outcome::Rejected(_) => "rejected",
        };
        f.debug_struct("JobResult").field("state", &state).finish()
    }
}

impl<T> JobResult<T> {
    pub(crate) fn pending() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                outcome: Outcome::Pending,
                observers: Vec::new(),
                wakers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared<T>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on_success<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let settled = {
            let mut shared = self.lock();
            match shared.outcome.settled() {
                None => {
                    shared.observers.push(Observer::Success(Box::new(f)));
                    return self;
                }
                Some(s) => s,
            }
        };
        if let Settled::Resolved(v) = settled {
            f(&v);
        }
        self
    }

    pub fn on_failure<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&JobError) + Send + 'static,
    {
        let settled = {
            let mut shared = self.lock();
            match shared.outcome.settled() {
                None => {
                    shared.observers.push(Observer::Failure(Box::new(f)));
                    return self;
                }
                Some(s) => s,
            }
        };
        if let Settled::Rejected(e) = settled {
            f(&e);
        }
        self
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self.lock().outcome, Outcome::Pending)
    }

    /// Whether both handles observe the same job.
    pub fn same_job(&self, other: &JobResult<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn resolve(&self, value: T) {
        self.settle(Outcome::Resolved(Arc::new(value)));
    }

    pub(crate) fn reject(&self, err: JobError) {
        self.settle(Outcome::Rejected(err));
    }

    fn settle(&self, outcome: Outcome<T>) {
        let (settled, observers, wakers) = {
            let mut shared = self.lock();
            if !matches!(shared.outcome, Outcome::Pending) {
                log::warn!("job result completed twice; keeping the first outcome");
                return;
            }
            shared.outcome = outcome;
            let Some(settled) = shared.outcome.settled() else {
                return;
            };
            (
                settled,
                std::mem::take(&mut shared.observers),
                std::mem::take(&mut shared.wakers),
            )
        };

        for observer in observers {
            match (observer, &settled) {
                (Observer::Success(f), Settled::Resolved(v)) => f(v),
                (Observer::Failure(f), Settled::Rejected(e)) => f(e),
                _ => {}
            }
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

impl<T: Clone> JobResult<T> {
    /// `None` while pending.
    pub fn outcome(&self) -> Option<Result<T, JobError>> {
        match &self.lock().outcome {
            Outcome::Pending => None,
            Outcome::Resolved(v) => Some(Ok(T::clone(v))),
            Outcome::Rejected(e) => Some(Err(e.clone())),
        }
    }
}

impl<T: Clone> Future for JobResult<T> {
    type Output = Result<T, JobError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut shared = self.lock();
        match &shared.outcome {
            Outcome::Pending => {
                if !shared.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    shared.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            Outcome::Resolved(v) => Poll::Ready(Ok(T::clone(v))),
            Outcome::Rejected(e) => Poll::Ready(Err(e.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn observers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result: JobResult<u32> = JobResult::pending();
        for tag in ["a", "b", "c"] {
            let log = log.clone();
            result.on_success(move |v| log.lock().unwrap().push(format!("{tag}{v}")));
        }
        result.on_failure(|_| panic!("must not fail"));
        assert!(log.lock().unwrap().is_empty());

        result.resolve(7);
        assert_eq!(*log.lock().unwrap(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn late_observers_fire_immediately() {
        let result: JobResult<u32> = JobResult::pending();
        result.reject(JobError::new(anyhow::anyhow!("boom")));

        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        result
            .on_success(|_| panic!("rejected job must not call on_success"))
            .on_failure(move |e| *sink.lock().unwrap() = Some(e.to_string()));
        assert_eq!(seen.lock().unwrap().as_deref(), Some("boom"));
    }

    #[test]
    fn second_completion_is_ignored() {
        let result: JobResult<u32> = JobResult::pending();
        result.resolve(1);
        result.reject(JobError::new(anyhow::anyhow!("late")));
        assert_eq!(result.outcome().unwrap().unwrap(), 1);
    }

    #[test]
    fn future_resolves_after_completion() {
        let result: JobResult<String> = JobResult::pending();
        let handle = result.clone();
        let worker = std::thread::spawn(move || handle.resolve("done".to_string()));
        let value = pollster::block_on(result).expect("resolved");
        worker.join().unwrap();
        assert_eq!(value, "done");
    }
}
