//! The unit of work moved through worker deques.

/// A boxed closure scheduled on the pool.
///
/// The source model for this type is a `(function pointer, opaque argument)`
/// pair; the boxed closure is the owned-value equivalent. The box pointer is
/// what actually moves through deque slots, and [`run`](Self::run) consumes
/// the task, so the argument lives exactly until the function has run.
pub struct Task {
    job: Box<dyn FnOnce() + Send + 'static>,
}

impl Task {
    /// Wraps a closure into a schedulable task.
    pub fn new(job: impl FnOnce() + Send + 'static) -> Self {
        Self { job: Box::new(job) }
    }

    /// Executes the task, consuming it.
    #[inline]
    pub fn run(self) {
        (self.job)();
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn run_consumes_and_executes() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let task = Task::new(move || flag.store(true, Ordering::Relaxed));
        task.run();
        assert!(ran.load(Ordering::Relaxed));
    }

    #[test]
    fn task_owns_its_argument() {
        let payload = vec![1_u8, 2, 3];
        let task = Task::new(move || {
            assert_eq!(payload.len(), 3);
        });
        task.run();
    }
}
