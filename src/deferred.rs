//! Single-assignment values settled by a producer and read by any number of consumers.
//!
//! A [`Deferred`] is the read side; the matching [`Resolver`] is the only way to
//! settle it. Settling happens at most once: later `resolve`/`reject` calls are
//! no-ops. Settled state can be inspected synchronously, which is what lets a
//! frame hand back a window of not-yet-loaded cells and let the caller pick out
//! the ones that are already available.
//!
//! Everything here lives on the caller thread. Continuations attached with
//! [`Deferred::then`] run when the value settles (or immediately if it already
//! has), never while a borrow of the shared state is held.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::FrameError;

type Continuation<T> = Box<dyn FnOnce(Result<&T, &FrameError>)>;

enum State<T> {
    Pending(Vec<Continuation<T>>),
    Resolved(Rc<T>),
    Rejected(FrameError),
}

/// Consumer handle to a value that may not have arrived yet.
pub struct Deferred<T> {
    state: Rc<RefCell<State<T>>>,
}

/// Producer capability for a [`Deferred`].
pub struct Resolver<T> {
    state: Rc<RefCell<State<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: 'static> Deferred<T> {
    /// A new unsettled value together with the capability to settle it.
    pub fn pending() -> (Resolver<T>, Deferred<T>) {
        let state = Rc::new(RefCell::new(State::Pending(Vec::new())));
        (
            Resolver {
                state: Rc::clone(&state),
            },
            Deferred { state },
        )
    }

    /// An already resolved value.
    pub fn ready(value: T) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Resolved(Rc::new(value)))),
        }
    }

    /// An already rejected value.
    pub fn failed(err: FrameError) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Rejected(err))),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.borrow(), State::Pending(_))
    }

    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    /// The resolved value, shared.
    pub fn get(&self) -> Option<Rc<T>> {
        match &*self.state.borrow() {
            State::Resolved(value) => Some(Rc::clone(value)),
            _ => None,
        }
    }

    /// The rejection error, if the value was rejected.
    pub fn rejected(&self) -> Option<FrameError> {
        match &*self.state.borrow() {
            State::Rejected(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Run `f` once the value settles; immediately if it already has.
    pub fn then<F>(&self, f: F)
    where
        F: FnOnce(Result<&T, &FrameError>) + 'static,
    {
        let outcome = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                State::Pending(waiters) => {
                    waiters.push(Box::new(f));
                    return;
                }
                State::Resolved(value) => Ok(Rc::clone(value)),
                State::Rejected(err) => Err(err.clone()),
            }
        };
        match &outcome {
            Ok(value) => f(Ok(value.as_ref())),
            Err(err) => f(Err(err)),
        }
    }

    /// A new deferred holding `f` applied to this value; rejections pass through.
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: 'static,
        F: FnOnce(&T) -> U + 'static,
    {
        let (resolver, mapped) = Deferred::pending();
        self.then(move |outcome| match outcome {
            Ok(value) => {
                resolver.resolve(f(value));
            }
            Err(err) => {
                resolver.reject(err.clone());
            }
        });
        mapped
    }
}

impl<T: Clone + 'static> Deferred<T> {
    /// A copy of the resolved value, if any.
    pub fn resolved(&self) -> Option<T> {
        self.get().map(|value| value.as_ref().clone())
    }
}

impl<T> Resolver<T> {
    /// Settle with `value`. Returns false if the value was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(State::Resolved(Rc::new(value)))
    }

    /// Settle with `err`. Returns false if the value was already settled.
    pub fn reject(&self, err: FrameError) -> bool {
        self.settle(State::Rejected(err))
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.borrow(), State::Pending(_))
    }

    fn settle(&self, next: State<T>) -> bool {
        let (waiters, outcome) = {
            let mut state = self.state.borrow_mut();
            let waiters = match &mut *state {
                State::Pending(waiters) => std::mem::take(waiters),
                _ => return false,
            };
            let outcome = match &next {
                State::Resolved(value) => Ok(Rc::clone(value)),
                State::Rejected(err) => Err(err.clone()),
                State::Pending(_) => return false,
            };
            *state = next;
            (waiters, outcome)
        };
        for waiter in waiters {
            match &outcome {
                Ok(value) => waiter(Ok(value.as_ref())),
                Err(err) => waiter(Err(err)),
            }
        }
        true
    }
}

impl<T: fmt::Debug> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.borrow() {
            State::Pending(_) => f.write_str("Deferred(pending)"),
            State::Resolved(value) => f.debug_tuple("Deferred").field(value).finish(),
            State::Rejected(err) => write!(f, "Deferred(rejected: {})", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_resolve_is_observable_synchronously() {
        let (resolver, value) = Deferred::<i32>::pending();
        assert!(value.is_pending());
        assert_eq!(value.resolved(), None);
        assert!(resolver.resolve(7));
        assert_eq!(value.resolved(), Some(7));
        assert_eq!(value.rejected(), None);
    }

    #[test]
    fn test_second_settle_is_noop() {
        let (resolver, value) = Deferred::<i32>::pending();
        assert!(resolver.resolve(1));
        assert!(!resolver.resolve(2));
        assert!(!resolver.reject(FrameError::Cancelled));
        assert_eq!(value.resolved(), Some(1));

        let (resolver, value) = Deferred::<i32>::pending();
        assert!(resolver.reject(FrameError::decode("bad")));
        assert!(!resolver.resolve(3));
        assert_eq!(value.rejected(), Some(FrameError::decode("bad")));
        assert_eq!(value.resolved(), None);
    }

    #[test]
    fn test_then_runs_once_on_settle() {
        let (resolver, value) = Deferred::<i32>::pending();
        let seen = Rc::new(Cell::new(0));
        let seen_in = Rc::clone(&seen);
        value.then(move |outcome| {
            seen_in.set(seen_in.get() + *outcome.unwrap());
        });
        assert_eq!(seen.get(), 0);
        resolver.resolve(5);
        resolver.resolve(9);
        assert_eq!(seen.get(), 5);
    }

    #[test]
    fn test_then_after_settle_runs_immediately() {
        let value = Deferred::<i32>::failed(FrameError::Cancelled);
        let hit = Rc::new(Cell::new(false));
        let hit_in = Rc::clone(&hit);
        value.then(move |outcome| hit_in.set(outcome.is_err()));
        assert!(hit.get());
    }

    #[test]
    fn test_continuation_may_touch_same_value() {
        let (resolver, value) = Deferred::<i32>::pending();
        let again = value.clone();
        let resolver_in = resolver.clone();
        let observed = Rc::new(Cell::new(0));
        let observed_in = Rc::clone(&observed);
        value.then(move |_| {
            assert!(!resolver_in.resolve(100));
            observed_in.set(again.resolved().unwrap_or_default());
        });
        resolver.resolve(42);
        assert_eq!(observed.get(), 42);
    }

    #[test]
    fn test_map_propagates_rejection() {
        let (resolver, value) = Deferred::<i32>::pending();
        let doubled = value.map(|v| v * 2);
        let (resolver2, value2) = Deferred::<i32>::pending();
        let mapped2 = value2.map(|v| v + 1);
        resolver.resolve(21);
        resolver2.reject(FrameError::transport("worker gone"));
        assert_eq!(doubled.resolved(), Some(42));
        assert_eq!(
            mapped2.rejected(),
            Some(FrameError::transport("worker gone"))
        );
    }
}
