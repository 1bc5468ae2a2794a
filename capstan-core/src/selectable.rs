//! The reactor participant abstraction.

use std::os::unix::io::RawFd;

/// A participant in the reactor's readiness loop.
///
/// The reactor calls `reading`/`writing`/`closed` before every wait; they
/// must be cheap. `readable`/`writable` are invoked only when the OS reports
/// readiness. Once `closed` returns true the reactor unregisters the
/// participant, calls `removed` exactly once, and drops it — dropping is
/// what releases the file descriptor.
pub trait Selectable {
    /// The file descriptor to poll.
    fn fd(&self) -> RawFd;

    /// Interested in read readiness?
    fn reading(&mut self) -> bool;

    /// Interested in write readiness?
    fn writing(&mut self) -> bool;

    /// The descriptor is readable.
    fn readable(&mut self);

    /// The descriptor is writable.
    fn writable(&mut self);

    /// Done; may be removed from the reactor.
    fn closed(&mut self) -> bool;

    /// About to be dropped by the reactor.
    fn removed(&mut self);
}
