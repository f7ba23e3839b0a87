/// Unit of work submitted to the engine's execution context.
pub type DispatchWork = Box<dyn FnOnce() + Send + 'static>;

/// Marshals non-real-time work onto the engine's execution context.
///
/// `dispatch_async` returns immediately. `dispatch_sync` returns after the
/// work has run. Calling `dispatch_sync` from a real-time audio callback
/// risks priority inversion; that is the caller's responsibility.
pub trait DispatchBridge: Send + Sync {
    fn dispatch_async(&self, work: DispatchWork);

    fn dispatch_sync(&self, work: DispatchWork);
}
