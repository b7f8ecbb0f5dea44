//! Forwarding worker - the unprivileged half of the appliance

mod devices;
mod dispatcher;
mod main_loop;

use crate::forwarder::LinkEvent;

pub use main_loop::run_worker;

/// Everything the worker's main thread reacts to
#[derive(Debug)]
pub enum WorkerEvent {
    /// A terminating signal, as its number
    Signal(i32),
    Link(LinkEvent),
}

impl From<LinkEvent> for WorkerEvent {
    fn from(event: LinkEvent) -> Self {
        WorkerEvent::Link(event)
    }
}
