//! Thread-based actor runtime.
//!
//! A [`Framework`] hosts user-defined actors, routes typed messages between
//! them, and executes their handlers on a managed pool of worker threads.
//! Each actor owns a mailbox with a unique [`Address`], processes one message
//! at a time in FIFO order, and communicates only by asynchronous message
//! passing.
//!
//! ```no_run
//! use aviary::{Actor, Framework, Handlers, Parameters, Receiver};
//!
//! struct Echo;
//!
//! impl Actor for Echo {
//!     fn configure(handlers: &mut Handlers<Self>) {
//!         handlers.on::<i32>(|_echo, value, from, ctx| {
//!             ctx.send(value + 1, from);
//!         });
//!     }
//! }
//!
//! let framework = Framework::with_parameters(Parameters::with_threads(2)).unwrap();
//! let echo = framework.register(Echo, None).unwrap();
//! let receiver = Receiver::<i32>::new(&framework).unwrap();
//!
//! framework.send(7, receiver.address(), echo.address());
//! let (reply, _from) = receiver.wait();
//! assert_eq!(reply, 8);
//! ```

pub mod actor;
pub mod address;
pub mod counters;
pub mod endpoint;
pub mod error;
pub mod fallback;
pub mod framework;
pub mod logging;
pub mod receiver;

mod allocator;
mod directory;
mod mailbox;
mod message;
mod registry;
mod scheduler;

pub use actor::{Actor, ActorHandle, Context, Handlers};
pub use address::Address;
pub use counters::Counter;
pub use endpoint::{Endpoint, WireMessage};
pub use error::{RegistrationError, SystemError};
pub use fallback::FallbackHandler;
pub use framework::{Framework, Parameters};
pub use receiver::Receiver;
pub use scheduler::yields::YieldStrategy;
