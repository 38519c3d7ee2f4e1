mod acceptor;
pub mod execution;
pub mod instance;
pub mod message;
pub mod participant;
pub mod peers;
pub mod proof;
pub mod quorum;
pub mod recovery;
pub mod round;
pub mod store;
#[cfg(test)]
mod testkit;

pub use execution::*;
pub use instance::*;
pub use message::*;
pub use participant::*;
pub use peers::*;
pub use proof::*;
pub use quorum::*;
pub use recovery::*;
pub use round::*;
pub use store::*;
