use crate::adapt::AdaptersMap;
use crate::connection::BaseConnection;
use crate::generators::PqGen;
use crate::{CoConnection, Connection, Error};
use std::sync::Arc;

mod private {
    pub trait Sealed {}
}

/// A trait allowing abstraction over thread and coroutine connections.
///
/// Cursors and transaction blocks work with any `GenericConnection`.
///
/// This trait is "sealed", and cannot be implemented outside of this crate.
pub trait GenericConnection: private::Sealed {
    /// Runs an operation holding the connection lock, waiting for the
    /// socket the way the connection does.
    #[doc(hidden)]
    fn run<G>(&self, gen: G) -> Result<G::Output, Error>
    where
        G: PqGen<BaseConnection>;

    /// Runs `f` holding the connection lock.
    #[doc(hidden)]
    fn with_base<R>(&self, f: impl FnOnce(&mut BaseConnection) -> R) -> R;

    /// The adapters of the connection.
    fn adapters(&self) -> Arc<AdaptersMap> {
        self.with_base(|base| base.adapters.clone())
    }
}

impl private::Sealed for Connection {}

impl private::Sealed for CoConnection {}
