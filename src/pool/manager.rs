use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bb8::ManageConnection;
use tracing::{debug, warn};

use crate::driver::Driver;
use crate::error::PolyDbError;

/// A driver client stamped with the pool serial current when it was opened.
///
/// Dropping it closes the client through the driver.
pub struct Stamped<D: Driver> {
    client: Option<D::Client>,
    serial: u64,
    driver: Arc<D>,
}

impl<D: Driver> Stamped<D> {
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// # Errors
    /// Fails only if the client was already closed.
    pub fn client_mut(&mut self) -> Result<&mut D::Client, PolyDbError> {
        self.client
            .as_mut()
            .ok_or_else(|| PolyDbError::ConnectionError("client already closed".into()))
    }
}

impl<D: Driver> Drop for Stamped<D> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.driver.close(client);
        }
    }
}

/// bb8 manager creating driver clients and retiring the ones opened under an old serial.
pub struct PoolManager<D: Driver> {
    pub(crate) name: String,
    pub(crate) driver: Arc<D>,
    pub(crate) serial: Arc<AtomicU64>,
}

impl<D: Driver> Clone for PoolManager<D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            driver: Arc::clone(&self.driver),
            serial: Arc::clone(&self.serial),
        }
    }
}

impl<D: Driver> PoolManager<D> {
    #[must_use]
    pub fn new(name: impl Into<String>, driver: D) -> Self {
        Self {
            name: name.into(),
            driver: Arc::new(driver),
            serial: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn current_serial(&self) -> u64 {
        self.serial.load(Ordering::Acquire)
    }

    /// Invalidate every client opened so far.
    pub fn bump_serial(&self) -> u64 {
        self.serial.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) async fn open(&self) -> Result<Stamped<D>, PolyDbError> {
        let serial = self.current_serial();
        let client = self.driver.connect().await?;
        debug!("pool: open {} #{serial}", self.name);
        Ok(Stamped {
            client: Some(client),
            serial,
            driver: Arc::clone(&self.driver),
        })
    }
}

impl<D: Driver> ManageConnection for PoolManager<D> {
    type Connection = Stamped<D>;
    type Error = PolyDbError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        async move { self.open().await }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            if conn.serial != self.current_serial() {
                return Err(PolyDbError::ConnectionError(format!(
                    "{}: stale client #{}",
                    self.name, conn.serial
                )));
            }
            let driver = Arc::clone(&self.driver);
            driver.ping(conn.client_mut()?).await
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        let current = self.current_serial();
        if conn.serial != current {
            warn!("pool: destroy {} #{} (current #{current})", self.name, conn.serial);
            return true;
        }
        false
    }
}
