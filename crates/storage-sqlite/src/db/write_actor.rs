//! Dedicated write actor: all mutations funnel through one connection,
//! each job wrapped in an immediate transaction. Callers get the result
//! back over a oneshot channel, so write completion is awaitable without
//! tying storage to any UI event loop.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::error;
use tokio::sync::{mpsc, oneshot};

use comanda_core::{DatabaseError, Error, Result};

use crate::errors::StorageError;

use super::DbPool;

type WriteJob = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

/// Cloneable handle to the write actor.
#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::UnboundedSender<WriteJob>,
}

/// Spawn the writer thread. It exits when every `WriteHandle` is dropped.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriteJob>();

    std::thread::Builder::new()
        .name("comanda-db-writer".to_string())
        .spawn(move || {
            while let Some(job) = rx.blocking_recv() {
                match pool.get() {
                    Ok(mut conn) => job(&mut conn),
                    // Dropping the job drops its oneshot sender; the caller
                    // observes a writer error instead of hanging.
                    Err(err) => error!("[Storage] Writer could not get a connection: {}", err),
                }
            }
        })
        .expect("Failed to spawn database writer thread");

    WriteHandle { tx }
}

impl WriteHandle {
    /// Run `job` inside a single immediate transaction on the writer
    /// connection. The transaction commits only if the job returns `Ok`;
    /// any error rolls back every statement the job issued.
    pub async fn exec<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel::<Result<T>>();

        let wrapped: WriteJob = Box::new(move |conn| {
            let mut outcome: Option<Result<T>> = None;
            let tx_result = conn.immediate_transaction::<_, diesel::result::Error, _>(|tx| {
                match job(tx) {
                    Ok(value) => {
                        outcome = Some(Ok(value));
                        Ok(())
                    }
                    Err(err) => {
                        outcome = Some(Err(err));
                        Err(diesel::result::Error::RollbackTransaction)
                    }
                }
            });

            let result = match (tx_result, outcome) {
                (Ok(()), Some(Ok(value))) => Ok(value),
                (_, Some(Err(err))) => Err(err),
                (Err(err), _) => Err(Error::from(StorageError::from(err))),
                (Ok(()), None) => Err(Error::Database(DatabaseError::Internal(
                    "Write job committed without producing a result".to_string(),
                ))),
            };
            let _ = done_tx.send(result);
        });

        self.tx.send(wrapped).map_err(|_| {
            Error::Database(DatabaseError::Internal(
                "Database writer is not running".to_string(),
            ))
        })?;

        done_rx.await.map_err(|_| {
            Error::Database(DatabaseError::Internal(
                "Database writer dropped the job".to_string(),
            ))
        })?
    }
}
