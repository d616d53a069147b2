//! Fetch engine
//!
//! Turns the scalar and column OIDs of a device into a [`ResultValueStore`].
//! Scalars are fetched with batched gets. Columns are walked in batches with
//! get-bulk or get-next, chosen per batch from the device's [`BulkCapability`].

mod column;
mod scalar;
pub mod valuestore;


pub use column::{fetch_column_oids, WalkStrategy};
pub use scalar::{fetch_scalar_oids, fetch_scalar_oids_with_batching};
pub use valuestore::{
    ColumnResultValues, ResultValue, ResultValueStore, ScalarResultValues, StoredValue,
    SubmissionType,
};

use crate::error::FetchError;
use crate::session::{Session, SnmpVersion};
use tracing::debug;

/// What the fetch engine has learned about a device's get-bulk support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BulkCapability {
    #[default]
    Unknown,
    Supported,
    Unsupported,
}

/// Batching knobs
#[derive(Debug, Clone, Copy)]
pub struct FetchConfig {
    pub oid_batch_size: usize,
    pub column_batch_size: usize,
    pub bulk_max_repetitions: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            oid_batch_size: 5,
            column_batch_size: 5,
            bulk_max_repetitions: 10,
        }
    }
}

/// Fetch every scalar and column OID.
///
/// Failed batches are dropped and returned next to the partial store.
pub async fn fetch_values(
    session: &dyn Session,
    scalar_oids: &[String],
    column_oids: &[String],
    config: &FetchConfig,
    capability: &mut BulkCapability,
) -> (ResultValueStore, Vec<FetchError>) {
    let (scalar_values, mut errors) =
        fetch_scalar_oids_with_batching(session, scalar_oids, config.oid_batch_size).await;

    let (column_values, column_errors) =
        fetch_column_oids_with_batching(session, column_oids, config, capability).await;
    errors.extend(column_errors);

    (
        ResultValueStore {
            scalar_values,
            column_values,
        },
        errors,
    )
}

/// Walk columns batch by batch, falling back from bulk to get-next.
///
/// Bulk failing where get-next succeeds, with no bulk success seen before,
/// marks the device `Unsupported`. Both failing leaves the capability alone
/// and drops the batch.
pub async fn fetch_column_oids_with_batching(
    session: &dyn Session,
    oids: &[String],
    config: &FetchConfig,
    capability: &mut BulkCapability,
) -> (ColumnResultValues, Vec<FetchError>) {
    let mut values = ColumnResultValues::new();
    let mut errors = Vec::new();

    for batch in oids.chunks(config.column_batch_size.max(1)) {
        let use_bulk =
            session.version() != SnmpVersion::V1 && *capability != BulkCapability::Unsupported;

        let result = if use_bulk {
            match fetch_column_oids(session, batch, config.bulk_max_repetitions, WalkStrategy::GetBulk)
                .await
            {
                Ok(batch_values) => {
                    *capability = BulkCapability::Supported;
                    Ok(batch_values)
                }
                Err(bulk_err) => {
                    debug!(error = %bulk_err, "GetBulk failed, falling back to GetNext");
                    let fallback = fetch_column_oids(
                        session,
                        batch,
                        config.bulk_max_repetitions,
                        WalkStrategy::GetNext,
                    )
                    .await;
                    if fallback.is_ok() && *capability == BulkCapability::Unknown {
                        debug!("Marking device as not supporting GetBulk");
                        *capability = BulkCapability::Unsupported;
                    }
                    fallback
                }
            }
        } else {
            fetch_column_oids(session, batch, config.bulk_max_repetitions, WalkStrategy::GetNext)
                .await
        };

        match result {
            Ok(batch_values) => {
                for (column, rows) in batch_values {
                    values.entry(column).or_default().extend(rows);
                }
            }
            Err(e) => {
                debug!(error = %e, oids = ?batch, "Dropping column batch");
                errors.push(e);
            }
        }
    }
    (values, errors)
}
