use super::valuestore::{result_to_scalar_values, ScalarResultValues};
use crate::error::{FetchError, SessionError};
use crate::session::{Session, SnmpValue, VarBind};
use std::collections::HashMap;
use tracing::debug;

/// Fetch scalars in batches of `batch_size`.
///
/// A failed batch is dropped and reported; the other batches still count.
pub async fn fetch_scalar_oids_with_batching(
    session: &dyn Session,
    oids: &[String],
    batch_size: usize,
) -> (ScalarResultValues, Vec<FetchError>) {
    let mut values = ScalarResultValues::new();
    let mut errors = Vec::new();
    for batch in oids.chunks(batch_size.max(1)) {
        match fetch_scalar_oids(session, batch).await {
            Ok(batch_values) => values.extend(batch_values),
            Err(e) => {
                debug!(error = %e, oids = ?batch, "Dropping scalar batch");
                errors.push(e);
            }
        }
    }
    (values, errors)
}

/// One batch, with the `.0` retry for instance-less scalar OIDs
pub async fn fetch_scalar_oids(
    session: &dyn Session,
    oids: &[String],
) -> Result<ScalarResultValues, FetchError> {
    let varbinds = do_fetch_scalar_oids(session, oids).await?;
    let mut values = result_to_scalar_values(&varbinds);
    retry_failed_scalar_oids(session, &varbinds, &mut values).await;
    Ok(values)
}

/// Issue a get, dropping OIDs the agent reports as noSuchName until it succeeds
async fn do_fetch_scalar_oids(
    session: &dyn Session,
    oids: &[String],
) -> Result<Vec<VarBind>, FetchError> {
    let mut oids = oids.to_vec();
    loop {
        if oids.is_empty() {
            return Ok(Vec::new());
        }
        match session.get(&oids).await {
            Ok(varbinds) => return Ok(varbinds),
            Err(SessionError::NoSuchName { index }) => {
                if index == 0 || index > oids.len() {
                    return Err(FetchError::InvalidErrorIndex { index, oids });
                }
                let removed = oids.remove(index - 1);
                debug!(oid = %removed, "Agent reported noSuchName, retrying without it");
            }
            Err(e) => return Err(FetchError::Scalar(e)),
        }
    }
}

async fn retry_failed_scalar_oids(
    session: &dyn Session,
    varbinds: &[VarBind],
    values: &mut ScalarResultValues,
) {
    let retry: HashMap<String, String> = varbinds
        .iter()
        .filter(|vb| matches!(vb.value, SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance))
        .map(|vb| crate::oid::normalize(&vb.oid).to_string())
        .filter(|oid| !oid.ends_with(".0"))
        .map(|oid| {
            let with_instance = format!("{}.0", oid);
            (oid, with_instance)
        })
        .collect();
    if retry.is_empty() {
        return;
    }

    let mut fetch: Vec<String> = retry.values().cloned().collect();
    fetch.sort_by(|a, b| crate::oid::compare(a, b));
    let retried = match do_fetch_scalar_oids(session, &fetch).await {
        Ok(varbinds) => result_to_scalar_values(&varbinds),
        Err(e) => {
            debug!(error = %e, "Failed to retry scalar oids with `.0` suffix");
            return;
        }
    };
    for (initial, actual) in retry {
        if let Some(value) = retried.get(&actual) {
            values.insert(initial, value.clone());
        }
    }
}
