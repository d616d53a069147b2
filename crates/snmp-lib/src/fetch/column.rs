use super::valuestore::{ColumnResultValues, ResultValue};
use crate::error::FetchError;
use crate::session::{Session, VarBind};
use std::collections::{HashMap, HashSet};

/// Request primitive used to advance a walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStrategy {
    GetBulk,
    GetNext,
}

/// Walk one batch of columns until every column has left its subtree.
///
/// The next OID of each column is the last row it returned. An OID that has
/// already been requested in this walk is never requested again, which stops
/// agents that keep echoing their last row.
pub async fn fetch_column_oids(
    session: &dyn Session,
    oids: &[String],
    max_repetitions: u32,
    strategy: WalkStrategy,
) -> Result<ColumnResultValues, FetchError> {
    let mut returned = ColumnResultValues::new();
    let mut already_processed: HashSet<String> = HashSet::new();
    let mut cur: HashMap<String, String> = oids
        .iter()
        .map(|oid| {
            let oid = crate::oid::normalize(oid).to_string();
            (oid.clone(), oid)
        })
        .collect();

    while !cur.is_empty() {
        let mut pending: Vec<(String, String)> = cur.into_iter().collect();
        pending.sort_by(|a, b| crate::oid::compare(&a.0, &b.0));

        let mut columns = Vec::with_capacity(pending.len());
        let mut request = Vec::with_capacity(pending.len());
        for (column, next) in pending {
            if !already_processed.insert(next.clone()) {
                continue;
            }
            columns.push(column);
            request.push(next);
        }
        if request.is_empty() {
            break;
        }

        let varbinds = get_results(session, &request, max_repetitions, strategy).await?;
        let (values, next) = result_to_column_values(&columns, &varbinds);
        for (column, rows) in values {
            returned.entry(column).or_default().extend(rows);
        }
        cur = next;
    }
    Ok(returned)
}

async fn get_results(
    session: &dyn Session,
    oids: &[String],
    max_repetitions: u32,
    strategy: WalkStrategy,
) -> Result<Vec<VarBind>, FetchError> {
    match strategy {
        WalkStrategy::GetNext => session.get_next(oids).await.map_err(FetchError::GetNext),
        WalkStrategy::GetBulk => session
            .get_bulk(oids, max_repetitions)
            .await
            .map_err(FetchError::GetBulk),
    }
}

/// Split a response into rows and the next OID to request per column
fn result_to_column_values(
    columns: &[String],
    varbinds: &[VarBind],
) -> (ColumnResultValues, HashMap<String, String>) {
    let mut values = ColumnResultValues::new();
    let mut next = HashMap::new();
    if columns.is_empty() {
        return (values, next);
    }

    for (i, vb) in varbinds.iter().enumerate() {
        let Some(value) = ResultValue::from_snmp(&vb.value) else {
            continue;
        };
        let column = &columns[i % columns.len()];
        let oid = crate::oid::normalize(&vb.oid);
        let rows = values.entry(column.clone()).or_default();
        match crate::oid::index_suffix(column, oid) {
            Some(index) => {
                rows.insert(index.to_string(), value);
                next.insert(column.clone(), oid.to_string());
            }
            None => {
                next.remove(column);
            }
        }
    }
    values.retain(|_, rows| !rows.is_empty());
    (values, next)
}
