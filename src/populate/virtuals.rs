//! Virtual field evaluation.

use futures::future::try_join_all;
use serde_json::Value;

use crate::error::QueryResult;
use crate::hooks::Params;
use crate::normalize::normalize_virtuals;
use crate::request::Projection;
use crate::schema::{Entity, VirtualValue};

/// Evaluate the virtual fields `projection` asks for on every row.
///
/// Virtuals run in declaration order so one may read another declared
/// before it. Within one virtual, pending transforms run concurrently and
/// each result lands on the row it came from.
pub async fn populate_virtuals(
    entity: &Entity,
    projection: &Projection,
    rows: &mut [Value],
    params: &Params,
) -> QueryResult<()> {
    for name in normalize_virtuals(entity, projection) {
        let Some(field) = entity.virtual_field(&name) else {
            continue;
        };

        let mut pending = Vec::new();
        for (index, row) in rows.iter_mut().enumerate() {
            let Some(object) = row.as_object_mut() else {
                continue;
            };
            match field.evaluate(object, params) {
                VirtualValue::Ready(value) => {
                    object.insert(name.clone(), value);
                }
                VirtualValue::Pending(future) => {
                    pending.push(async move { future.await.map(|value| (index, value)) });
                }
            }
        }

        for (index, value) in try_join_all(pending).await? {
            if let Some(object) = rows[index].as_object_mut() {
                object.insert(name.clone(), value);
            }
        }
    }
    Ok(())
}
