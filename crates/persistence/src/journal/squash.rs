//! Squashing a record's pending changes into a single change.
//!
//! Entries are folded left to right with [`merge`]:
//!
//! | first           | second | result                                      |
//! |-----------------|--------|---------------------------------------------|
//! | Update          | Update | Update, patches merged by `(op, path)`      |
//! | Insert          | Update | Insert, patch applied to the snapshot       |
//! | Insert          | Delete | NoOp                                        |
//! | Update / Delete | Delete | Delete                                      |
//! | any             | Insert | Insert with the second snapshot             |
//! | Delete / NoOp   | Update | error                                       |
//! | NoOp            | Delete | NoOp                                        |
//! | any             | NoOp   | first, unchanged                            |

use crate::error::{LocalChangeError, StorageResult};

use super::entry::{LocalChange, LocalChangeKind};
use super::serializer::ResourceSerializer;

/// Reduces the changes of one record to a single equivalent change.
///
/// Changes are ordered by timestamp before folding. The result carries the
/// ids of every input entry and the timestamp of the last one.
pub fn squash<I>(changes: I, serializer: &dyn ResourceSerializer) -> StorageResult<LocalChange>
where
    I: IntoIterator<Item = LocalChange>,
{
    let mut changes: Vec<LocalChange> = changes.into_iter().collect();
    changes.sort_by_key(|change| change.timestamp);

    let mut changes = changes.into_iter();
    let first = changes
        .next()
        .ok_or_else(|| LocalChangeError::invalid("Cannot squash an empty list of local changes"))?;

    changes.try_fold(first, |acc, next| merge(acc, next, serializer))
}

/// Merges two consecutive changes of the same record.
pub fn merge(
    first: LocalChange,
    second: LocalChange,
    serializer: &dyn ResourceSerializer,
) -> StorageResult<LocalChange> {
    use LocalChangeKind::*;

    if first.record_key != second.record_key {
        return Err(LocalChangeError::invalid(format!(
            "Record keys {} and {} do not match",
            first.record_key, second.record_key
        ))
        .into());
    }

    let (kind, payload, version_token) = match (first.kind, second.kind) {
        (_, Insert) => (Insert, second.payload, second.version_token),
        (Update, Update) => {
            let merged = first.patch()?.merge(second.patch()?);
            (Update, merged.to_json_string()?, first.version_token)
        }
        (Insert, Update) => {
            let snapshot = serializer.parse(&first.payload)?;
            let patched = second.patch()?.apply(&snapshot)?;
            (Insert, serializer.serialize(&patched)?, first.version_token)
        }
        (Insert, Delete) | (NoOp, Delete) => (NoOp, String::new(), first.version_token),
        (Update, Delete) | (Delete, Delete) => (Delete, String::new(), first.version_token),
        (Delete, Update) => {
            return Err(LocalChangeError::invalid(
                "Cannot merge local changes with type DELETE and UPDATE",
            )
            .into());
        }
        (NoOp, Update) => {
            return Err(LocalChangeError::invalid(
                "Cannot merge an UPDATE into changes that cancel out",
            )
            .into());
        }
        (kind, NoOp) => (kind, first.payload, first.version_token),
    };

    let mut token = first.token;
    token.extend(&second.token);

    Ok(LocalChange {
        token,
        record_key: second.record_key,
        resource_type: second.resource_type,
        logical_id: second.logical_id,
        kind,
        payload,
        version_token,
        timestamp: second.timestamp,
    })
}
