//! Per-type lifecycle events fired by object providers.

use crate::domain::{DataRow, InfoObject, ObjectType, WhereCondition};

use super::handler::EventHandler;

/// Single-object operations (`Insert`, `Update`, `Delete`).
#[derive(Debug, Clone)]
pub struct ObjectEventArgs {
    pub object: InfoObject,
}

/// `BulkUpdate` / `BulkDelete`: the filter and, for updates, the explicit
/// list of changed columns when the caller supplied one.
#[derive(Debug, Clone)]
pub struct BulkEventArgs {
    pub object_type: ObjectType,
    pub where_condition: WhereCondition,
    pub changed_columns: Option<Vec<String>>,
    /// Rows affected; set by the provider before `After` runs.
    pub affected: u64,
}

#[derive(Debug, Clone)]
pub struct BulkInsertEventArgs {
    pub object_type: ObjectType,
    pub objects: Vec<InfoObject>,
}

/// `GetData`: rows loaded from the store on a cache miss. Subscribers may
/// filter or augment them before they are cached.
#[derive(Debug, Clone)]
pub struct DataEventArgs {
    pub object_type: ObjectType,
    pub where_condition: WhereCondition,
    pub rows: Vec<DataRow>,
}

#[derive(Debug, Clone)]
pub struct PermissionEventArgs {
    pub object: InfoObject,
    pub permission: String,
    pub user: String,
    pub allowed: bool,
}

/// Identity used by the recursion guard of single-object events.
pub fn object_recursion_key(object: &InfoObject) -> Option<String> {
    let identity = object
        .id()
        .map(|id| id.to_string())
        .or_else(|| object.guid().map(|guid| guid.to_string()))
        .or_else(|| object.code_name().map(str::to_lowercase))?;
    Some(format!("{}:{identity}", object.object_type().key()))
}

/// The full set of event handlers owned by one type's provider.
pub struct ObjectEvents {
    pub insert: EventHandler<ObjectEventArgs>,
    pub update: EventHandler<ObjectEventArgs>,
    pub delete: EventHandler<ObjectEventArgs>,
    pub get_data: EventHandler<DataEventArgs>,
    pub check_permissions: EventHandler<PermissionEventArgs>,
    pub bulk_insert: EventHandler<BulkInsertEventArgs>,
    pub bulk_update: EventHandler<BulkEventArgs>,
    pub bulk_delete: EventHandler<BulkEventArgs>,
}

impl ObjectEvents {
    pub fn new(object_type: &ObjectType) -> Self {
        let scope = object_type.key();
        Self {
            insert: EventHandler::new("Insert", scope)
                .with_recursion_key(|args: &ObjectEventArgs| object_recursion_key(&args.object)),
            update: EventHandler::new("Update", scope)
                .with_recursion_key(|args: &ObjectEventArgs| object_recursion_key(&args.object)),
            delete: EventHandler::new("Delete", scope)
                .with_recursion_key(|args: &ObjectEventArgs| object_recursion_key(&args.object)),
            get_data: EventHandler::new("GetData", scope),
            check_permissions: EventHandler::new("CheckPermissions", scope),
            bulk_insert: EventHandler::new("BulkInsert", scope),
            bulk_update: EventHandler::new("BulkUpdate", scope),
            bulk_delete: EventHandler::new("BulkDelete", scope),
        }
    }

    /// Drop every subscriber of every event.
    pub fn clear(&self) {
        self.insert.clear();
        self.update.clear();
        self.delete.clear();
        self.get_data.clear();
        self.check_permissions.clear();
        self.bulk_insert.clear();
        self.bulk_update.clear();
        self.bulk_delete.clear();
    }
}
