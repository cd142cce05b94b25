use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::authz::{with_platform_scope_on, with_tenant_scope_on, AuthzError, ScopedSession};
use crate::database::manager::DatabaseError;
use crate::database::store::{EntityStore, Record};
use crate::filter::filter_where::FilterWhere;
use crate::filter::{Filter, FilterData, FilterWhereOptions};
use crate::resource::{Resource, TableSpec};

/// Columns the repository owns. Clients may never write them.
pub const SYSTEM_FIELDS: &[&str] = &["id", "tenant_id", "created_at", "updated_at", "deleted_at"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeMode {
    /// Regular entity queries; an unscoped session is refused
    Tenant,
    /// Admin-facing queries; an unscoped platform admin sees every tenant
    Platform,
}

/// Data access for one resource on behalf of one scoped session.
///
/// Every query built here passes through the tenant scope exactly once, at
/// construction, before it reaches the store.
pub struct ScopedRepository<'a> {
    store: &'a dyn EntityStore,
    resource: Resource,
    table: TableSpec,
    session: &'a ScopedSession,
    mode: ScopeMode,
}

impl<'a> ScopedRepository<'a> {
    pub fn new(store: &'a dyn EntityStore, resource: Resource, session: &'a ScopedSession) -> Result<Self, DatabaseError> {
        Self::with_mode(store, resource, session, ScopeMode::Tenant)
    }

    /// Repository for explicitly admin-facing queries.
    pub fn platform(store: &'a dyn EntityStore, resource: Resource, session: &'a ScopedSession) -> Result<Self, DatabaseError> {
        Self::with_mode(store, resource, session, ScopeMode::Platform)
    }

    fn with_mode(store: &'a dyn EntityStore, resource: Resource, session: &'a ScopedSession, mode: ScopeMode) -> Result<Self, DatabaseError> {
        let table = resource
            .table()
            .ok_or_else(|| DatabaseError::NotFound(format!("{} is not a stored resource", resource)))?;
        Ok(Self { store, resource, table, session, mode })
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    fn scope(&self, data: FilterData) -> Result<FilterData, AuthzError> {
        match self.mode {
            ScopeMode::Tenant => with_tenant_scope_on(self.session, self.table.tenant_column, data),
            ScopeMode::Platform => with_platform_scope_on(self.session, self.table.tenant_column, data),
        }
    }

    fn compile(&self, data: FilterData, include_deleted: bool) -> Result<Filter, DatabaseError> {
        // Reject malformed client clauses before scoping nests them under $and
        if let Some(where_clause) = &data.where_clause {
            FilterWhere::validate(where_clause)?;
        }
        let scoped = self.scope(data)?;
        let mut filter = Filter::new(self.table.name)?;
        filter
            .options(FilterWhereOptions { soft_delete: self.table.soft_delete(), include_deleted })
            .assign(scoped)?;
        Ok(filter)
    }

    fn not_found(&self, id: &str) -> DatabaseError {
        // Same answer whether the row is missing or belongs to another tenant
        DatabaseError::NotFound(format!("{} record {} not found", self.resource, id))
    }

    pub async fn list(&self, data: FilterData) -> Result<Vec<Record>, DatabaseError> {
        self.store.select(&self.compile(data, false)?).await
    }

    pub async fn count(&self, data: FilterData) -> Result<i64, DatabaseError> {
        self.store.count(&self.compile(data, false)?).await
    }

    pub async fn find(&self, id: &str) -> Result<Option<Record>, DatabaseError> {
        let data = FilterData { limit: Some(1), ..FilterData::by_id(id) };
        Ok(self.store.select(&self.compile(data, false)?).await?.into_iter().next())
    }

    pub async fn get(&self, id: &str) -> Result<Record, DatabaseError> {
        self.find(id).await?.ok_or_else(|| self.not_found(id))
    }

    /// Insert a new row stamped with the session's tenant, a fresh id and timestamps.
    pub async fn create(&self, mut record: Record) -> Result<Record, DatabaseError> {
        reject_system_fields(&record)?;

        let id = Uuid::new_v4().to_string();
        let tenant_owned = self.table.tenant_column != "id";
        if tenant_owned {
            let tenant_id = self.session.tenant_id().ok_or(AuthzError::TenantRequired)?;
            record.insert(self.table.tenant_column.to_string(), json!(tenant_id));
        }

        let now = json!(Utc::now().to_rfc3339());
        record.insert("id".to_string(), json!(id));
        record.insert("created_at".to_string(), now.clone());
        record.insert("updated_at".to_string(), now);
        if self.table.soft_delete() {
            record.insert("deleted_at".to_string(), Value::Null);
        }

        let created = self.store.insert(self.table.name, record).await?;
        tracing::info!(
            resource = %self.resource,
            id = %id,
            tenant_id = ?self.session.tenant_id(),
            user_id = %self.session.session.user_id,
            "record created"
        );
        Ok(created)
    }

    pub async fn update(&self, id: &str, changes: Record) -> Result<Record, DatabaseError> {
        reject_system_fields(&changes)?;
        if changes.is_empty() {
            return Err(DatabaseError::InvalidRecord("No fields to update".to_string()));
        }
        self.write(id, changes).await
    }

    /// Soft tables get `deleted_at`; hard tables lose the row.
    pub async fn delete(&self, id: &str) -> Result<Record, DatabaseError> {
        let deleted = if self.table.soft_delete() {
            let mut changes = Record::new();
            changes.insert("deleted_at".to_string(), json!(Utc::now().to_rfc3339()));
            self.write(id, changes).await?
        } else {
            let filter = self.compile(FilterData::by_id(id), false)?;
            self.store.delete(&filter).await?.into_iter().next().ok_or_else(|| self.not_found(id))?
        };

        tracing::info!(
            resource = %self.resource,
            id,
            soft = self.table.soft_delete(),
            user_id = %self.session.session.user_id,
            "record deleted"
        );
        Ok(deleted)
    }

    /// Clear `deleted_at` on a soft-deleted row.
    pub async fn restore(&self, id: &str) -> Result<Record, DatabaseError> {
        if !self.table.soft_delete() {
            return Err(DatabaseError::InvalidRecord(format!("{} records cannot be restored", self.resource)));
        }

        let data = FilterData::with_where(json!({ "id": id, "deleted_at": { "$null": false } }));
        let filter = self.compile(data, true)?;
        let mut changes = Record::new();
        changes.insert("deleted_at".to_string(), Value::Null);
        changes.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        self.store
            .update(&filter, changes)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| self.not_found(id))
    }

    /// Field writes the repository performs itself (approval stamps, overrides).
    pub async fn set_fields(&self, id: &str, changes: Record) -> Result<Record, DatabaseError> {
        self.write(id, changes).await
    }

    /// Like `set_fields`, but only when the row still matches `condition`.
    /// `None` means nothing was written: the row is gone or no longer matches.
    pub async fn set_fields_if(&self, id: &str, condition: Value, changes: Record) -> Result<Option<Record>, DatabaseError> {
        let data = FilterData::with_where(json!({ "$and": [{ "id": id }, condition] }));
        self.write_matching(data, changes).await
    }

    async fn write(&self, id: &str, changes: Record) -> Result<Record, DatabaseError> {
        self.write_matching(FilterData::by_id(id), changes)
            .await?
            .ok_or_else(|| self.not_found(id))
    }

    async fn write_matching(&self, data: FilterData, mut changes: Record) -> Result<Option<Record>, DatabaseError> {
        changes
            .entry("updated_at".to_string())
            .or_insert_with(|| json!(Utc::now().to_rfc3339()));
        let filter = self.compile(data, false)?;
        Ok(self.store.update(&filter, changes).await?.into_iter().next())
    }
}

fn reject_system_fields(record: &Record) -> Result<(), DatabaseError> {
    match SYSTEM_FIELDS.iter().find(|f| record.contains_key(**f)) {
        Some(field) => Err(DatabaseError::InvalidRecord(format!("System field '{}' cannot be set via API", field))),
        None => Ok(()),
    }
}
