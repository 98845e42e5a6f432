//! SQLite persistence for projects, variants, feedback, transcripts and
//! generated files.
//!
//! Every operation propagates the underlying error as-is; there is no retry
//! and no fallback. Approval is a clear-then-set inside one transaction,
//! backed by a partial unique index allowing one approved variant per project.

mod records;

pub use records::{
    FileType, GeneratedFile, MessageRecord, NewGeneratedFile, NewProject, Project, ProjectUpdate,
    VariantRecord,
};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::agent::Message;
use crate::session::{FeedbackItem, Phase, ProjectSession, TurnOutcome, Variant, VariantStore};
use records::{
    FEEDBACK_COLUMNS, FILE_COLUMNS, MESSAGE_COLUMNS, PROJECT_COLUMNS, VARIANT_COLUMNS,
    feedback_from_row, file_from_row, message_from_row, project_from_row, tool_payload,
    variant_from_row,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Database lock poisoned")]
    Poisoned,
}

impl StoreError {
    fn not_found(entity: &'static str, id: &str) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

const SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        user_id TEXT,
        name TEXT NOT NULL,
        description TEXT,
        phase TEXT NOT NULL DEFAULT 'describe'
            CHECK (phase IN ('describe', 'prototype', 'iterate', 'build', 'export')),
        design_brief TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS variants (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        variant_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        focus_area TEXT NOT NULL
            CHECK (focus_area IN ('layout', 'hierarchy', 'density', 'interaction', 'expression')),
        code TEXT NOT NULL,
        rationale TEXT NOT NULL DEFAULT '',
        is_approved INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        UNIQUE (project_id, variant_id)
    );

    -- At most one approved variant per project
    CREATE UNIQUE INDEX IF NOT EXISTS variants_one_approved
        ON variants(project_id) WHERE is_approved = 1;

    -- Feedback refers to the variant by its short id, so it survives a batch replace
    CREATE TABLE IF NOT EXISTS feedback (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        variant_id TEXT NOT NULL,
        element_selector TEXT,
        comment TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        role TEXT NOT NULL CHECK (role IN ('system', 'user', 'assistant', 'tool')),
        content TEXT,
        tool_calls TEXT,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS generated_files (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        path TEXT NOT NULL,
        content TEXT NOT NULL,
        file_type TEXT NOT NULL
            CHECK (file_type IN ('component', 'api', 'database', 'util', 'config')),
        created_at TEXT NOT NULL,
        UNIQUE (project_id, path)
    );

    CREATE INDEX IF NOT EXISTS idx_variants_project ON variants(project_id);
    CREATE INDEX IF NOT EXISTS idx_feedback_project ON feedback(project_id);
    CREATE INDEX IF NOT EXISTS idx_messages_project ON messages(project_id);
    CREATE INDEX IF NOT EXISTS idx_generated_files_project ON generated_files(project_id);
"#;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if path.as_os_str() == ":memory:" {
            return Self::open_in_memory();
        }
        debug!("Opening project store at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // Projects

    /// Most recently updated first.
    pub fn list_projects(&self, user_id: Option<&str>) -> StoreResult<Vec<Project>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM projects WHERE (?1 IS NULL OR user_id = ?1) ORDER BY updated_at DESC",
            PROJECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], project_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_project(&self, id: &str) -> StoreResult<Project> {
        get_project(&*self.conn()?, id)
    }

    pub fn create_project(&self, new: &NewProject) -> StoreResult<Project> {
        let conn = self.conn()?;
        let id = new
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();

        conn.execute(
            "INSERT INTO projects (id, user_id, name, description, phase, design_brief, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id,
                new.user_id,
                new.name,
                new.description,
                Phase::Describe.as_str(),
                new.design_brief,
                now
            ],
        )?;
        debug!("Created project {} ({})", id, new.name);

        get_project(&conn, &id)
    }

    /// Fetch a project, creating it with `name` when the id is unknown.
    pub fn get_or_create_project(&self, id: &str, name: &str) -> StoreResult<Project> {
        match self.get_project(id) {
            Err(e) if e.is_not_found() => self.create_project(&NewProject {
                id: Some(id.to_string()),
                ..NewProject::named(name)
            }),
            other => other,
        }
    }

    pub fn update_project(&self, id: &str, update: &ProjectUpdate) -> StoreResult<Project> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE projects SET
                name = COALESCE(?2, name),
                description = COALESCE(?3, description),
                phase = COALESCE(?4, phase),
                design_brief = COALESCE(?5, design_brief),
                updated_at = ?6
             WHERE id = ?1",
            params![
                id,
                update.name,
                update.description,
                update.phase.map(|p| p.as_str()),
                update.design_brief,
                Utc::now()
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("Project", id));
        }

        get_project(&conn, id)
    }

    pub fn update_project_phase(&self, id: &str, phase: Phase) -> StoreResult<()> {
        update_project_phase(&*self.conn()?, id, phase)
    }

    /// Delete a project and, through the foreign keys, everything it owns.
    pub fn delete_project(&self, id: &str) -> StoreResult<()> {
        let changed = self
            .conn()?
            .execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::not_found("Project", id));
        }
        Ok(())
    }

    // Variants

    pub fn get_variants(&self, project_id: &str) -> StoreResult<Vec<VariantRecord>> {
        get_variants(&*self.conn()?, project_id)
    }

    pub fn get_variant(&self, project_id: &str, variant_id: &str) -> StoreResult<VariantRecord> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM variants WHERE project_id = ?1 AND variant_id = ?2",
            VARIANT_COLUMNS
        );
        conn.query_row(&sql, params![project_id, variant_id], variant_from_row)
            .optional()?
            .ok_or_else(|| StoreError::not_found("Variant", variant_id))
    }

    pub fn create_variant(&self, project_id: &str, variant: &Variant) -> StoreResult<VariantRecord> {
        let conn = self.conn()?;
        insert_variant(&conn, project_id, variant)?;
        drop(conn);
        self.get_variant(project_id, variant.id.as_str())
    }

    /// Insert, or overwrite the variant with the same short id.
    pub fn upsert_variant(&self, project_id: &str, variant: &Variant) -> StoreResult<VariantRecord> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO variants (id, project_id, variant_id, name, description, focus_area, code, rationale, is_approved, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)
             ON CONFLICT (project_id, variant_id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                focus_area = excluded.focus_area,
                code = excluded.code,
                rationale = excluded.rationale",
            params![
                Uuid::new_v4().to_string(),
                project_id,
                variant.id.as_str(),
                variant.name,
                variant.description,
                variant.focus_area.as_str(),
                variant.code,
                variant.rationale,
                Utc::now()
            ],
        )?;
        drop(conn);
        self.get_variant(project_id, variant.id.as_str())
    }

    /// Swap the project's variants for a new batch, keeping their approval flags.
    pub fn replace_variants(&self, project_id: &str, variants: &[Variant]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        replace_variants(&tx, project_id, variants)?;
        tx.commit()?;
        Ok(())
    }

    /// Make `variant_id` the project's only approved variant.
    pub fn approve_variant(&self, project_id: &str, variant_id: &str) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        approve_variant(&tx, project_id, variant_id)?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_variants(&self, project_id: &str) -> StoreResult<usize> {
        Ok(self
            .conn()?
            .execute("DELETE FROM variants WHERE project_id = ?1", params![project_id])?)
    }

    // Feedback

    pub fn get_feedback(&self, project_id: &str) -> StoreResult<Vec<FeedbackItem>> {
        get_feedback(&*self.conn()?, project_id)
    }

    pub fn create_feedback(&self, project_id: &str, item: &FeedbackItem) -> StoreResult<()> {
        self.conn()?.execute(
            "INSERT INTO feedback (id, project_id, variant_id, element_selector, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                item.id,
                project_id,
                item.variant_id,
                item.element_selector,
                item.comment,
                item.created_at
            ],
        )?;
        Ok(())
    }

    pub fn delete_feedback(&self, id: &str) -> StoreResult<()> {
        let changed = self
            .conn()?
            .execute("DELETE FROM feedback WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::not_found("Feedback", id));
        }
        Ok(())
    }

    pub fn clear_feedback(&self, project_id: &str) -> StoreResult<usize> {
        Ok(self
            .conn()?
            .execute("DELETE FROM feedback WHERE project_id = ?1", params![project_id])?)
    }

    // Messages

    pub fn get_messages(&self, project_id: &str) -> StoreResult<Vec<MessageRecord>> {
        get_messages(&*self.conn()?, project_id)
    }

    pub fn create_message(&self, project_id: &str, message: &Message) -> StoreResult<MessageRecord> {
        let conn = self.conn()?;
        let id = insert_message(&conn, project_id, message)?;
        let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
        Ok(conn.query_row(&sql, params![id], message_from_row)?)
    }

    pub fn clear_messages(&self, project_id: &str) -> StoreResult<usize> {
        Ok(self
            .conn()?
            .execute("DELETE FROM messages WHERE project_id = ?1", params![project_id])?)
    }

    // Generated files

    pub fn get_generated_files(&self, project_id: &str) -> StoreResult<Vec<GeneratedFile>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM generated_files WHERE project_id = ?1 ORDER BY path",
            FILE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id], file_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn create_generated_file(
        &self,
        project_id: &str,
        file: &NewGeneratedFile,
    ) -> StoreResult<()> {
        self.conn()?.execute(
            "INSERT INTO generated_files (id, project_id, path, content, file_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                project_id,
                file.path,
                file.content,
                file.file_type.as_str(),
                Utc::now()
            ],
        )?;
        Ok(())
    }

    /// Insert files, updating content and type in place when the path exists.
    pub fn upsert_generated_files(
        &self,
        project_id: &str,
        files: &[NewGeneratedFile],
    ) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        upsert_generated_files(&tx, project_id, files)?;
        tx.commit()?;
        Ok(())
    }

    pub fn clear_generated_files(&self, project_id: &str) -> StoreResult<usize> {
        Ok(self.conn()?.execute(
            "DELETE FROM generated_files WHERE project_id = ?1",
            params![project_id],
        )?)
    }

    // Sessions

    /// Rebuild a project's session from its stored rows.
    pub fn load_session(&self, project_id: &str) -> StoreResult<ProjectSession> {
        let conn = self.conn()?;
        let project = get_project(&conn, project_id)?;
        let variants = get_variants(&conn, project_id)?
            .iter()
            .map(VariantRecord::to_variant)
            .collect();
        let feedback = get_feedback(&conn, project_id)?;
        let transcript = get_messages(&conn, project_id)?
            .iter()
            .map(MessageRecord::to_message)
            .collect();

        Ok(ProjectSession::restore(
            &project.id,
            &project.name,
            project.phase,
            VariantStore::restore(variants, feedback),
            transcript,
        ))
    }

    /// Persist the effects of one applied turn in a single transaction.
    ///
    /// `messages` are the transcript entries not stored yet: the user message
    /// that started the turn followed by what the turn produced.
    pub fn save_turn(
        &self,
        session: &ProjectSession,
        outcome: &TurnOutcome,
        messages: &[Message],
    ) -> StoreResult<()> {
        let project_id = session.project_id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        update_project_phase(&tx, project_id, session.phase())?;

        if outcome.variants_replaced() {
            replace_variants(&tx, project_id, session.variants().variants())?;
        } else if let Some(id) = &outcome.approved_variant_id {
            match approve_variant(&tx, project_id, id) {
                Err(e) if e.is_not_found() => {
                    warn!("[Project {}] Approved variant {} does not exist", project_id, id)
                }
                other => other?,
            }
        }

        if outcome.build_ready
            && let Some(build) = session.latest_build()
        {
            let files: Vec<NewGeneratedFile> =
                build.features.iter().map(NewGeneratedFile::from).collect();
            upsert_generated_files(&tx, project_id, &files)?;
        }

        for message in messages {
            insert_message(&tx, project_id, message)?;
        }

        tx.commit()?;
        debug!(
            "[Project {}] Saved turn ({} messages, phase {})",
            project_id,
            messages.len(),
            session.phase()
        );
        Ok(())
    }
}

fn get_project(conn: &Connection, id: &str) -> StoreResult<Project> {
    let sql = format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS);
    conn.query_row(&sql, params![id], project_from_row)
        .optional()?
        .ok_or_else(|| StoreError::not_found("Project", id))
}

fn update_project_phase(conn: &Connection, id: &str, phase: Phase) -> StoreResult<()> {
    let changed = conn.execute(
        "UPDATE projects SET phase = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, phase.as_str(), Utc::now()],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found("Project", id));
    }
    Ok(())
}

fn get_variants(conn: &Connection, project_id: &str) -> StoreResult<Vec<VariantRecord>> {
    let sql = format!(
        "SELECT {} FROM variants WHERE project_id = ?1 ORDER BY variant_id",
        VARIANT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![project_id], variant_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn insert_variant(conn: &Connection, project_id: &str, variant: &Variant) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO variants (id, project_id, variant_id, name, description, focus_area, code, rationale, is_approved, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            Uuid::new_v4().to_string(),
            project_id,
            variant.id.as_str(),
            variant.name,
            variant.description,
            variant.focus_area.as_str(),
            variant.code,
            variant.rationale,
            variant.is_approved,
            Utc::now()
        ],
    )?;
    Ok(())
}

fn replace_variants(conn: &Connection, project_id: &str, variants: &[Variant]) -> StoreResult<()> {
    conn.execute("DELETE FROM variants WHERE project_id = ?1", params![project_id])?;
    for variant in variants {
        insert_variant(conn, project_id, variant)?;
    }
    Ok(())
}

fn approve_variant(conn: &Connection, project_id: &str, variant_id: &str) -> StoreResult<()> {
    conn.execute(
        "UPDATE variants SET is_approved = 0 WHERE project_id = ?1 AND is_approved = 1",
        params![project_id],
    )?;
    let changed = conn.execute(
        "UPDATE variants SET is_approved = 1 WHERE project_id = ?1 AND variant_id = ?2",
        params![project_id, variant_id],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found("Variant", variant_id));
    }
    Ok(())
}

fn get_feedback(conn: &Connection, project_id: &str) -> StoreResult<Vec<FeedbackItem>> {
    let sql = format!(
        "SELECT {} FROM feedback WHERE project_id = ?1 ORDER BY created_at, rowid",
        FEEDBACK_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![project_id], feedback_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn get_messages(conn: &Connection, project_id: &str) -> StoreResult<Vec<MessageRecord>> {
    let sql = format!(
        "SELECT {} FROM messages WHERE project_id = ?1 ORDER BY created_at, rowid",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![project_id], message_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn insert_message(conn: &Connection, project_id: &str, message: &Message) -> StoreResult<String> {
    let id = Uuid::new_v4().to_string();
    let content = (!message.content.is_empty()).then_some(message.content.as_str());
    conn.execute(
        "INSERT INTO messages (id, project_id, role, content, tool_calls, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            project_id,
            message.role.as_str(),
            content,
            tool_payload(message),
            Utc::now()
        ],
    )?;
    Ok(id)
}

fn upsert_generated_files(
    conn: &Connection,
    project_id: &str,
    files: &[NewGeneratedFile],
) -> StoreResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO generated_files (id, project_id, path, content, file_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (project_id, path) DO UPDATE SET
            content = excluded.content,
            file_type = excluded.file_type",
    )?;
    for file in files {
        stmt.execute(params![
            Uuid::new_v4().to_string(),
            project_id,
            file.path,
            file.content,
            file.file_type.as_str(),
            Utc::now()
        ])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{FocusArea, Role, ToolCall, VariantId};
    use tempfile::TempDir;

    fn variant(id: VariantId) -> Variant {
        Variant {
            id,
            name: format!("Variant {}", id),
            description: "desc".to_string(),
            focus_area: FocusArea::Expression,
            code: "export default function V() { return null }".to_string(),
            rationale: "why".to_string(),
            is_approved: false,
        }
    }

    fn five() -> Vec<Variant> {
        [VariantId::A, VariantId::B, VariantId::C, VariantId::D, VariantId::E]
            .into_iter()
            .map(variant)
            .collect()
    }

    fn store_with_project() -> (Store, Project) {
        let store = Store::open_in_memory().unwrap();
        let project = store.create_project(&NewProject::named("Pricing")).unwrap();
        (store, project)
    }

    fn approved(store: &Store, project_id: &str) -> Vec<VariantId> {
        store
            .get_variants(project_id)
            .unwrap()
            .into_iter()
            .filter(|v| v.is_approved)
            .map(|v| v.variant_id)
            .collect()
    }

    #[test]
    fn project_crud() {
        let (store, project) = store_with_project();
        assert_eq!(project.phase, Phase::Describe);
        assert_eq!(project.created_at, project.updated_at);

        let updated = store
            .update_project(
                &project.id,
                &ProjectUpdate {
                    name: Some("Pricing v2".to_string()),
                    design_brief: Some(serde_json::json!({"audience": "developers"})),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Pricing v2");
        assert_eq!(updated.design_brief.unwrap()["audience"], "developers");
        assert!(updated.updated_at >= project.updated_at);

        store.update_project_phase(&project.id, Phase::Build).unwrap();
        assert_eq!(store.get_project(&project.id).unwrap().phase, Phase::Build);

        store.delete_project(&project.id).unwrap();
        assert!(store.get_project(&project.id).unwrap_err().is_not_found());
        assert!(store.delete_project(&project.id).unwrap_err().is_not_found());
    }

    #[test]
    fn list_projects_filters_by_user() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_project(&NewProject {
                user_id: Some("u1".to_string()),
                ..NewProject::named("Mine")
            })
            .unwrap();
        store.create_project(&NewProject::named("Anonymous")).unwrap();

        assert_eq!(store.list_projects(None).unwrap().len(), 2);
        let mine = store.list_projects(Some("u1")).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].name, "Mine");
    }

    #[test]
    fn get_or_create_uses_given_id() {
        let store = Store::open_in_memory().unwrap();
        let created = store.get_or_create_project("fixed-id", "Untitled").unwrap();
        assert_eq!(created.id, "fixed-id");

        let again = store.get_or_create_project("fixed-id", "Other").unwrap();
        assert_eq!(again.name, "Untitled");
    }

    #[test]
    fn approve_x_then_y_leaves_only_y() {
        let (store, project) = store_with_project();
        store.replace_variants(&project.id, &five()).unwrap();

        store.approve_variant(&project.id, "B").unwrap();
        assert_eq!(approved(&store, &project.id), vec![VariantId::B]);

        store.approve_variant(&project.id, "D").unwrap();
        assert_eq!(approved(&store, &project.id), vec![VariantId::D]);
    }

    #[test]
    fn approving_missing_variant_keeps_previous() {
        let (store, project) = store_with_project();
        store.replace_variants(&project.id, &five()).unwrap();
        store.approve_variant(&project.id, "A").unwrap();

        let err = store.approve_variant(&project.id, "F").unwrap_err();
        assert!(err.is_not_found());
        // The failed approval rolled back the clear
        assert_eq!(approved(&store, &project.id), vec![VariantId::A]);
    }

    #[test]
    fn partial_index_rejects_second_approved_row() {
        let (store, project) = store_with_project();
        store.replace_variants(&project.id, &five()).unwrap();
        store.approve_variant(&project.id, "A").unwrap();

        let conn = store.conn().unwrap();
        let result = conn.execute(
            "UPDATE variants SET is_approved = 1 WHERE project_id = ?1 AND variant_id = 'B'",
            params![project.id],
        );
        assert!(result.is_err());
    }

    #[test]
    fn upsert_variant_overwrites_by_short_id() {
        let (store, project) = store_with_project();
        store.create_variant(&project.id, &variant(VariantId::A)).unwrap();

        let mut changed = variant(VariantId::A);
        changed.name = "Renamed".to_string();
        let record = store.upsert_variant(&project.id, &changed).unwrap();

        assert_eq!(record.name, "Renamed");
        assert_eq!(store.get_variants(&project.id).unwrap().len(), 1);
        assert!(store.create_variant(&project.id, &changed).is_err());
    }

    #[test]
    fn generated_files_upsert_in_place() {
        let (store, project) = store_with_project();
        let file = |content: &str| NewGeneratedFile {
            path: "app/page.tsx".to_string(),
            content: content.to_string(),
            file_type: FileType::Component,
        };

        store
            .upsert_generated_files(&project.id, &[file("v1")])
            .unwrap();
        store
            .upsert_generated_files(&project.id, &[file("v2")])
            .unwrap();

        let files = store.get_generated_files(&project.id).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content, "v2");

        assert!(store.create_generated_file(&project.id, &file("v3")).is_err());
        assert_eq!(store.clear_generated_files(&project.id).unwrap(), 1);
    }

    #[test]
    fn messages_keep_tool_payload() {
        let (store, project) = store_with_project();
        let call = ToolCall {
            id: "call-1".to_string(),
            name: "askQuestion".to_string(),
            arguments: r#"{"question":"Who?"}"#.to_string(),
        };
        let assistant = Message {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: Some(vec![call.clone()]),
            tool_call_id: None,
        };

        store.create_message(&project.id, &Message::user("Hi")).unwrap();
        let record = store.create_message(&project.id, &assistant).unwrap();
        assert!(record.content.is_none());
        store
            .create_message(&project.id, &Message::tool_result("call-1", "{}"))
            .unwrap();

        let messages: Vec<Message> = store
            .get_messages(&project.id)
            .unwrap()
            .iter()
            .map(MessageRecord::to_message)
            .collect();
        assert_eq!(messages[0], Message::user("Hi"));
        assert_eq!(messages[1].tool_calls, Some(vec![call]));
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call-1"));

        assert_eq!(store.clear_messages(&project.id).unwrap(), 3);
    }

    #[test]
    fn feedback_create_delete() {
        let (store, project) = store_with_project();
        let item = FeedbackItem::new("C", "Nice spacing", Some(".hero"));
        store.create_feedback(&project.id, &item).unwrap();

        let stored = store.get_feedback(&project.id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, item.id);
        assert_eq!(stored[0].element_selector.as_deref(), Some(".hero"));

        store.delete_feedback(&item.id).unwrap();
        assert!(store.delete_feedback(&item.id).unwrap_err().is_not_found());
    }

    #[test]
    fn delete_project_cascades() {
        let (store, project) = store_with_project();
        store.replace_variants(&project.id, &five()).unwrap();
        store
            .create_feedback(&project.id, &FeedbackItem::new("A", "ok", None))
            .unwrap();
        store.create_message(&project.id, &Message::user("Hi")).unwrap();

        store.delete_project(&project.id).unwrap();

        assert!(store.get_variants(&project.id).unwrap().is_empty());
        assert!(store.get_feedback(&project.id).unwrap().is_empty());
        assert!(store.get_messages(&project.id).unwrap().is_empty());
    }

    #[test]
    fn save_and_load_session_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("projects.sqlite");
        let store = Store::open(&path).unwrap();
        let project = store.create_project(&NewProject::named("Pricing")).unwrap();

        let mut session = store.load_session(&project.id).unwrap();
        let results: Vec<_> = five()
            .into_iter()
            .map(|v| {
                crate::agent::ToolOutput::Variant(crate::agent::GenerateVariant {
                    id: v.id,
                    name: v.name,
                    description: v.description,
                    focus_area: v.focus_area,
                    code: v.code,
                    rationale: v.rationale,
                })
            })
            .collect();
        let outcome = session.apply_tool_results(&results);
        store
            .save_turn(&session, &outcome, &[Message::user("A pricing page")])
            .unwrap();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        let restored = reopened.load_session(&project.id).unwrap();
        assert_eq!(restored.phase(), Phase::Prototype);
        assert_eq!(restored.variants().variants().len(), 5);
        assert_eq!(restored.variants().selected_variant_id(), Some("A"));
        assert_eq!(restored.transcript().len(), 1);
    }

    #[test]
    fn save_turn_with_regenerated_variant() {
        let (store, project) = store_with_project();
        let mut session = store.load_session(&project.id).unwrap();

        let emit = |v: Variant| {
            crate::agent::ToolOutput::Variant(crate::agent::GenerateVariant {
                id: v.id,
                name: v.name,
                description: v.description,
                focus_area: v.focus_area,
                code: v.code,
                rationale: v.rationale,
            })
        };
        let second_a = Variant {
            name: "Second take".to_string(),
            ..variant(VariantId::A)
        };
        let approve = crate::agent::ToolOutput::FeedbackProcessed(crate::agent::ProcessFeedback {
            action: crate::agent::FeedbackAction::Approve,
            selected_elements: None,
            overall_direction: None,
            approved_variant_id: Some("A".to_string()),
        });
        let results = vec![
            emit(variant(VariantId::A)),
            emit(variant(VariantId::B)),
            emit(second_a),
            approve,
        ];

        let outcome = session.apply_tool_results(&results);
        store
            .save_turn(
                &session,
                &outcome,
                &[Message::user("Redo A and ship it"), Message::assistant("Done")],
            )
            .unwrap();

        let stored = store.get_variants(&project.id).unwrap();
        assert_eq!(stored.len(), 2);
        let a = stored.iter().find(|v| v.variant_id == VariantId::A).unwrap();
        assert_eq!(a.name, "Second take");
        assert_eq!(approved(&store, &project.id), vec![VariantId::A]);
        assert_eq!(store.get_messages(&project.id).unwrap().len(), 2);
        assert_eq!(store.get_project(&project.id).unwrap().phase, Phase::Prototype);
    }

    #[test]
    fn save_turn_tolerates_unknown_approval() {
        let (store, project) = store_with_project();
        let mut session = store.load_session(&project.id).unwrap();
        let outcome = TurnOutcome {
            phase: Some(Phase::Build),
            approved_variant_id: Some("Z".to_string()),
            ..Default::default()
        };
        session.variants_mut().approve("Z");

        store.save_turn(&session, &outcome, &[]).unwrap();
    }
}
