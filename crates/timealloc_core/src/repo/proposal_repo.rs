//! Proposal repository contracts and SQLite implementation.

use crate::model::proposal::{Proposal, ProposalId};
use crate::repo::{bool_to_int, MissingEntity, RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

/// Repository interface for proposals.
pub trait ProposalRepository {
    fn create_proposal(&self, proposal: &Proposal) -> RepoResult<()>;
    fn get_proposal(&self, id: &ProposalId) -> RepoResult<Option<Proposal>>;
    fn proposal_exists(&self, id: &ProposalId) -> RepoResult<bool>;
    fn set_active(&self, id: &ProposalId, active: bool) -> RepoResult<()>;
    /// Distinct instrument types allocated on the given proposals that are
    /// still active, sorted ascending.
    fn available_instrument_types(&self, ids: &[ProposalId]) -> RepoResult<Vec<String>>;
}

/// SQLite-backed proposal repository.
pub struct SqliteProposalRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteProposalRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ProposalRepository for SqliteProposalRepository<'_> {
    fn create_proposal(&self, proposal: &Proposal) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO proposals (id, title, active) VALUES (?1, ?2, ?3);",
            params![
                proposal.id.as_str(),
                proposal.title.as_str(),
                bool_to_int(proposal.active),
            ],
        )?;
        Ok(())
    }

    fn get_proposal(&self, id: &ProposalId) -> RepoResult<Option<Proposal>> {
        let row = self
            .conn
            .query_row(
                "SELECT title, active FROM proposals WHERE id = ?1;",
                [id.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        let Some((title, active)) = row else {
            return Ok(None);
        };
        let active = match active {
            0 => false,
            1 => true,
            other => {
                return Err(RepoError::InvalidData(format!(
                    "invalid active value `{other}` in proposals.active"
                )));
            }
        };
        Ok(Some(Proposal {
            id: id.clone(),
            title,
            active,
        }))
    }

    fn proposal_exists(&self, id: &ProposalId) -> RepoResult<bool> {
        proposal_exists(self.conn, id)
    }

    fn set_active(&self, id: &ProposalId, active: bool) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE proposals SET active = ?2 WHERE id = ?1;",
            params![id.as_str(), bool_to_int(active)],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(MissingEntity::Proposal(id.clone())));
        }
        Ok(())
    }

    fn available_instrument_types(&self, ids: &[ProposalId]) -> RepoResult<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT DISTINCT ta.instrument_type
             FROM time_allocations ta
             INNER JOIN proposals p ON p.id = ta.proposal_id
             WHERE p.active = 1
               AND ta.instrument_type <> ''
               AND p.id IN ({placeholders})
             ORDER BY ta.instrument_type ASC;"
        );
        let bind_values = ids
            .iter()
            .map(|id| Value::Text(id.as_str().to_string()))
            .collect::<Vec<_>>();

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut instrument_types = Vec::new();
        while let Some(row) = rows.next()? {
            instrument_types.push(row.get(0)?);
        }
        Ok(instrument_types)
    }
}

pub(crate) fn proposal_exists(conn: &Connection, id: &ProposalId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM proposals WHERE id = ?1);",
        [id.as_str()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
