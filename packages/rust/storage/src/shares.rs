//! Document shares: time-limited read access for users other than the owner.

use docflow_shared::{DocflowError, DocumentShare, Result, format_timestamp};
use libsql::params;

use crate::{Storage, parse_timestamp, storage_err};

impl Storage {
    /// Grant or re-grant a share. An existing share for the same user has its
    /// expiry replaced.
    pub async fn upsert_share(&self, share: &DocumentShare) -> Result<DocumentShare> {
        let mut rows = self
            .conn
            .query(
                "INSERT INTO document_shares (document_id, user_id, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (document_id, user_id) DO UPDATE SET expires_at = excluded.expires_at
                 RETURNING document_id, user_id, expires_at, created_at",
                params![
                    share.document_id.as_str(),
                    share.user_id.as_str(),
                    format_timestamp(&share.expires_at),
                    format_timestamp(&share.created_at),
                ],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => row_to_share(&row),
            None => Err(DocflowError::Storage("share upsert returned no row".into())),
        }
    }

    /// The share of `document_id` with `user_id`, expired or not.
    pub async fn get_share(&self, document_id: &str, user_id: &str) -> Result<Option<DocumentShare>> {
        let mut rows = self
            .conn
            .query(
                "SELECT document_id, user_id, expires_at, created_at FROM document_shares
                 WHERE document_id = ?1 AND user_id = ?2",
                params![document_id, user_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_share(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Every share of a document, soonest expiry first.
    pub async fn list_shares(&self, document_id: &str) -> Result<Vec<DocumentShare>> {
        let mut rows = self
            .conn
            .query(
                "SELECT document_id, user_id, expires_at, created_at FROM document_shares
                 WHERE document_id = ?1 ORDER BY expires_at, user_id",
                params![document_id],
            )
            .await
            .map_err(storage_err)?;

        let mut shares = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            shares.push(row_to_share(&row)?);
        }
        Ok(shares)
    }

    /// Revoke a share. Returns whether one existed.
    pub async fn delete_share(&self, document_id: &str, user_id: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM document_shares WHERE document_id = ?1 AND user_id = ?2",
                params![document_id, user_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(affected > 0)
    }
}

fn row_to_share(row: &libsql::Row) -> Result<DocumentShare> {
    Ok(DocumentShare {
        document_id: row.get::<String>(0).map_err(storage_err)?,
        user_id: row.get::<String>(1).map_err(storage_err)?,
        expires_at: parse_timestamp(&row.get::<String>(2).map_err(storage_err)?)?,
        created_at: parse_timestamp(&row.get::<String>(3).map_err(storage_err)?)?,
    })
}
