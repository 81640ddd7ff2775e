//! SQL for the symbolic image-reference lookup maintained by the image
//! worker.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool, Row};

pub(crate) struct ImageReferenceDao;

impl ImageReferenceDao {
    #[allow(dead_code)]
    pub(crate) async fn url_by_reference(
        pool: &PgPool,
        reference: &str,
    ) -> Result<Option<String>> {
        let row =
            sqlx::query("SELECT url FROM image_references WHERE image_reference = $1")
                .bind(reference)
                .fetch_optional(pool)
                .await
                .context("failed to look up image reference")?;

        row.map(|row| row.try_get("url").context("missing url column"))
            .transpose()
    }

    pub(crate) async fn url_by_reference_in_tx(
        conn: &mut PgConnection,
        reference: &str,
    ) -> Result<Option<String>> {
        let row =
            sqlx::query("SELECT url FROM image_references WHERE image_reference = $1")
                .bind(reference)
                .fetch_optional(conn)
                .await
                .context("failed to look up image reference")?;

        row.map(|row| row.try_get("url").context("missing url column"))
            .transpose()
    }
}
