use anyhow::Result;
use sqlx::Row;

use super::models::{
    Chunk, Contract, ContractField, QaSession, QaSessionTurn, SearchLog, SystemConfig,
};
use super::DbPool;

/// Single connection pool, transactional boundaries per high-level
/// operation, per C10 (§4.10).
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    // ---- Contracts ----------------------------------------------------

    pub async fn create_contract(
        &self,
        contract_number: &str,
        contract_name: &str,
        contract_type: Option<&str>,
        original_filename: &str,
        stored_path: &str,
        file_size: i64,
        file_format: &str,
    ) -> Result<Contract> {
        let contract = sqlx::query_as::<_, Contract>(
            r#"INSERT INTO contracts
                (contract_number, contract_name, contract_type, original_filename,
                 stored_path, file_size, file_format, upload_time,
                 ocr_status, content_status, vector_status, elasticsearch_sync_status)
               VALUES ($1, $2, $3, $4, $5, $6, $7, now(), 'pending', 'pending', 'pending', 'pending')
               RETURNING *"#,
        )
        .bind(contract_number)
        .bind(contract_name)
        .bind(contract_type)
        .bind(original_filename)
        .bind(stored_path)
        .bind(file_size)
        .bind(file_format)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(contract)
    }

    pub async fn find_contract_by_number(&self, contract_number: &str) -> Result<Option<Contract>> {
        let contract = sqlx::query_as::<_, Contract>(
            "SELECT * FROM contracts WHERE contract_number = $1",
        )
        .bind(contract_number)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(contract)
    }

    pub async fn get_contract(&self, id: i64) -> Result<Option<Contract>> {
        let contract = sqlx::query_as::<_, Contract>("SELECT * FROM contracts WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.get_pool())
            .await?;

        Ok(contract)
    }

    pub async fn list_contracts(&self, page: i64, page_size: i64) -> Result<(Vec<Contract>, i64)> {
        let offset = (page - 1) * page_size;

        let contracts = sqlx::query_as::<_, Contract>(
            "SELECT * FROM contracts ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(page_size)
        .bind(offset)
        .fetch_all(self.pool.get_pool())
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT count(*) FROM contracts")
            .fetch_one(self.pool.get_pool())
            .await?;

        Ok((contracts, total))
    }

    /// Every contract, unpaginated. Used by maintenance and bulk
    /// Elasticsearch sync operations that must sweep the whole table.
    pub async fn list_all_contracts(&self) -> Result<Vec<Contract>> {
        let contracts = sqlx::query_as::<_, Contract>("SELECT * FROM contracts ORDER BY created_at DESC")
            .fetch_all(self.pool.get_pool())
            .await?;
        Ok(contracts)
    }

    pub async fn update_ocr_status(
        &self,
        id: i64,
        status: &str,
        html_path: Option<&str>,
        text_path: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE contracts
               SET ocr_status = $2, html_content_path = COALESCE($3, html_content_path),
                   text_content_path = COALESCE($4, text_content_path), updated_at = now()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(status)
        .bind(html_path)
        .bind(text_path)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    pub async fn update_content_status(&self, id: i64, status: &str) -> Result<()> {
        sqlx::query("UPDATE contracts SET content_status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    pub async fn update_vector_status(&self, id: i64, status: &str) -> Result<()> {
        sqlx::query("UPDATE contracts SET vector_status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    pub async fn update_es_sync_status(&self, id: i64, status: &str) -> Result<()> {
        sqlx::query(
            "UPDATE contracts SET elasticsearch_sync_status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    /// Marks every contract stuck in a `*_running`-equivalent status as
    /// `failed` on process startup (§9 "Asynchrony & background jobs").
    /// This codebase models "running" as `processing`.
    pub async fn fail_stale_processing_contracts(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"UPDATE contracts
               SET ocr_status = CASE WHEN ocr_status = 'processing' THEN 'failed' ELSE ocr_status END,
                   content_status = CASE WHEN content_status = 'processing' THEN 'failed' ELSE content_status END,
                   vector_status = CASE WHEN vector_status = 'processing' THEN 'failed' ELSE vector_status END,
                   elasticsearch_sync_status = CASE WHEN elasticsearch_sync_status = 'processing' THEN 'failed' ELSE elasticsearch_sync_status END,
                   updated_at = now()
               WHERE 'processing' IN (ocr_status, content_status, vector_status, elasticsearch_sync_status)"#,
        )
        .execute(self.pool.get_pool())
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn delete_contract(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM contracts WHERE id = $1")
            .bind(id)
            .execute(self.pool.get_pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ---- Chunks ---------------------------------------------------------

    /// Replaces all chunks for a contract inside one transaction, so a
    /// partial failure mid-insert never leaves a mixed old/new prefix
    /// (§5 "Ordering guarantees").
    pub async fn replace_chunks(
        &self,
        contract_id: i64,
        chunks: &[(i32, String, String, i32)], // (chunk_index, content_text, chunk_type, chunk_size)
    ) -> Result<Vec<Chunk>> {
        let mut tx = self.pool.get_pool().begin().await?;

        sqlx::query("DELETE FROM chunks WHERE contract_id = $1")
            .bind(contract_id)
            .execute(&mut *tx)
            .await?;

        let mut inserted = Vec::with_capacity(chunks.len());
        for (chunk_index, content_text, chunk_type, chunk_size) in chunks {
            let chunk = sqlx::query_as::<_, Chunk>(
                r#"INSERT INTO chunks
                    (contract_id, chunk_index, content_text, chunk_type, chunk_size, vector_status)
                   VALUES ($1, $2, $3, $4, $5, 'pending')
                   RETURNING *"#,
            )
            .bind(contract_id)
            .bind(chunk_index)
            .bind(content_text)
            .bind(chunk_type)
            .bind(chunk_size)
            .fetch_one(&mut *tx)
            .await?;
            inserted.push(chunk);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn get_chunks_by_contract(&self, contract_id: i64) -> Result<Vec<Chunk>> {
        let chunks = sqlx::query_as::<_, Chunk>(
            "SELECT * FROM chunks WHERE contract_id = $1 ORDER BY chunk_index ASC",
        )
        .bind(contract_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(chunks)
    }

    pub async fn get_chunks_paginated(
        &self,
        contract_id: i64,
        page: i64,
        page_size: i64,
        chunk_type: Option<&str>,
    ) -> Result<(Vec<Chunk>, i64)> {
        let offset = (page - 1) * page_size;

        let chunks = sqlx::query_as::<_, Chunk>(
            r#"SELECT * FROM chunks
               WHERE contract_id = $1 AND ($4::text IS NULL OR chunk_type = $4)
               ORDER BY chunk_index ASC LIMIT $2 OFFSET $3"#,
        )
        .bind(contract_id)
        .bind(page_size)
        .bind(offset)
        .bind(chunk_type)
        .fetch_all(self.pool.get_pool())
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM chunks WHERE contract_id = $1 AND ($2::text IS NULL OR chunk_type = $2)",
        )
        .bind(contract_id)
        .bind(chunk_type)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok((chunks, total))
    }

    /// Batched lookup for the semantic-retrieve step of C9 (§4.9 step 3):
    /// loads chunk + contract rows in a single query for a set of chunk ids.
    pub async fn get_chunks_with_contract_by_ids(
        &self,
        chunk_ids: &[i64],
    ) -> Result<Vec<(Chunk, Contract)>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"SELECT c.*, ct.id as contract_row_id, ct.contract_number, ct.contract_name,
                      ct.contract_type, ct.original_filename, ct.stored_path, ct.file_size,
                      ct.file_format, ct.upload_time, ct.html_content_path, ct.text_content_path,
                      ct.ocr_status, ct.content_status, ct.vector_status,
                      ct.elasticsearch_sync_status, ct.created_at as contract_created_at,
                      ct.updated_at as contract_updated_at
               FROM chunks c
               JOIN contracts ct ON ct.id = c.contract_id
               WHERE c.id = ANY($1)"#,
        )
        .bind(chunk_ids)
        .fetch_all(self.pool.get_pool())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let chunk = Chunk {
                id: row.try_get("id")?,
                contract_id: row.try_get("contract_id")?,
                chunk_index: row.try_get("chunk_index")?,
                content_text: row.try_get("content_text")?,
                chunk_type: row.try_get("chunk_type")?,
                chunk_size: row.try_get("chunk_size")?,
                vector_id: row.try_get("vector_id")?,
                vector_status: row.try_get("vector_status")?,
                created_at: row.try_get("created_at")?,
            };
            let contract = Contract {
                id: row.try_get("contract_row_id")?,
                contract_number: row.try_get("contract_number")?,
                contract_name: row.try_get("contract_name")?,
                contract_type: row.try_get("contract_type")?,
                original_filename: row.try_get("original_filename")?,
                stored_path: row.try_get("stored_path")?,
                file_size: row.try_get("file_size")?,
                file_format: row.try_get("file_format")?,
                upload_time: row.try_get("upload_time")?,
                html_content_path: row.try_get("html_content_path")?,
                text_content_path: row.try_get("text_content_path")?,
                ocr_status: row.try_get("ocr_status")?,
                content_status: row.try_get("content_status")?,
                vector_status: row.try_get("vector_status")?,
                elasticsearch_sync_status: row.try_get("elasticsearch_sync_status")?,
                created_at: row.try_get("contract_created_at")?,
                updated_at: row.try_get("contract_updated_at")?,
            };
            out.push((chunk, contract));
        }

        Ok(out)
    }

    pub async fn set_chunk_vector_id(&self, chunk_id: i64, vector_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE chunks SET vector_id = $2, vector_status = 'completed' WHERE id = $1",
        )
        .bind(chunk_id)
        .bind(vector_id)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    pub async fn reset_chunk_vector_status(&self, contract_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE chunks SET vector_id = NULL, vector_status = 'pending' WHERE contract_id = $1",
        )
        .bind(contract_id)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    // ---- QA sessions & turns --------------------------------------------

    pub async fn ensure_session(&self, session_id: &str) -> Result<QaSession> {
        let session = sqlx::query_as::<_, QaSession>(
            r#"INSERT INTO qa_sessions (session_id, created_at, last_active_at)
               VALUES ($1, now(), now())
               ON CONFLICT (session_id) DO UPDATE SET last_active_at = now()
               RETURNING *"#,
        )
        .bind(session_id)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(session)
    }

    pub async fn set_session_title(&self, session_id: &str, title: &str) -> Result<()> {
        sqlx::query("UPDATE qa_sessions SET session_title = $2 WHERE session_id = $1")
            .bind(session_id)
            .bind(title)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    pub async fn count_turns(&self, session_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM qa_session_turns WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(self.pool.get_pool())
        .await?;
        Ok(count)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_turn(
        &self,
        session_id: &str,
        message_order: i32,
        question: &str,
        answer: &str,
        source_contracts: serde_json::Value,
        source_chunks: serde_json::Value,
        pipeline_trace: serde_json::Value,
        search_method: Option<&str>,
        response_time_ms: i64,
    ) -> Result<QaSessionTurn> {
        let turn = sqlx::query_as::<_, QaSessionTurn>(
            r#"INSERT INTO qa_session_turns
                (session_id, message_order, question, answer, source_contracts,
                 source_chunks, pipeline_trace, search_method, response_time_ms)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               RETURNING *"#,
        )
        .bind(session_id)
        .bind(message_order)
        .bind(question)
        .bind(answer)
        .bind(source_contracts)
        .bind(source_chunks)
        .bind(pipeline_trace)
        .bind(search_method)
        .bind(response_time_ms)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(turn)
    }

    pub async fn get_session_turns(&self, session_id: &str) -> Result<Vec<QaSessionTurn>> {
        let turns = sqlx::query_as::<_, QaSessionTurn>(
            "SELECT * FROM qa_session_turns WHERE session_id = $1 ORDER BY message_order ASC",
        )
        .bind(session_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(turns)
    }

    pub async fn list_sessions(&self, page: i64, page_size: i64) -> Result<(Vec<QaSession>, i64)> {
        let offset = (page - 1) * page_size;

        let sessions = sqlx::query_as::<_, QaSession>(
            "SELECT * FROM qa_sessions ORDER BY last_active_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(page_size)
        .bind(offset)
        .fetch_all(self.pool.get_pool())
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT count(*) FROM qa_sessions")
            .fetch_one(self.pool.get_pool())
            .await?;

        Ok((sessions, total))
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM qa_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(self.pool.get_pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_turn_feedback(
        &self,
        session_id: &str,
        turn_id: i64,
        feedback: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE qa_session_turns SET user_feedback = $3 WHERE session_id = $1 AND id = $2",
        )
        .bind(session_id)
        .bind(turn_id)
        .bind(feedback)
        .execute(self.pool.get_pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ---- Supplemented tables (§3.1) --------------------------------------

    pub async fn insert_search_log(
        &self,
        session_id: Option<&str>,
        question: &str,
        search_method: Option<&str>,
        result_count: i32,
        response_time_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO search_logs
                (session_id, question, search_method, result_count, response_time_ms)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(session_id)
        .bind(question)
        .bind(search_method)
        .bind(result_count)
        .bind(response_time_ms)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    pub async fn list_search_logs(&self, page: i64, page_size: i64) -> Result<(Vec<SearchLog>, i64)> {
        let offset = (page - 1) * page_size;

        let logs = sqlx::query_as::<_, SearchLog>(
            "SELECT * FROM search_logs ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(page_size)
        .bind(offset)
        .fetch_all(self.pool.get_pool())
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT count(*) FROM search_logs")
            .fetch_one(self.pool.get_pool())
            .await?;

        Ok((logs, total))
    }

    pub async fn list_contract_fields(&self, contract_id: i64) -> Result<Vec<ContractField>> {
        let fields = sqlx::query_as::<_, ContractField>(
            "SELECT * FROM contract_fields WHERE contract_id = $1 ORDER BY id ASC",
        )
        .bind(contract_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(fields)
    }

    pub async fn get_system_config(&self, key: &str) -> Result<Option<SystemConfig>> {
        let config = sqlx::query_as::<_, SystemConfig>(
            "SELECT * FROM system_config WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(config)
    }

    pub async fn set_system_config(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO system_config (key, value, updated_at) VALUES ($1, $2, now())
               ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = now()"#,
        )
        .bind(key)
        .bind(value)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }
}
