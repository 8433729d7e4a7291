use super::segment_key;
use crate::error::HubError;
use crate::types::{
    AuditLogEntry, Debt, Equivalent, EquivalentKind, IntegrityCheckpoint, InvariantStatus,
    Participant, ParticipantStatus, ParticipantType, PrepareLock, Transaction, TransactionState,
    TransactionType, TrustLine, TrustLinePolicy, TrustLineStatus,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Postgres-backed ledger store. Serializable-segment locking is provided
/// by `pg_advisory_xact_lock`, taken at the start of every mutating call
/// and released implicitly at transaction end.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, HubError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), HubError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS participants (
                pid TEXT PRIMARY KEY,
                public_key BYTEA NOT NULL,
                display_name TEXT NOT NULL,
                profile JSONB NOT NULL,
                participant_type TEXT NOT NULL,
                status TEXT NOT NULL,
                verification_level SMALLINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS equivalents (
                code TEXT PRIMARY KEY,
                precision SMALLINT NOT NULL,
                kind TEXT NOT NULL,
                iso_code TEXT,
                active BOOLEAN NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trust_lines (
                id UUID PRIMARY KEY,
                "from" TEXT NOT NULL,
                "to" TEXT NOT NULL,
                equivalent TEXT NOT NULL,
                limit_amount NUMERIC(20,8) NOT NULL,
                policy JSONB NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS trust_lines_active_edge
                ON trust_lines ("from", "to", equivalent)
                WHERE status = 'active';
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS debts (
                debtor TEXT NOT NULL,
                creditor TEXT NOT NULL,
                equivalent TEXT NOT NULL,
                amount NUMERIC(20,8) NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (debtor, creditor, equivalent)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                tx_id UUID PRIMARY KEY,
                tx_type TEXT NOT NULL,
                initiator TEXT NOT NULL,
                signed_payload JSONB NOT NULL,
                signatures JSONB NOT NULL,
                state TEXT NOT NULL,
                abort_reason TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS transactions_state_updated
                ON transactions (state, updated_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS prepare_locks (
                tx_id UUID NOT NULL,
                equivalent TEXT NOT NULL,
                "from" TEXT NOT NULL,
                "to" TEXT NOT NULL,
                delta NUMERIC(20,8) NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (tx_id, equivalent, "from", "to")
            );
            CREATE INDEX IF NOT EXISTS prepare_locks_expires_at ON prepare_locks (expires_at);
            CREATE INDEX IF NOT EXISTS prepare_locks_segment
                ON prepare_locks (equivalent, "from", "to");
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS integrity_checkpoints (
                id BIGSERIAL PRIMARY KEY,
                equivalent TEXT NOT NULL,
                checksum TEXT NOT NULL,
                invariants_status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS integrity_checkpoints_equivalent
                ON integrity_checkpoints (equivalent, created_at DESC);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS integrity_audit_log (
                id UUID PRIMARY KEY,
                operation_type TEXT NOT NULL,
                tx_id UUID,
                checksum_before TEXT,
                checksum_after TEXT,
                affected_participants JSONB NOT NULL,
                invariant_results JSONB NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS halted_equivalents (
                equivalent TEXT PRIMARY KEY
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn lock_segment(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        equivalent: &str,
        from: &str,
        to: &str,
    ) -> Result<(), HubError> {
        let key = segment_key(equivalent, from, to) as i64;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn create_participant(&self, participant: Participant) -> Result<(), HubError> {
        sqlx::query(
            r#"INSERT INTO participants
               (pid, public_key, display_name, profile, participant_type, status, verification_level, created_at, updated_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)"#,
        )
        .bind(&participant.pid)
        .bind(participant.public_key.to_vec())
        .bind(&participant.display_name)
        .bind(&participant.profile)
        .bind(participant_type_str(participant.participant_type))
        .bind(participant_status_str(participant.status))
        .bind(participant.verification_level as i16)
        .bind(participant.created_at)
        .bind(participant.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                HubError::AlreadyExists(format!("participant {} already exists", participant.pid))
            }
            other => HubError::from(other),
        })?;
        Ok(())
    }

    pub async fn get_participant(&self, pid: &str) -> Result<Option<Participant>, HubError> {
        let row = sqlx::query("SELECT * FROM participants WHERE pid = $1")
            .bind(pid)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_participant).transpose()
    }

    pub async fn create_equivalent(&self, equivalent: Equivalent) -> Result<(), HubError> {
        sqlx::query(
            "INSERT INTO equivalents (code, precision, kind, iso_code, active, created_at) VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(&equivalent.code)
        .bind(equivalent.precision as i16)
        .bind(equivalent_kind_str(equivalent.kind))
        .bind(&equivalent.iso_code)
        .bind(equivalent.active)
        .bind(equivalent.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                HubError::AlreadyExists(format!("equivalent {} already exists", equivalent.code))
            }
            other => HubError::from(other),
        })?;
        Ok(())
    }

    pub async fn get_equivalent(&self, code: &str) -> Result<Option<Equivalent>, HubError> {
        let row = sqlx::query("SELECT * FROM equivalents WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_equivalent).transpose()
    }

    pub async fn list_active_equivalents(&self) -> Result<Vec<Equivalent>, HubError> {
        let rows = sqlx::query("SELECT * FROM equivalents WHERE active = true")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_equivalent).collect()
    }

    pub async fn create_trust_line(&self, line: TrustLine) -> Result<(), HubError> {
        let policy = serde_json::to_value(&line.policy)?;
        sqlx::query(
            r#"INSERT INTO trust_lines (id, "from", "to", equivalent, limit_amount, policy, status, created_at, updated_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)"#,
        )
        .bind(line.id)
        .bind(&line.from)
        .bind(&line.to)
        .bind(&line.equivalent)
        .bind(line.limit)
        .bind(policy)
        .bind(trust_line_status_str(line.status))
        .bind(line.created_at)
        .bind(line.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => HubError::AlreadyExists(
                format!("active trust line {}->{} already exists", line.from, line.to),
            ),
            other => HubError::from(other),
        })?;
        Ok(())
    }

    pub async fn get_trust_line(&self, id: Uuid) -> Result<Option<TrustLine>, HubError> {
        let row = sqlx::query("SELECT * FROM trust_lines WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_trust_line).transpose()
    }

    pub async fn find_trust_line(
        &self,
        from: &str,
        to: &str,
        equivalent: &str,
    ) -> Result<Option<TrustLine>, HubError> {
        let row = sqlx::query(
            r#"SELECT * FROM trust_lines WHERE "from" = $1 AND "to" = $2 AND equivalent = $3 AND status = 'active'"#,
        )
        .bind(from)
        .bind(to)
        .bind(equivalent)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_trust_line).transpose()
    }

    pub async fn list_trust_lines(&self, equivalent: &str) -> Result<Vec<TrustLine>, HubError> {
        let rows = sqlx::query("SELECT * FROM trust_lines WHERE equivalent = $1")
            .bind(equivalent)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_trust_line).collect()
    }

    pub async fn update_trust_line(
        &self,
        id: Uuid,
        new_limit: Option<Decimal>,
        new_policy: Option<TrustLinePolicy>,
    ) -> Result<TrustLine, HubError> {
        let existing = self
            .get_trust_line(id)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("trust line {id}")))?;

        if let Some(limit) = new_limit {
            let debt = self
                .get_debt(&existing.to, &existing.from, &existing.equivalent)
                .await?
                .map(|d| d.amount)
                .unwrap_or(Decimal::ZERO);
            if limit < debt {
                return Err(HubError::LimitBelowDebt {
                    new_limit: limit,
                    debt,
                });
            }
        }

        let limit = new_limit.unwrap_or(existing.limit);
        let policy = new_policy.unwrap_or(existing.policy);
        let policy_json = serde_json::to_value(&policy)?;
        let now = Utc::now();

        sqlx::query(
            "UPDATE trust_lines SET limit_amount = $1, policy = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(limit)
        .bind(policy_json)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_trust_line(id)
            .await?
            .ok_or_else(|| HubError::Internal("trust line vanished after update".into()))
    }

    pub async fn close_trust_line(&self, id: Uuid) -> Result<(), HubError> {
        let line = self
            .get_trust_line(id)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("trust line {id}")))?;
        let debt = self
            .get_debt(&line.to, &line.from, &line.equivalent)
            .await?
            .map(|d| d.amount)
            .unwrap_or(Decimal::ZERO);
        if debt > Decimal::ZERO {
            return Err(HubError::DebtOutstanding(debt));
        }
        sqlx::query("UPDATE trust_lines SET status = 'closed', updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_debt(
        &self,
        debtor: &str,
        creditor: &str,
        equivalent: &str,
    ) -> Result<Option<Debt>, HubError> {
        let row = sqlx::query(
            "SELECT * FROM debts WHERE debtor = $1 AND creditor = $2 AND equivalent = $3",
        )
        .bind(debtor)
        .bind(creditor)
        .bind(equivalent)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_debt).transpose()
    }

    pub async fn list_debts(&self, equivalent: &str) -> Result<Vec<Debt>, HubError> {
        let rows = sqlx::query("SELECT * FROM debts WHERE equivalent = $1 ORDER BY debtor, creditor")
            .bind(equivalent)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_debt).collect()
    }

    pub async fn apply_flow(
        &self,
        equivalent: &str,
        from: &str,
        to: &str,
        delta: Decimal,
    ) -> Result<(), HubError> {
        let mut tx = self.pool.begin().await?;
        self.lock_segment(&mut tx, equivalent, from, to).await?;

        let opposite = sqlx::query(
            "SELECT amount FROM debts WHERE debtor = $1 AND creditor = $2 AND equivalent = $3 FOR UPDATE",
        )
        .bind(to)
        .bind(from)
        .bind(equivalent)
        .fetch_optional(&mut *tx)
        .await?;

        let mut remaining = delta;
        if let Some(row) = opposite {
            let current: Decimal = row.try_get("amount")?;
            let offset = remaining.min(current);
            let new_amount = current - offset;
            remaining -= offset;
            if new_amount <= Decimal::ZERO {
                sqlx::query(
                    "DELETE FROM debts WHERE debtor = $1 AND creditor = $2 AND equivalent = $3",
                )
                .bind(to)
                .bind(from)
                .bind(equivalent)
                .execute(&mut *tx)
                .await?;
            } else {
                sqlx::query(
                    "UPDATE debts SET amount = $1, updated_at = $2 WHERE debtor = $3 AND creditor = $4 AND equivalent = $5",
                )
                .bind(new_amount)
                .bind(Utc::now())
                .bind(to)
                .bind(from)
                .bind(equivalent)
                .execute(&mut *tx)
                .await?;
            }
        }

        if remaining > Decimal::ZERO {
            sqlx::query(
                r#"INSERT INTO debts (debtor, creditor, equivalent, amount, updated_at)
                   VALUES ($1,$2,$3,$4,$5)
                   ON CONFLICT (debtor, creditor, equivalent)
                   DO UPDATE SET amount = debts.amount + EXCLUDED.amount, updated_at = EXCLUDED.updated_at"#,
            )
            .bind(from)
            .bind(to)
            .bind(equivalent)
            .bind(remaining)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn reserved_on_segment(
        &self,
        equivalent: &str,
        from: &str,
        to: &str,
        excluding_tx: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Decimal, HubError> {
        let row = sqlx::query(
            r#"SELECT COALESCE(SUM(delta), 0) AS total FROM prepare_locks
               WHERE equivalent = $1 AND "from" = $2 AND "to" = $3 AND expires_at > $4
               AND ($5::uuid IS NULL OR tx_id != $5)"#,
        )
        .bind(equivalent)
        .bind(from)
        .bind(to)
        .bind(now)
        .bind(excluding_tx)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("total")?)
    }

    pub async fn insert_prepare_lock(&self, lock: PrepareLock) -> Result<(), HubError> {
        sqlx::query(
            r#"INSERT INTO prepare_locks (tx_id, equivalent, "from", "to", delta, expires_at)
               VALUES ($1,$2,$3,$4,$5,$6)"#,
        )
        .bind(lock.tx_id)
        .bind(&lock.equivalent)
        .bind(&lock.from)
        .bind(&lock.to)
        .bind(lock.delta)
        .bind(lock.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_locks_for_tx(&self, tx_id: Uuid) -> Result<(), HubError> {
        sqlx::query("DELETE FROM prepare_locks WHERE tx_id = $1")
            .bind(tx_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, HubError> {
        let result = sqlx::query("DELETE FROM prepare_locks WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn create_transaction(&self, tx: Transaction) -> Result<(), HubError> {
        sqlx::query(
            r#"INSERT INTO transactions
               (tx_id, tx_type, initiator, signed_payload, signatures, state, abort_reason, created_at, updated_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)"#,
        )
        .bind(tx.tx_id)
        .bind(tx_type_str(tx.tx_type))
        .bind(&tx.initiator)
        .bind(&tx.signed_payload)
        .bind(serde_json::to_value(&tx.signatures)?)
        .bind(tx_state_str(tx.state))
        .bind(&tx.abort_reason)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_transaction(&self, tx_id: Uuid) -> Result<Option<Transaction>, HubError> {
        let row = sqlx::query("SELECT * FROM transactions WHERE tx_id = $1")
            .bind(tx_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_transaction).transpose()
    }

    pub async fn set_transaction_state(
        &self,
        tx_id: Uuid,
        state: TransactionState,
        abort_reason: Option<String>,
    ) -> Result<(), HubError> {
        let result = sqlx::query(
            "UPDATE transactions SET state = $1, abort_reason = COALESCE($2, abort_reason), updated_at = $3 WHERE tx_id = $4",
        )
        .bind(tx_state_str(state))
        .bind(&abort_reason)
        .bind(Utc::now())
        .bind(tx_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(HubError::NotFound(format!("transaction {tx_id}")));
        }
        Ok(())
    }

    pub async fn list_stuck_transactions(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, HubError> {
        let rows = sqlx::query(
            "SELECT * FROM transactions WHERE state IN ('PREPARE_IN_PROGRESS','PREPARED') AND updated_at <= $1",
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_transaction).collect()
    }

    pub async fn insert_checkpoint(&self, checkpoint: IntegrityCheckpoint) -> Result<(), HubError> {
        sqlx::query(
            "INSERT INTO integrity_checkpoints (equivalent, checksum, invariants_status, created_at) VALUES ($1,$2,$3,$4)",
        )
        .bind(&checkpoint.equivalent)
        .bind(&checkpoint.checksum)
        .bind(invariant_status_str(checkpoint.invariants_status))
        .bind(checkpoint.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_checkpoint(
        &self,
        equivalent: &str,
    ) -> Result<Option<IntegrityCheckpoint>, HubError> {
        let row = sqlx::query(
            "SELECT * FROM integrity_checkpoints WHERE equivalent = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(equivalent)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_checkpoint).transpose()
    }

    pub async fn append_audit_log(&self, entry: AuditLogEntry) -> Result<(), HubError> {
        sqlx::query(
            r#"INSERT INTO integrity_audit_log
               (id, operation_type, tx_id, checksum_before, checksum_after, affected_participants, invariant_results, recorded_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8)"#,
        )
        .bind(entry.id)
        .bind(&entry.operation_type)
        .bind(entry.tx_id)
        .bind(&entry.checksum_before)
        .bind(&entry.checksum_after)
        .bind(serde_json::to_value(&entry.affected_participants)?)
        .bind(&entry.invariant_results)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_audit_log(&self, limit: usize) -> Result<Vec<AuditLogEntry>, HubError> {
        let rows = sqlx::query(
            "SELECT * FROM integrity_audit_log ORDER BY recorded_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_audit_entry).collect()
    }

    pub async fn is_equivalent_halted(&self, equivalent: &str) -> Result<bool, HubError> {
        let row = sqlx::query("SELECT 1 FROM halted_equivalents WHERE equivalent = $1")
            .bind(equivalent)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn halt_equivalent(&self, equivalent: &str) -> Result<(), HubError> {
        sqlx::query("INSERT INTO halted_equivalents (equivalent) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(equivalent)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn participant_type_str(t: ParticipantType) -> &'static str {
    match t {
        ParticipantType::Person => "person",
        ParticipantType::Business => "business",
        ParticipantType::Hub => "hub",
    }
}

fn parse_participant_type(s: &str) -> Result<ParticipantType, HubError> {
    match s {
        "person" => Ok(ParticipantType::Person),
        "business" => Ok(ParticipantType::Business),
        "hub" => Ok(ParticipantType::Hub),
        other => Err(HubError::Internal(format!("unknown participant_type '{other}'"))),
    }
}

fn participant_status_str(s: ParticipantStatus) -> &'static str {
    match s {
        ParticipantStatus::Active => "active",
        ParticipantStatus::Suspended => "suspended",
        ParticipantStatus::Left => "left",
        ParticipantStatus::Deleted => "deleted",
    }
}

fn parse_participant_status(s: &str) -> Result<ParticipantStatus, HubError> {
    match s {
        "active" => Ok(ParticipantStatus::Active),
        "suspended" => Ok(ParticipantStatus::Suspended),
        "left" => Ok(ParticipantStatus::Left),
        "deleted" => Ok(ParticipantStatus::Deleted),
        other => Err(HubError::Internal(format!("unknown participant status '{other}'"))),
    }
}

fn equivalent_kind_str(k: EquivalentKind) -> &'static str {
    match k {
        EquivalentKind::Fiat => "fiat",
        EquivalentKind::Time => "time",
        EquivalentKind::Commodity => "commodity",
        EquivalentKind::Custom => "custom",
    }
}

fn parse_equivalent_kind(s: &str) -> Result<EquivalentKind, HubError> {
    match s {
        "fiat" => Ok(EquivalentKind::Fiat),
        "time" => Ok(EquivalentKind::Time),
        "commodity" => Ok(EquivalentKind::Commodity),
        "custom" => Ok(EquivalentKind::Custom),
        other => Err(HubError::Internal(format!("unknown equivalent kind '{other}'"))),
    }
}

fn trust_line_status_str(s: TrustLineStatus) -> &'static str {
    match s {
        TrustLineStatus::Active => "active",
        TrustLineStatus::Frozen => "frozen",
        TrustLineStatus::Closed => "closed",
    }
}

fn parse_trust_line_status(s: &str) -> Result<TrustLineStatus, HubError> {
    match s {
        "active" => Ok(TrustLineStatus::Active),
        "frozen" => Ok(TrustLineStatus::Frozen),
        "closed" => Ok(TrustLineStatus::Closed),
        other => Err(HubError::Internal(format!("unknown trust line status '{other}'"))),
    }
}

fn tx_type_str(t: TransactionType) -> &'static str {
    match t {
        TransactionType::TrustLineCreate => "TRUST_LINE_CREATE",
        TransactionType::TrustLineUpdate => "TRUST_LINE_UPDATE",
        TransactionType::TrustLineClose => "TRUST_LINE_CLOSE",
        TransactionType::Payment => "PAYMENT",
        TransactionType::Clearing => "CLEARING",
    }
}

fn parse_tx_type(s: &str) -> Result<TransactionType, HubError> {
    match s {
        "TRUST_LINE_CREATE" => Ok(TransactionType::TrustLineCreate),
        "TRUST_LINE_UPDATE" => Ok(TransactionType::TrustLineUpdate),
        "TRUST_LINE_CLOSE" => Ok(TransactionType::TrustLineClose),
        "PAYMENT" => Ok(TransactionType::Payment),
        "CLEARING" => Ok(TransactionType::Clearing),
        other => Err(HubError::Internal(format!("unknown tx type '{other}'"))),
    }
}

fn tx_state_str(s: TransactionState) -> &'static str {
    match s {
        TransactionState::New => "NEW",
        TransactionState::Routed => "ROUTED",
        TransactionState::PrepareInProgress => "PREPARE_IN_PROGRESS",
        TransactionState::Prepared => "PREPARED",
        TransactionState::Committed => "COMMITTED",
        TransactionState::Aborted => "ABORTED",
    }
}

fn parse_tx_state(s: &str) -> Result<TransactionState, HubError> {
    match s {
        "NEW" => Ok(TransactionState::New),
        "ROUTED" => Ok(TransactionState::Routed),
        "PREPARE_IN_PROGRESS" => Ok(TransactionState::PrepareInProgress),
        "PREPARED" => Ok(TransactionState::Prepared),
        "COMMITTED" => Ok(TransactionState::Committed),
        "ABORTED" => Ok(TransactionState::Aborted),
        other => Err(HubError::Internal(format!("unknown tx state '{other}'"))),
    }
}

fn invariant_status_str(s: InvariantStatus) -> &'static str {
    match s {
        InvariantStatus::Pass => "pass",
        InvariantStatus::Fail => "fail",
    }
}

fn parse_invariant_status(s: &str) -> Result<InvariantStatus, HubError> {
    match s {
        "pass" => Ok(InvariantStatus::Pass),
        "fail" => Ok(InvariantStatus::Fail),
        other => Err(HubError::Internal(format!("unknown invariant status '{other}'"))),
    }
}

fn row_to_participant(row: sqlx::postgres::PgRow) -> Result<Participant, HubError> {
    let key_bytes: Vec<u8> = row.try_get("public_key")?;
    let mut public_key = [0u8; 32];
    if key_bytes.len() == 32 {
        public_key.copy_from_slice(&key_bytes);
    }
    Ok(Participant {
        pid: row.try_get("pid")?,
        public_key,
        display_name: row.try_get("display_name")?,
        profile: row.try_get("profile")?,
        participant_type: parse_participant_type(row.try_get("participant_type")?)?,
        status: parse_participant_status(row.try_get("status")?)?,
        verification_level: row.try_get::<i16, _>("verification_level")? as u8,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_equivalent(row: sqlx::postgres::PgRow) -> Result<Equivalent, HubError> {
    Ok(Equivalent {
        code: row.try_get("code")?,
        precision: row.try_get::<i16, _>("precision")? as u8,
        kind: parse_equivalent_kind(row.try_get("kind")?)?,
        iso_code: row.try_get("iso_code")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_trust_line(row: sqlx::postgres::PgRow) -> Result<TrustLine, HubError> {
    let policy_json: serde_json::Value = row.try_get("policy")?;
    let policy: TrustLinePolicy = serde_json::from_value(policy_json)?;
    Ok(TrustLine {
        id: row.try_get("id")?,
        from: row.try_get("from")?,
        to: row.try_get("to")?,
        equivalent: row.try_get("equivalent")?,
        limit: row.try_get("limit_amount")?,
        policy,
        status: parse_trust_line_status(row.try_get("status")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_debt(row: sqlx::postgres::PgRow) -> Result<Debt, HubError> {
    Ok(Debt {
        debtor: row.try_get("debtor")?,
        creditor: row.try_get("creditor")?,
        equivalent: row.try_get("equivalent")?,
        amount: row.try_get("amount")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_transaction(row: sqlx::postgres::PgRow) -> Result<Transaction, HubError> {
    let signatures_json: serde_json::Value = row.try_get("signatures")?;
    let signatures: Vec<String> = serde_json::from_value(signatures_json)?;
    Ok(Transaction {
        tx_id: row.try_get("tx_id")?,
        tx_type: parse_tx_type(row.try_get("tx_type")?)?,
        initiator: row.try_get("initiator")?,
        signed_payload: row.try_get("signed_payload")?,
        signatures,
        state: parse_tx_state(row.try_get("state")?)?,
        abort_reason: row.try_get("abort_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_checkpoint(row: sqlx::postgres::PgRow) -> Result<IntegrityCheckpoint, HubError> {
    Ok(IntegrityCheckpoint {
        equivalent: row.try_get("equivalent")?,
        checksum: row.try_get("checksum")?,
        invariants_status: parse_invariant_status(row.try_get("invariants_status")?)?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_audit_entry(row: sqlx::postgres::PgRow) -> Result<AuditLogEntry, HubError> {
    let affected_json: serde_json::Value = row.try_get("affected_participants")?;
    let affected_participants: Vec<String> = serde_json::from_value(affected_json)?;
    Ok(AuditLogEntry {
        id: row.try_get("id")?,
        operation_type: row.try_get("operation_type")?,
        tx_id: row.try_get("tx_id")?,
        checksum_before: row.try_get("checksum_before")?,
        checksum_after: row.try_get("checksum_after")?,
        affected_participants,
        invariant_results: row.try_get("invariant_results")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}
