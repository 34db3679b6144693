use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    LedgerEntry, LedgerError, MaterialCode, MovementKind, NewMaterial, NewReservation, Origin,
    OriginType, Reservation, ReservationId, Result, StockMovement, Transition, TransitionOutcome,
    store::{LedgerStore, validate_new_reservation},
};

const ENTRY_COLUMNS: &str = "material_code, description, physical_quantity, reserved_quantity, \
     minimum_stock, maximum_stock, updated_at";

const RESERVATION_COLUMNS: &str = "id, material_code, quantity, origin_type, origin_document_id, \
     origin_document_number, status, requested_by, created_at, expires_at, consumed_at, \
     cancelled_at, notes";

/// PostgreSQL-backed ledger store.
///
/// Every mutating call runs in one transaction that locks the material's
/// ledger row with `SELECT ... FOR UPDATE` before anything else. Transitions
/// then lock the reservation row, so the lock order is always ledger row
/// first, reservation row second.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_entry(row: PgRow) -> Result<LedgerEntry> {
        Ok(LedgerEntry::from_parts(
            MaterialCode::new(row.try_get::<String, _>("material_code")?),
            row.try_get("description")?,
            row.try_get("physical_quantity")?,
            row.try_get("reserved_quantity")?,
            row.try_get("minimum_stock")?,
            row.try_get("maximum_stock")?,
            row.try_get("updated_at")?,
        ))
    }

    fn row_to_reservation(row: PgRow) -> Result<Reservation> {
        let origin_type: String = row.try_get("origin_type")?;
        let status: String = row.try_get("status")?;

        Ok(Reservation {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            material_code: MaterialCode::new(row.try_get::<String, _>("material_code")?),
            quantity: row.try_get("quantity")?,
            origin: Origin {
                origin_type: origin_type.parse()?,
                document_id: row.try_get("origin_document_id")?,
                document_number: row.try_get("origin_document_number")?,
            },
            status: status.parse()?,
            requested_by: row.try_get("requested_by")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            consumed_at: row.try_get("consumed_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
            notes: row.try_get("notes")?,
        })
    }

    fn row_to_movement(row: PgRow) -> Result<StockMovement> {
        let kind: String = row.try_get("kind")?;

        Ok(StockMovement {
            id: row.try_get("id")?,
            material_code: MaterialCode::new(row.try_get::<String, _>("material_code")?),
            kind: kind.parse::<MovementKind>()?,
            quantity: row.try_get("quantity")?,
            reservation_id: row
                .try_get::<Option<Uuid>, _>("reservation_id")?
                .map(ReservationId::from_uuid),
            document_number: row.try_get("document_number")?,
            note: row.try_get("note")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    async fn lock_entry(
        conn: &mut PgConnection,
        material_code: &MaterialCode,
    ) -> Result<LedgerEntry> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM stock_ledger WHERE material_code = $1 FOR UPDATE"
        ))
        .bind(material_code.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Self::row_to_entry(row),
            None => Err(LedgerError::MaterialNotFound(material_code.clone())),
        }
    }

    async fn write_quantities(conn: &mut PgConnection, entry: &LedgerEntry) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE stock_ledger
            SET physical_quantity = $2, reserved_quantity = $3, updated_at = $4
            WHERE material_code = $1
            "#,
        )
        .bind(entry.material_code().as_str())
        .bind(entry.physical())
        .bind(entry.reserved())
        .bind(entry.updated_at())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn insert_movement(conn: &mut PgConnection, movement: &StockMovement) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements
                (id, material_code, kind, quantity, reservation_id, document_number, note, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(movement.id)
        .bind(movement.material_code.as_str())
        .bind(movement.kind.as_str())
        .bind(movement.quantity)
        .bind(movement.reservation_id.map(|id| id.as_uuid()))
        .bind(&movement.document_number)
        .bind(&movement.note)
        .bind(movement.recorded_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn register_material(&self, material: NewMaterial) -> Result<LedgerEntry> {
        let now = Utc::now();
        let entry = LedgerEntry::register(material, now)?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO stock_ledger
                (material_code, description, physical_quantity, reserved_quantity,
                 minimum_stock, maximum_stock, updated_at)
            VALUES ($1, $2, $3, 0, $4, $5, $6)
            ON CONFLICT (material_code) DO NOTHING
            "#,
        )
        .bind(entry.material_code().as_str())
        .bind(entry.description())
        .bind(entry.physical())
        .bind(entry.minimum_stock())
        .bind(entry.maximum_stock())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(LedgerError::MaterialAlreadyRegistered(
                entry.material_code().clone(),
            ));
        }

        if entry.physical() > Decimal::ZERO {
            let movement = StockMovement::physical(
                entry.material_code().clone(),
                entry.physical(),
                Some("opening balance".to_string()),
                now,
            );
            Self::insert_movement(&mut tx, &movement).await?;
        }

        tx.commit().await?;
        Ok(entry)
    }

    async fn get_entry(&self, material_code: &MaterialCode) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM stock_ledger WHERE material_code = $1"
        ))
        .bind(material_code.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_entry).transpose()
    }

    async fn list_entries(&self) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM stock_ledger ORDER BY material_code ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn adjust_physical(
        &self,
        material_code: &MaterialCode,
        delta: Decimal,
        note: Option<String>,
    ) -> Result<LedgerEntry> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut entry = Self::lock_entry(&mut tx, material_code).await?;
        entry.apply_physical_delta(delta, now)?;
        Self::write_quantities(&mut tx, &entry).await?;
        Self::insert_movement(
            &mut tx,
            &StockMovement::physical(material_code.clone(), delta, note, now),
        )
        .await?;

        tx.commit().await?;
        Ok(entry)
    }

    async fn adjust_reserved(
        &self,
        material_code: &MaterialCode,
        delta: Decimal,
    ) -> Result<LedgerEntry> {
        let mut tx = self.pool.begin().await?;

        let mut entry = Self::lock_entry(&mut tx, material_code).await?;
        entry.apply_reserved_delta(delta, Utc::now())?;
        Self::write_quantities(&mut tx, &entry).await?;

        tx.commit().await?;
        Ok(entry)
    }

    async fn create_reservation(&self, reservation: NewReservation) -> Result<Reservation> {
        validate_new_reservation(&reservation)?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut entry = Self::lock_entry(&mut tx, &reservation.material_code).await?;
        if entry.available() < reservation.quantity {
            // Dropping the transaction rolls back and releases the row lock.
            return Err(LedgerError::InsufficientStock {
                material_code: reservation.material_code,
                requested: reservation.quantity,
                available: entry.available(),
            });
        }
        entry.apply_reserved_delta(reservation.quantity, now)?;
        Self::write_quantities(&mut tx, &entry).await?;

        let reservation = reservation.into_reservation(now);
        sqlx::query(&format!(
            "INSERT INTO stock_reservations ({RESERVATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(reservation.id.as_uuid())
        .bind(reservation.material_code.as_str())
        .bind(reservation.quantity)
        .bind(reservation.origin.origin_type.as_str())
        .bind(reservation.origin.document_id)
        .bind(&reservation.origin.document_number)
        .bind(reservation.status.as_str())
        .bind(&reservation.requested_by)
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .bind(reservation.consumed_at)
        .bind(reservation.cancelled_at)
        .bind(&reservation.notes)
        .execute(&mut *tx)
        .await?;

        Self::insert_movement(
            &mut tx,
            &StockMovement::for_reservation(MovementKind::Reserved, &reservation, None, now),
        )
        .await?;

        tx.commit().await?;
        Ok(reservation)
    }

    async fn transition_reservation(
        &self,
        reservation_id: ReservationId,
        transition: Transition,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;

        // The material code is immutable, so reading it unlocked is safe.
        let material_code: Option<String> =
            sqlx::query_scalar("SELECT material_code FROM stock_reservations WHERE id = $1")
                .bind(reservation_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        let material_code = material_code
            .map(MaterialCode::new)
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;

        let mut entry = Self::lock_entry(&mut tx, &material_code).await?;

        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations WHERE id = $1 FOR UPDATE"
        ))
        .bind(reservation_id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;
        let mut reservation = Self::row_to_reservation(row)?;

        let now = Utc::now();
        if !reservation.is_active() {
            tx.rollback().await?;
            return Ok(TransitionOutcome::Unchanged(reservation));
        }

        entry.apply_reserved_delta(-reservation.quantity, now)?;
        reservation.apply_transition(&transition, now);
        Self::write_quantities(&mut tx, &entry).await?;

        sqlx::query(
            r#"
            UPDATE stock_reservations
            SET status = $2, consumed_at = $3, cancelled_at = $4, notes = $5
            WHERE id = $1
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.status.as_str())
        .bind(reservation.consumed_at)
        .bind(reservation.cancelled_at)
        .bind(&reservation.notes)
        .execute(&mut *tx)
        .await?;

        Self::insert_movement(
            &mut tx,
            &StockMovement::for_reservation(
                transition.movement_kind(),
                &reservation,
                transition.note(),
                now,
            ),
        )
        .await?;

        tx.commit().await?;
        Ok(TransitionOutcome::Applied(reservation))
    }

    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations WHERE id = $1"
        ))
        .bind(reservation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn list_active(&self, material_code: &MaterialCode) -> Result<Vec<Reservation>> {
        let exists: Option<String> =
            sqlx::query_scalar("SELECT material_code FROM stock_ledger WHERE material_code = $1")
                .bind(material_code.as_str())
                .fetch_optional(&self.pool)
                .await?;
        if exists.is_none() {
            return Err(LedgerError::MaterialNotFound(material_code.clone()));
        }

        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations \
             WHERE material_code = $1 AND status = 'active' \
             ORDER BY created_at ASC"
        ))
        .bind(material_code.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations \
             WHERE status = 'active' AND expires_at < $1 \
             ORDER BY expires_at ASC, created_at ASC"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn find_by_origin(
        &self,
        origin_type: OriginType,
        document_id: i64,
    ) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations \
             WHERE origin_type = $1 AND origin_document_id = $2 \
             ORDER BY created_at ASC"
        ))
        .bind(origin_type.as_str())
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn set_expiry(
        &self,
        reservation_id: ReservationId,
        expires_at: Option<DateTime<Utc>>,
        reason: &str,
    ) -> Result<Reservation> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations WHERE id = $1 FOR UPDATE"
        ))
        .bind(reservation_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::ReservationNotFound(reservation_id))?;
        let mut reservation = Self::row_to_reservation(row)?;

        if !reservation.change_expiry(expires_at, reason, Utc::now()) {
            tx.rollback().await?;
            return Ok(reservation);
        }

        sqlx::query("UPDATE stock_reservations SET expires_at = $2, notes = $3 WHERE id = $1")
            .bind(reservation.id.as_uuid())
            .bind(reservation.expires_at)
            .bind(&reservation.notes)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(reservation)
    }

    async fn movements(&self, material_code: &MaterialCode) -> Result<Vec<StockMovement>> {
        let rows = sqlx::query(
            r#"
            SELECT id, material_code, kind, quantity, reservation_id, document_number, note, recorded_at
            FROM stock_movements
            WHERE material_code = $1
            ORDER BY recorded_at ASC, seq ASC
            "#,
        )
        .bind(material_code.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_movement).collect()
    }
}
