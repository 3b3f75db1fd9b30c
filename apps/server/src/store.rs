//! Ledger store: the repository seam between the booking/payment core and
//! SQLite. Handlers and core modules only see the `LedgerStore` trait, so
//! unit tests run against `MemStore` without a database file.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::models::{
    Apartment, Booking, BookingStatus, Payment, PaymentMethod, PaymentStatus,
};

// ── Write inputs ──

#[derive(Debug, Clone)]
pub struct NewApartment {
    pub title: String,
    pub address: String,
    pub city: String,
    pub price_per_night: f64,
    pub max_guests: i64,
    /// JSON-encoded amenity list.
    pub amenities: String,
    pub owner_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct ApartmentPatch {
    pub title: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub price_per_night: Option<f64>,
    pub max_guests: Option<i64>,
    pub amenities: Option<String>,
}

impl ApartmentPatch {
    /// True when the patch touches fields frozen after the first booking.
    pub fn touches_frozen_fields(&self) -> bool {
        self.price_per_night.is_some() || self.max_guests.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub apartment_id: i64,
    pub created_by: String,
    pub check_in: chrono::NaiveDate,
    pub check_out: chrono::NaiveDate,
    pub guests: i64,
    pub total_price: f64,
    pub special_requests: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub booking_id: i64,
    pub amount: f64,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    pub provider_txn_id: Option<String>,
    pub paid_by: String,
}

/// Result of a payment insert. `DuplicateTxn` means the completed-payment
/// uniqueness index already holds a row for this provider transaction id.
#[derive(Debug)]
pub enum PaymentInsert {
    Inserted(Payment),
    DuplicateTxn,
}

// ── Trait ──

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_apartment(&self, new: &NewApartment) -> Result<Apartment, sqlx::Error>;
    async fn find_apartment(&self, id: i64) -> Result<Option<Apartment>, sqlx::Error>;
    async fn list_apartments(
        &self,
        city: Option<&str>,
        owner: Option<&str>,
    ) -> Result<Vec<Apartment>, sqlx::Error>;
    async fn update_apartment(
        &self,
        id: i64,
        patch: &ApartmentPatch,
    ) -> Result<Option<Apartment>, sqlx::Error>;
    async fn delete_apartment(&self, id: i64) -> Result<bool, sqlx::Error>;

    /// Bookings of an apartment that currently occupy dates
    /// (status pending or confirmed).
    async fn blocking_bookings(&self, apartment_id: i64) -> Result<Vec<Booking>, sqlx::Error>;

    /// Inserts a booking only if its range conflicts with no blocking
    /// booking of the same apartment; a single guarded statement, so two
    /// concurrent creations for overlapping ranges cannot both succeed.
    /// Returns `None` on conflict.
    async fn insert_booking_if_free(
        &self,
        new: &NewBooking,
    ) -> Result<Option<Booking>, sqlx::Error>;

    async fn find_booking(&self, id: i64) -> Result<Option<Booking>, sqlx::Error>;
    async fn list_bookings(
        &self,
        apartment_id: Option<i64>,
        created_by: Option<&str>,
    ) -> Result<Vec<Booking>, sqlx::Error>;

    /// Guarded status update: applies only while the current status is in
    /// `from`. Returns false when the row was missing or already moved on.
    async fn set_booking_status(
        &self,
        id: i64,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> Result<bool, sqlx::Error>;

    /// Cancels pending bookings created before `cutoff`
    /// (UTC `YYYY-MM-DD HH:MM:SS`). Returns how many rows were released.
    async fn cancel_stale_pending(&self, cutoff: &str) -> Result<u64, sqlx::Error>;

    async fn insert_payment(&self, new: &NewPayment) -> Result<PaymentInsert, sqlx::Error>;
    async fn find_payment(&self, id: i64) -> Result<Option<Payment>, sqlx::Error>;
    async fn find_payment_by_txn(&self, txn_id: &str) -> Result<Option<Payment>, sqlx::Error>;
    async fn list_payments(
        &self,
        booking_id: Option<i64>,
        status: Option<PaymentStatus>,
        paid_by: Option<&str>,
    ) -> Result<Vec<Payment>, sqlx::Error>;
}

// ── SQLite implementation ──

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn insert_apartment(&self, new: &NewApartment) -> Result<Apartment, sqlx::Error> {
        let id = sqlx::query(
            "INSERT INTO apartments (title, address, city, price_per_night, max_guests, amenities, owner_id)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.title)
        .bind(&new.address)
        .bind(&new.city)
        .bind(new.price_per_night)
        .bind(new.max_guests)
        .bind(&new.amenities)
        .bind(&new.owner_id)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        sqlx::query_as::<_, Apartment>("SELECT * FROM apartments WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
    }

    async fn find_apartment(&self, id: i64) -> Result<Option<Apartment>, sqlx::Error> {
        sqlx::query_as::<_, Apartment>("SELECT * FROM apartments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn list_apartments(
        &self,
        city: Option<&str>,
        owner: Option<&str>,
    ) -> Result<Vec<Apartment>, sqlx::Error> {
        let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new("SELECT * FROM apartments WHERE 1=1");
        if let Some(city) = city {
            qb.push(" AND city = ").push_bind(city);
        }
        if let Some(owner) = owner {
            qb.push(" AND owner_id = ").push_bind(owner);
        }
        qb.push(" ORDER BY created_at DESC");
        qb.build_query_as::<Apartment>().fetch_all(&self.pool).await
    }

    async fn update_apartment(
        &self,
        id: i64,
        patch: &ApartmentPatch,
    ) -> Result<Option<Apartment>, sqlx::Error> {
        if let Some(title) = &patch.title {
            sqlx::query("UPDATE apartments SET title = ? WHERE id = ?")
                .bind(title)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(address) = &patch.address {
            sqlx::query("UPDATE apartments SET address = ? WHERE id = ?")
                .bind(address)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(city) = &patch.city {
            sqlx::query("UPDATE apartments SET city = ? WHERE id = ?")
                .bind(city)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(price) = patch.price_per_night {
            sqlx::query("UPDATE apartments SET price_per_night = ? WHERE id = ?")
                .bind(price)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(max_guests) = patch.max_guests {
            sqlx::query("UPDATE apartments SET max_guests = ? WHERE id = ?")
                .bind(max_guests)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(amenities) = &patch.amenities {
            sqlx::query("UPDATE apartments SET amenities = ? WHERE id = ?")
                .bind(amenities)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }

        self.find_apartment(id).await
    }

    async fn delete_apartment(&self, id: i64) -> Result<bool, sqlx::Error> {
        let affected = sqlx::query("DELETE FROM apartments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    async fn blocking_bookings(&self, apartment_id: i64) -> Result<Vec<Booking>, sqlx::Error> {
        sqlx::query_as::<_, Booking>(
            "SELECT * FROM bookings
             WHERE apartment_id = ? AND status IN ('pending', 'confirmed')
             ORDER BY check_in ASC",
        )
        .bind(apartment_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn insert_booking_if_free(
        &self,
        new: &NewBooking,
    ) -> Result<Option<Booking>, sqlx::Error> {
        // Single statement: the overlap re-check and the insert are atomic
        // under SQLite's single-writer lock. The WHERE NOT EXISTS clause is
        // the half-open overlap rule (existing.check_in < new.check_out AND
        // new.check_in < existing.check_out).
        let result = sqlx::query(
            "INSERT INTO bookings
                 (apartment_id, created_by, check_in, check_out, guests,
                  total_price, status, special_requests)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7
             WHERE NOT EXISTS (
                 SELECT 1 FROM bookings
                 WHERE apartment_id = ?1
                   AND status IN ('pending', 'confirmed')
                   AND check_in < ?4
                   AND ?3 < check_out
             )",
        )
        .bind(new.apartment_id)
        .bind(&new.created_by)
        .bind(new.check_in)
        .bind(new.check_out)
        .bind(new.guests)
        .bind(new.total_price)
        .bind(&new.special_requests)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.find_booking(result.last_insert_rowid()).await
    }

    async fn find_booking(&self, id: i64) -> Result<Option<Booking>, sqlx::Error> {
        sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn list_bookings(
        &self,
        apartment_id: Option<i64>,
        created_by: Option<&str>,
    ) -> Result<Vec<Booking>, sqlx::Error> {
        let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new("SELECT * FROM bookings WHERE 1=1");
        if let Some(apartment_id) = apartment_id {
            qb.push(" AND apartment_id = ").push_bind(apartment_id);
        }
        if let Some(created_by) = created_by {
            qb.push(" AND created_by = ").push_bind(created_by);
        }
        qb.push(" ORDER BY created_at DESC");
        qb.build_query_as::<Booking>().fetch_all(&self.pool).await
    }

    async fn set_booking_status(
        &self,
        id: i64,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> Result<bool, sqlx::Error> {
        let allowed = from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE bookings
             SET status = ?1,
                 cancelled_at = CASE WHEN ?1 = 'cancelled'
                                     THEN datetime('now')
                                     ELSE cancelled_at END
             WHERE id = ?2 AND status IN ({})",
            allowed
        );

        let affected = sqlx::query(&sql)
            .bind(to)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    async fn cancel_stale_pending(&self, cutoff: &str) -> Result<u64, sqlx::Error> {
        let affected = sqlx::query(
            "UPDATE bookings
             SET status = 'cancelled', cancelled_at = datetime('now')
             WHERE status = 'pending' AND created_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    async fn insert_payment(&self, new: &NewPayment) -> Result<PaymentInsert, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO payments
                 (booking_id, amount, payment_method, status, provider_txn_id, paid_by)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(new.booking_id)
        .bind(new.amount)
        .bind(new.payment_method)
        .bind(new.status)
        .bind(&new.provider_txn_id)
        .bind(&new.paid_by)
        .execute(&self.pool)
        .await;

        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Ok(PaymentInsert::DuplicateTxn);
            }
            Err(e) => return Err(e),
        };

        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(PaymentInsert::Inserted(payment))
    }

    async fn find_payment(&self, id: i64) -> Result<Option<Payment>, sqlx::Error> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_payment_by_txn(&self, txn_id: &str) -> Result<Option<Payment>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE provider_txn_id = ? ORDER BY id ASC LIMIT 1",
        )
        .bind(txn_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_payments(
        &self,
        booking_id: Option<i64>,
        status: Option<PaymentStatus>,
        paid_by: Option<&str>,
    ) -> Result<Vec<Payment>, sqlx::Error> {
        let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new("SELECT * FROM payments WHERE 1=1");
        if let Some(booking_id) = booking_id {
            qb.push(" AND booking_id = ").push_bind(booking_id);
        }
        if let Some(status) = status {
            qb.push(" AND status = ").push_bind(status);
        }
        if let Some(paid_by) = paid_by {
            qb.push(" AND paid_by = ").push_bind(paid_by);
        }
        qb.push(" ORDER BY created_at DESC");
        qb.build_query_as::<Payment>().fetch_all(&self.pool).await
    }
}

// ── In-memory fake for unit tests ──

#[cfg(test)]
pub mod mem {
    use super::*;
    use crate::availability;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        apartments: Vec<Apartment>,
        bookings: Vec<Booking>,
        payments: Vec<Payment>,
        next_id: i64,
    }

    /// Mutex-guarded in-memory `LedgerStore`. The booking conflict guard
    /// runs under the lock, matching the atomicity of the SQL statement.
    #[derive(Default)]
    pub struct MemStore {
        inner: Mutex<Inner>,
    }

    impl MemStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn backdate_booking(&self, id: i64, created_at: &str) {
            let mut inner = self.inner.lock().unwrap();
            if let Some(b) = inner.bookings.iter_mut().find(|b| b.id == id) {
                b.created_at = created_at.to_string();
            }
        }

        fn next_id(inner: &mut Inner) -> i64 {
            inner.next_id += 1;
            inner.next_id
        }
    }

    const NOW: &str = "2024-06-01 12:00:00";

    #[async_trait]
    impl LedgerStore for MemStore {
        async fn insert_apartment(&self, new: &NewApartment) -> Result<Apartment, sqlx::Error> {
            let mut inner = self.inner.lock().unwrap();
            let id = Self::next_id(&mut inner);
            let apartment = Apartment {
                id,
                title: new.title.clone(),
                address: new.address.clone(),
                city: new.city.clone(),
                price_per_night: new.price_per_night,
                max_guests: new.max_guests,
                amenities: new.amenities.clone(),
                owner_id: new.owner_id.clone(),
                created_at: NOW.into(),
            };
            inner.apartments.push(apartment.clone());
            Ok(apartment)
        }

        async fn find_apartment(&self, id: i64) -> Result<Option<Apartment>, sqlx::Error> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.apartments.iter().find(|a| a.id == id).cloned())
        }

        async fn list_apartments(
            &self,
            city: Option<&str>,
            owner: Option<&str>,
        ) -> Result<Vec<Apartment>, sqlx::Error> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .apartments
                .iter()
                .filter(|a| city.is_none_or(|c| a.city == c))
                .filter(|a| owner.is_none_or(|o| a.owner_id == o))
                .cloned()
                .collect())
        }

        async fn update_apartment(
            &self,
            id: i64,
            patch: &ApartmentPatch,
        ) -> Result<Option<Apartment>, sqlx::Error> {
            let mut inner = self.inner.lock().unwrap();
            let Some(a) = inner.apartments.iter_mut().find(|a| a.id == id) else {
                return Ok(None);
            };
            if let Some(title) = &patch.title {
                a.title = title.clone();
            }
            if let Some(address) = &patch.address {
                a.address = address.clone();
            }
            if let Some(city) = &patch.city {
                a.city = city.clone();
            }
            if let Some(price) = patch.price_per_night {
                a.price_per_night = price;
            }
            if let Some(max_guests) = patch.max_guests {
                a.max_guests = max_guests;
            }
            if let Some(amenities) = &patch.amenities {
                a.amenities = amenities.clone();
            }
            Ok(Some(a.clone()))
        }

        async fn delete_apartment(&self, id: i64) -> Result<bool, sqlx::Error> {
            let mut inner = self.inner.lock().unwrap();
            let before = inner.apartments.len();
            inner.apartments.retain(|a| a.id != id);
            Ok(inner.apartments.len() < before)
        }

        async fn blocking_bookings(
            &self,
            apartment_id: i64,
        ) -> Result<Vec<Booking>, sqlx::Error> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .bookings
                .iter()
                .filter(|b| b.apartment_id == apartment_id && b.status.blocks_dates())
                .cloned()
                .collect())
        }

        async fn insert_booking_if_free(
            &self,
            new: &NewBooking,
        ) -> Result<Option<Booking>, sqlx::Error> {
            let mut inner = self.inner.lock().unwrap();
            let blocking: Vec<Booking> = inner
                .bookings
                .iter()
                .filter(|b| b.apartment_id == new.apartment_id && b.status.blocks_dates())
                .cloned()
                .collect();
            if !availability::is_range_available(new.check_in, new.check_out, &blocking) {
                return Ok(None);
            }

            let id = Self::next_id(&mut inner);
            let booking = Booking {
                id,
                apartment_id: new.apartment_id,
                created_by: new.created_by.clone(),
                check_in: new.check_in,
                check_out: new.check_out,
                guests: new.guests,
                total_price: new.total_price,
                status: BookingStatus::Pending,
                special_requests: new.special_requests.clone(),
                reminder_sent: false,
                created_at: NOW.into(),
                cancelled_at: None,
            };
            inner.bookings.push(booking.clone());
            Ok(Some(booking))
        }

        async fn find_booking(&self, id: i64) -> Result<Option<Booking>, sqlx::Error> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.bookings.iter().find(|b| b.id == id).cloned())
        }

        async fn list_bookings(
            &self,
            apartment_id: Option<i64>,
            created_by: Option<&str>,
        ) -> Result<Vec<Booking>, sqlx::Error> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .bookings
                .iter()
                .filter(|b| apartment_id.is_none_or(|id| b.apartment_id == id))
                .filter(|b| created_by.is_none_or(|c| b.created_by == c))
                .cloned()
                .collect())
        }

        async fn set_booking_status(
            &self,
            id: i64,
            from: &[BookingStatus],
            to: BookingStatus,
        ) -> Result<bool, sqlx::Error> {
            let mut inner = self.inner.lock().unwrap();
            let Some(b) = inner.bookings.iter_mut().find(|b| b.id == id) else {
                return Ok(false);
            };
            if !from.contains(&b.status) {
                return Ok(false);
            }
            b.status = to;
            if to == BookingStatus::Cancelled {
                b.cancelled_at = Some(NOW.into());
            }
            Ok(true)
        }

        async fn cancel_stale_pending(&self, cutoff: &str) -> Result<u64, sqlx::Error> {
            let mut inner = self.inner.lock().unwrap();
            let mut released = 0;
            for b in inner.bookings.iter_mut() {
                if b.status == BookingStatus::Pending && b.created_at.as_str() < cutoff {
                    b.status = BookingStatus::Cancelled;
                    b.cancelled_at = Some(NOW.into());
                    released += 1;
                }
            }
            Ok(released)
        }

        async fn insert_payment(&self, new: &NewPayment) -> Result<PaymentInsert, sqlx::Error> {
            let mut inner = self.inner.lock().unwrap();
            if new.status == PaymentStatus::Completed {
                if let Some(txn) = &new.provider_txn_id {
                    let duplicate = inner.payments.iter().any(|p| {
                        p.status == PaymentStatus::Completed
                            && p.provider_txn_id.as_deref() == Some(txn.as_str())
                    });
                    if duplicate {
                        return Ok(PaymentInsert::DuplicateTxn);
                    }
                }
            }

            let id = Self::next_id(&mut inner);
            let payment = Payment {
                id,
                booking_id: new.booking_id,
                amount: new.amount,
                payment_method: new.payment_method,
                status: new.status,
                provider_txn_id: new.provider_txn_id.clone(),
                paid_by: new.paid_by.clone(),
                created_at: NOW.into(),
            };
            inner.payments.push(payment.clone());
            Ok(PaymentInsert::Inserted(payment))
        }

        async fn find_payment(&self, id: i64) -> Result<Option<Payment>, sqlx::Error> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.payments.iter().find(|p| p.id == id).cloned())
        }

        async fn find_payment_by_txn(
            &self,
            txn_id: &str,
        ) -> Result<Option<Payment>, sqlx::Error> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .payments
                .iter()
                .find(|p| p.provider_txn_id.as_deref() == Some(txn_id))
                .cloned())
        }

        async fn list_payments(
            &self,
            booking_id: Option<i64>,
            status: Option<PaymentStatus>,
            paid_by: Option<&str>,
        ) -> Result<Vec<Payment>, sqlx::Error> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .payments
                .iter()
                .filter(|p| booking_id.is_none_or(|id| p.booking_id == id))
                .filter(|p| status.is_none_or(|s| p.status == s))
                .filter(|p| paid_by.is_none_or(|by| p.paid_by == by))
                .cloned()
                .collect())
        }
    }
}
