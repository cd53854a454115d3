//! In-memory [`PaymentStore`] used by service tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{DatabaseError, NewPayment, PaymentRecord, PaymentStatus, PaymentStore};

#[derive(Default)]
pub struct MemoryStore {
    payments: Mutex<HashMap<Uuid, PaymentRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as-is, bypassing the `pending` default.
    pub fn put(&self, record: PaymentRecord) {
        self.payments.lock().unwrap().insert(record.id, record);
    }

    fn list_where(&self, keep: impl Fn(PaymentStatus) -> bool) -> Vec<PaymentRecord> {
        let mut records: Vec<_> = self
            .payments
            .lock()
            .unwrap()
            .values()
            .filter(|p| keep(p.status))
            .cloned()
            .collect();
        records.sort_by_key(|p| p.created_at);
        records
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment(&self, payment: NewPayment) -> Result<PaymentRecord, DatabaseError> {
        let mut payments = self.payments.lock().unwrap();

        if payments.values().any(|p| p.address == payment.address) {
            return Err(DatabaseError::Duplicate(format!(
                "payment address {}",
                payment.address
            )));
        }

        let now = Utc::now();
        let record = PaymentRecord {
            id: payment.id,
            address: payment.address,
            encrypted_key: payment.encrypted_key,
            amount_sats: payment.amount_sats,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
            expires_at: payment.expires_at,
        };
        payments.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self.payments.lock().unwrap().get(&id).cloned())
    }

    async fn list_open_payments(&self) -> Result<Vec<PaymentRecord>, DatabaseError> {
        Ok(self.list_where(|s| !s.is_terminal()))
    }

    async fn list_settled_payments(&self) -> Result<Vec<PaymentRecord>, DatabaseError> {
        Ok(self.list_where(|s| s.is_terminal()))
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<bool, DatabaseError> {
        let mut payments = self.payments.lock().unwrap();
        match payments.get_mut(&id) {
            Some(record) if record.status == from => {
                record.status = to;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}
