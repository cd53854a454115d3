//! Fixtures shared by the service tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::chain::fake::FakeChain;
use crate::db::memory::MemoryStore;
use crate::db::{NewPayment, PaymentRecord, PaymentStore};
use crate::vault::{address, KeyVault, MasterKey, Network};

pub const MASTER_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
pub const MAIN_ADDRESS: &str = "ltc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qmu8tk5";

pub fn vault() -> KeyVault {
    KeyVault::new(&MasterKey::from_hex(MASTER_HEX).unwrap(), Network::Mainnet)
}

pub fn txid(n: u8) -> String {
    format!("{:02x}", n).repeat(32)
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub chain: Arc<FakeChain>,
    pub vault: KeyVault,
}

impl Fixture {
    pub fn new(tip: u64) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            chain: Arc::new(FakeChain::new(tip)),
            vault: vault(),
        }
    }

    /// Issue and store a pending payment with a real key.
    pub async fn payment(&self, amount_sats: i64, expires_at: Option<DateTime<Utc>>) -> PaymentRecord {
        let issued = self.vault.create_address().unwrap();
        self.store
            .insert_payment(NewPayment {
                id: Uuid::new_v4(),
                address: issued.address,
                encrypted_key: issued.encrypted_key,
                amount_sats,
                expires_at,
            })
            .await
            .unwrap()
    }

    pub async fn reload(&self, payment: &PaymentRecord) -> PaymentRecord {
        self.store.get_payment(payment.id).await.unwrap().unwrap()
    }
}

pub fn script_hash_of(payment: &PaymentRecord) -> String {
    address::address_script_hash(&payment.address, Network::Mainnet).unwrap()
}
