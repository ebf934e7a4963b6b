#![allow(dead_code)]

use chrono::NaiveDate;
use commission_ledger::application::lifecycle::PaymentLifecycleManager;
use commission_ledger::config::EngineConfig;
use commission_ledger::domain::commission::{DevelopmentSplit, RelationshipType};
use commission_ledger::domain::ids::{CompanyId, OwnerId, ParticipantId, PropertyId, TenantId};
use commission_ledger::domain::payment::{Linkage, NewPayment, PaymentStatus, RentalPeriod};
use commission_ledger::domain::ports::{Actor, CompanyConfig, PropertyRecord, Role};
use commission_ledger::infrastructure::in_memory::{InMemoryDirectory, InMemoryStore, RecordingSink};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub const COMPANY: &str = "co-1";

pub fn company() -> CompanyId {
    CompanyId::new(COMPANY)
}

pub fn agent(id: &str) -> ParticipantId {
    ParticipantId::new(id)
}

pub fn actor(role: Role) -> Actor {
    Actor {
        id: ParticipantId::new("clerk-1"),
        company_id: company(),
        role,
    }
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn property(
    id: &str,
    agent_id: &str,
    rent: Decimal,
    relationship: RelationshipType,
    percent: Decimal,
) -> PropertyRecord {
    PropertyRecord {
        id: PropertyId::new(id),
        company_id: company(),
        agent_id: agent(agent_id),
        owner_id: Some(OwnerId::new(format!("owner-of-{id}"))),
        monthly_rent: rent,
        commission_percent: Some(percent),
        relationship,
        development: None,
    }
}

/// Directory used across the integration tests:
///
/// * `prop-1`: management, rent 1000 at 10%
/// * `prop-2`: management, rent 200 at 10%
/// * `intro-1`: introduction, rent 500 at 10%
/// * `stand-1`: sale at 5%, development created by `agent-1` with a 60/40 split
pub fn directory() -> InMemoryDirectory {
    let mut stand = property("stand-1", "agent-2", Decimal::ZERO, RelationshipType::Sale, dec!(5));
    stand.development = Some(DevelopmentSplit {
        creator_id: agent("agent-1"),
        owner_percent: dec!(60),
        collaborator_percent: dec!(40),
    });

    InMemoryDirectory::new()
        .with_property(property(
            "prop-1",
            "agent-1",
            dec!(1000),
            RelationshipType::Management,
            dec!(10),
        ))
        .with_property(property(
            "prop-2",
            "agent-1",
            dec!(200),
            RelationshipType::Management,
            dec!(10),
        ))
        .with_property(property(
            "intro-1",
            "agent-1",
            dec!(500),
            RelationshipType::Introduction,
            dec!(10),
        ))
        .with_property(stand)
        .with_tenant(TenantId::new("tenant-1"))
        .with_tenant(TenantId::new("tenant-2"))
        .with_tenant(TenantId::new("buyer-1"))
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub sink: Arc<RecordingSink>,
    pub manager: PaymentLifecycleManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(InMemoryStore::new(), RecordingSink::new(), directory())
    }

    pub fn with_store(store: InMemoryStore) -> Self {
        Self::build(store, RecordingSink::new(), directory())
    }

    pub fn with_sink(sink: RecordingSink) -> Self {
        Self::build(InMemoryStore::new(), sink, directory())
    }

    pub fn with_company_config(config: CompanyConfig) -> Self {
        Self::build(
            InMemoryStore::new(),
            RecordingSink::new(),
            directory().with_company(company(), config),
        )
    }

    fn build(store: InMemoryStore, sink: RecordingSink, directory: InMemoryDirectory) -> Self {
        let store = Arc::new(store);
        let sink = Arc::new(sink);
        let manager = PaymentLifecycleManager::new(
            store.clone(),
            Arc::new(directory),
            sink.clone(),
            EngineConfig::default(),
        );
        Self {
            store,
            sink,
            manager,
        }
    }
}

/// A completed single-month rent payment for `property`/`tenant-1`.
pub fn rent_payment(property: &str, amount: Decimal, period: (i32, u32)) -> NewPayment {
    NewPayment {
        company_id: company(),
        relationship: RelationshipType::Management,
        status: PaymentStatus::Completed,
        amount,
        deposit_amount: Decimal::ZERO,
        currency: "USD".to_string(),
        payment_date: date(period.0, period.1, 5),
        participant_id: agent("agent-1"),
        linkage: Linkage::Linked {
            property_id: PropertyId::new(property),
            tenant_id: TenantId::new("tenant-1"),
        },
        rental_period: Some(RentalPeriod::new(period.0, period.1)),
        advance_months: 1,
        reference: format!("RCPT-{property}-{}-{}", period.0, period.1),
        vat: Default::default(),
        idempotency_key: None,
        notes: None,
    }
}

pub fn sale_payment(amount: Decimal) -> NewPayment {
    NewPayment {
        relationship: RelationshipType::Sale,
        participant_id: agent("agent-2"),
        linkage: Linkage::Linked {
            property_id: PropertyId::new("stand-1"),
            tenant_id: TenantId::new("buyer-1"),
        },
        rental_period: None,
        reference: "SALE-1".to_string(),
        ..rent_payment("stand-1", amount, (2025, 3))
    }
}

pub fn provisional_payment(amount: Decimal) -> NewPayment {
    NewPayment {
        linkage: Linkage::Provisional {
            manual_address: "12 Unknown Road".to_string(),
            manual_name: "J. Doe".to_string(),
        },
        reference: "SUSPENSE-1".to_string(),
        ..rent_payment("prop-1", amount, (2025, 3))
    }
}
