//! Payment state machine.
//!
//! `draft -> posted -> reversed`, `draft -> voided`. Posted payments are immutable: corrections
//! go through [`PaymentLifecycleManager::reverse`], which books a negated reversal entry and a
//! fresh correction draft in the same unit as the original's transition.

use super::atomic::{self, CommitMode};
use super::audit::AuditTrail;
use super::events::EventPropagator;
use super::ledger::LedgerPoster;
use super::validation;
use crate::config::EngineConfig;
use crate::domain::audit::AuditAction;
use crate::domain::commission::{
    CommissionBreakdown, CommissionCalculator, CommissionContext, CommissionRequest,
    CommissionSettings, IntroductionContext,
};
use crate::domain::ids::{CompanyId, PaymentId};
use crate::domain::payment::{
    FinalizeLinkage, Linkage, NewPayment, Payment, PaymentPatch, PaymentStatus, PostingStatus,
};
use crate::domain::ports::{
    Actor, CompanyConfig, DirectoryRef, EventSinkRef, PropertyRecord, StoreRef, Write,
};
use crate::error::{ConflictReason, PaymentError, Result, UniqueKey, ValidationError};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(Payment),
    /// The idempotency key was already used; the earlier payment is returned unchanged.
    Duplicate(Payment),
}

impl CreateOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            CreateOutcome::Created(p) | CreateOutcome::Duplicate(p) => p,
        }
    }

    pub fn into_payment(self) -> Payment {
        match self {
            CreateOutcome::Created(p) | CreateOutcome::Duplicate(p) => p,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, CreateOutcome::Duplicate(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReversalOutcome {
    pub original: Payment,
    pub reversal: Payment,
    pub correction_draft: Payment,
    pub commit_mode: CommitMode,
}

/// Orchestrates every payment mutation.
pub struct PaymentLifecycleManager {
    store: StoreRef,
    directory: DirectoryRef,
    ledger: LedgerPoster,
    audit: AuditTrail,
    events: EventPropagator,
    config: EngineConfig,
}

impl PaymentLifecycleManager {
    pub fn new(
        store: StoreRef,
        directory: DirectoryRef,
        sink: EventSinkRef,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger: LedgerPoster::new(store.clone(), config.read_timeout),
            audit: AuditTrail::new(store.clone()),
            events: EventPropagator::new(store.clone(), sink),
            store,
            directory,
            config,
        }
    }

    pub fn ledger(&self) -> &LedgerPoster {
        &self.ledger
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn events(&self) -> &EventPropagator {
        &self.events
    }

    /// Records a new payment. Completed, linked payments are posted immediately.
    pub async fn create(&self, input: NewPayment, actor: &Actor) -> Result<CreateOutcome> {
        validation::check_new_payment(&input)?;
        if input.company_id != actor.company_id {
            return Err(PaymentError::Forbidden(format!(
                "actor {} cannot record payments for company {}",
                actor.id, input.company_id
            )));
        }

        if let Some(key) = input.idempotency_key.as_deref()
            && let Some(existing) = self
                .store
                .payment_by_idempotency_key(&input.company_id, key)
                .await?
        {
            info!(payment_id = %existing.id, idempotency_key = %key, "duplicate submission");
            return Ok(CreateOutcome::Duplicate(existing));
        }

        let company = self.company_config(&input.company_id).await?;
        let property = self.resolve_linkage(&input.linkage).await?;
        let mut payment = self.draft_from(input, property.as_ref(), actor);
        let history = self.pair_history(&payment).await?;
        // A concurrent submission with the same key may have committed since the lookup above.
        if let Some(key) = payment.idempotency_key.as_deref()
            && let Some(existing) = history
                .iter()
                .find(|other| other.idempotency_key.as_deref() == Some(key))
        {
            info!(payment_id = %existing.id, idempotency_key = %key, "concurrent duplicate submission");
            return Ok(CreateOutcome::Duplicate(existing.clone()));
        }

        if let Some(property) = &property {
            validation::check_rental_schedule(&payment, property.monthly_rent, &history)?;
        }
        payment.commission = breakdown(&payment, property.as_ref(), &company.commission, &history);
        if payment.status == PaymentStatus::Completed && !payment.is_provisional() {
            payment.posting_status = PostingStatus::Posted;
        }

        let mut writes = vec![Write::InsertPayment(payment.clone())];
        if payment.posting_status == PostingStatus::Posted {
            writes.extend(LedgerPoster::posting_writes(&payment));
        }

        let committed = match atomic::commit(self.store.as_ref(), writes, "create").await {
            Ok(committed) => committed,
            Err(PaymentError::DuplicateKey(UniqueKey::Idempotency { company, key })) => {
                let existing = self
                    .store
                    .payment_by_idempotency_key(&company, &key)
                    .await?
                    .ok_or_else(|| PaymentError::internal("idempotency key without payment"))?;
                info!(payment_id = %existing.id, idempotency_key = %key, "concurrent duplicate submission");
                return Ok(CreateOutcome::Duplicate(existing));
            }
            Err(err) => return Err(err),
        };

        info!(
            payment_id = %payment.id,
            posting_status = payment.posting_status.as_str(),
            commission = %payment.commission.total_commission,
            mode = ?committed.mode,
            "payment created"
        );
        self.audit
            .record(AuditAction::Create, None, Some(&payment), None, actor)
            .await;
        if payment.posting_status == PostingStatus::Posted {
            self.after_post(&payment, actor).await;
        }
        Ok(CreateOutcome::Created(payment))
    }

    /// Links a provisional payment to its property and tenant and computes its real commission.
    pub async fn finalize(
        &self,
        id: &PaymentId,
        linkage: FinalizeLinkage,
        actor: &Actor,
    ) -> Result<Payment> {
        let mut payment = self.load(id, actor).await?;
        if !payment.is_provisional() {
            return Err(ConflictReason::NotProvisional.into());
        }
        if payment.posting_status != PostingStatus::Draft {
            return Err(ConflictReason::NotDraft.into());
        }
        let before = payment.clone();

        payment.linkage = Linkage::Linked {
            property_id: linkage.property_id,
            tenant_id: linkage.tenant_id,
        };
        payment.relationship = linkage.relationship;
        let property = self
            .resolve_linkage(&payment.linkage)
            .await?
            .ok_or_else(|| PaymentError::internal("linked payment without property"))?;
        payment.owner_id = linkage.owner_id.or_else(|| property.owner_id.clone());
        payment.in_suspense = false;
        payment.commission_finalized = true;

        let company = self.company_config(&payment.company_id).await?;
        let history = self.pair_history(&payment).await?;
        validation::check_rental_schedule(&payment, property.monthly_rent, &history)?;
        payment.commission = breakdown(&payment, Some(&property), &company.commission, &history);
        if payment.status == PaymentStatus::Completed {
            payment.posting_status = PostingStatus::Posted;
        }
        payment.updated_at = Utc::now();

        self.commit_draft_change(&payment, "finalize").await?;
        info!(
            payment_id = %payment.id,
            property_id = %property.id,
            posting_status = payment.posting_status.as_str(),
            "provisional payment finalized"
        );
        self.audit
            .record(
                AuditAction::Edit,
                Some(&before),
                Some(&payment),
                Some("finalized"),
                actor,
            )
            .await;
        if payment.posting_status == PostingStatus::Posted {
            self.after_post(&payment, actor).await;
        }
        Ok(payment)
    }

    /// Changes a draft. Moving it to `completed` posts it.
    pub async fn edit(&self, id: &PaymentId, patch: PaymentPatch, actor: &Actor) -> Result<Payment> {
        let mut payment = self.load(id, actor).await?;
        match payment.posting_status {
            PostingStatus::Draft => {}
            PostingStatus::Posted | PostingStatus::Reversed => {
                return Err(ConflictReason::PostedPaymentImmutable.into());
            }
            PostingStatus::Voided => return Err(ConflictReason::NotDraft.into()),
        }
        let before = payment.clone();
        patch.apply(&mut payment);
        validation::check_payment(&payment)?;

        let property = self.resolve_linkage(&payment.linkage).await?;
        let history = self.pair_history(&payment).await?;
        if let Some(property) = &property {
            validation::check_rental_schedule(&payment, property.monthly_rent, &history)?;
        }
        let company = self.company_config(&payment.company_id).await?;
        payment.commission = breakdown(&payment, property.as_ref(), &company.commission, &history);
        if payment.status == PaymentStatus::Completed && !payment.is_provisional() {
            payment.posting_status = PostingStatus::Posted;
        }
        payment.updated_at = Utc::now();

        self.commit_draft_change(&payment, "edit").await?;
        debug!(payment_id = %payment.id, posting_status = payment.posting_status.as_str(), "payment edited");
        self.audit
            .record(AuditAction::Edit, Some(&before), Some(&payment), None, actor)
            .await;
        if payment.posting_status == PostingStatus::Posted {
            self.after_post(&payment, actor).await;
        }
        Ok(payment)
    }

    pub async fn update_status(
        &self,
        id: &PaymentId,
        status: PaymentStatus,
        actor: &Actor,
    ) -> Result<Payment> {
        self.edit(id, PaymentPatch::status(status), actor).await
    }

    /// Reverses a posted payment.
    ///
    /// The reversal entry, the correction draft and the original's `posted -> reversed`
    /// transition commit as one unit. Ledger offsets, counters and the event follow the commit.
    pub async fn reverse(
        &self,
        id: &PaymentId,
        reason: &str,
        actor: &Actor,
    ) -> Result<ReversalOutcome> {
        if !actor.role.can_reverse() {
            return Err(PaymentError::Forbidden(format!(
                "role {:?} cannot reverse payments",
                actor.role
            )));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::MissingReason.into());
        }

        let original = self.load(id, actor).await?;
        if original.is_reversal_entry() {
            return Err(ConflictReason::ReversalEntry.into());
        }
        match original.posting_status {
            PostingStatus::Posted => {}
            PostingStatus::Reversed => return Err(ConflictReason::AlreadyReversed.into()),
            PostingStatus::Draft | PostingStatus::Voided => {
                return Err(ConflictReason::NotPosted.into());
            }
        }
        let company = self.company_config(&original.company_id).await?;
        if let Some(lock) = company.accounting_lock_date
            && original.payment_date < lock
        {
            return Err(ConflictReason::PeriodLocked(lock).into());
        }

        let now = Utc::now();
        let reversal = Payment {
            id: PaymentId::generate(),
            status: PaymentStatus::Completed,
            posting_status: PostingStatus::Posted,
            amount: -original.amount,
            deposit_amount: -original.deposit_amount,
            payment_date: now.date_naive(),
            commission: original.commission.negated(),
            idempotency_key: None,
            reversal_of_payment_id: Some(original.id.clone()),
            notes: Some(format!("Reversal of {}: {reason}", original.id)),
            ..self.fresh_copy(&original, actor)
        };

        let mut correction_draft = Payment {
            id: PaymentId::generate(),
            status: PaymentStatus::Pending,
            posting_status: PostingStatus::Draft,
            notes: Some(format!("Correction of {}", original.id)),
            ..self.fresh_copy(&original, actor)
        };
        correction_draft.commission = self
            .preview_commission(&correction_draft, &original, &company.commission)
            .await?;

        let mut reversed = original.clone();
        reversed.posting_status = PostingStatus::Reversed;
        reversed.reversal_payment_id = Some(reversal.id.clone());
        reversed.corrected_payment_id = Some(correction_draft.id.clone());
        reversed.reversed_at = Some(now);
        reversed.reversed_by = Some(actor.id.clone());
        reversed.reversal_reason = Some(reason.to_string());
        reversed.updated_at = now;

        let writes = vec![
            Write::InsertPayment(reversal.clone()),
            Write::InsertPayment(correction_draft.clone()),
            Write::TransitionPayment {
                payment: reversed.clone(),
                expected: PostingStatus::Posted,
            },
        ];
        let committed = match atomic::commit(self.store.as_ref(), writes, "reverse").await {
            Ok(committed) => committed,
            Err(PaymentError::DuplicateKey(UniqueKey::ReversalOf(_))) => {
                return Err(ConflictReason::AlreadyReversed.into());
            }
            Err(err) => return Err(err),
        };

        let offsets = self.ledger.propagate_reversal(&original, &reversal).await;
        info!(
            payment_id = %original.id,
            reversal_id = %reversal.id,
            correction_id = %correction_draft.id,
            ledger_offsets = offsets,
            mode = ?committed.mode,
            "payment reversed"
        );

        self.audit
            .record(
                AuditAction::Reverse,
                Some(&original),
                Some(&reversed),
                Some(reason),
                actor,
            )
            .await;
        self.audit
            .record(AuditAction::Create, None, Some(&reversal), Some(reason), actor)
            .await;
        self.audit
            .record(AuditAction::Create, None, Some(&correction_draft), Some(reason), actor)
            .await;
        self.events
            .payment_reversed(&reversed, &reversal, reason, actor)
            .await;

        Ok(ReversalOutcome {
            original: reversed,
            reversal,
            correction_draft,
            commit_mode: committed.mode,
        })
    }

    /// Abandons a draft. The record is kept for the audit history.
    pub async fn void(&self, id: &PaymentId, reason: &str, actor: &Actor) -> Result<Payment> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::MissingReason.into());
        }
        let mut payment = self.load(id, actor).await?;
        match payment.posting_status {
            PostingStatus::Draft => {}
            PostingStatus::Posted | PostingStatus::Reversed => {
                return Err(ConflictReason::PostedPaymentImmutable.into());
            }
            PostingStatus::Voided => return Err(ConflictReason::NotDraft.into()),
        }
        let before = payment.clone();
        payment.posting_status = PostingStatus::Voided;
        payment.updated_at = Utc::now();

        atomic::commit(
            self.store.as_ref(),
            vec![Write::TransitionPayment {
                payment: payment.clone(),
                expected: PostingStatus::Draft,
            }],
            "void",
        )
        .await?;
        info!(payment_id = %payment.id, reason, "payment voided");
        self.audit
            .record(AuditAction::Void, Some(&before), Some(&payment), Some(reason), actor)
            .await;
        Ok(payment)
    }

    /// Removes a draft or voided payment. Anything that reached the ledger stays.
    pub async fn delete(&self, id: &PaymentId, actor: &Actor) -> Result<()> {
        let payment = self.load(id, actor).await?;
        if !matches!(
            payment.posting_status,
            PostingStatus::Draft | PostingStatus::Voided
        ) {
            return Err(ConflictReason::PostedPaymentImmutable.into());
        }
        self.store.remove_payment(&payment.id).await?;
        info!(payment_id = %payment.id, "payment deleted");
        self.audit
            .record(AuditAction::Delete, Some(&payment), None, None, actor)
            .await;
        Ok(())
    }

    pub async fn payment(&self, id: &PaymentId, actor: &Actor) -> Result<Payment> {
        self.load(id, actor).await
    }

    /// Looks a payment up by the idempotency key it was created with.
    pub async fn payment_by_key(&self, key: &str, actor: &Actor) -> Result<Payment> {
        self.store
            .payment_by_idempotency_key(&actor.company_id, key)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payment with key {key}")))
    }

    async fn load(&self, id: &PaymentId, actor: &Actor) -> Result<Payment> {
        match self.store.payment(id).await? {
            Some(payment) if payment.company_id == actor.company_id => Ok(payment),
            _ => Err(PaymentError::NotFound(format!("payment {id}"))),
        }
    }

    async fn company_config(&self, company_id: &CompanyId) -> Result<CompanyConfig> {
        match self.directory.company_config(company_id).await {
            Ok(config) => Ok(config),
            Err(PaymentError::NotFound(_)) => Ok(self.config.company_defaults.clone()),
            Err(err) => Err(err),
        }
    }

    async fn resolve_linkage(&self, linkage: &Linkage) -> Result<Option<PropertyRecord>> {
        let Linkage::Linked {
            property_id,
            tenant_id,
        } = linkage
        else {
            return Ok(None);
        };
        let property = self
            .directory
            .property(property_id)
            .await?
            .ok_or_else(|| ValidationError::UnknownProperty(property_id.to_string()))?;
        if !self.directory.tenant_exists(tenant_id).await? {
            return Err(ValidationError::UnknownTenant(tenant_id.to_string()).into());
        }
        Ok(Some(property))
    }

    async fn pair_history(&self, payment: &Payment) -> Result<Vec<Payment>> {
        match (payment.linkage.property_id(), payment.linkage.tenant_id()) {
            (Some(property_id), Some(tenant_id)) => {
                self.store
                    .payments_for_pair(&payment.company_id, property_id, tenant_id)
                    .await
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Commits a draft's new state, with its postings when it became posted.
    async fn commit_draft_change(&self, payment: &Payment, operation: &'static str) -> Result<()> {
        let mut writes = vec![Write::TransitionPayment {
            payment: payment.clone(),
            expected: PostingStatus::Draft,
        }];
        if payment.posting_status == PostingStatus::Posted {
            writes.extend(LedgerPoster::posting_writes(payment));
        }
        atomic::commit(self.store.as_ref(), writes, operation).await?;
        Ok(())
    }

    async fn after_post(&self, payment: &Payment, actor: &Actor) {
        self.audit
            .record(AuditAction::Post, None, Some(payment), None, actor)
            .await;
        self.events.payment_confirmed(payment, actor).await;
    }

    /// Commission the correction draft would carry once completed.
    async fn preview_commission(
        &self,
        draft: &Payment,
        original: &Payment,
        settings: &CommissionSettings,
    ) -> Result<CommissionBreakdown> {
        let property = match draft.linkage.property_id() {
            Some(property_id) => self.directory.property(property_id).await?,
            None => None,
        };
        if draft.linkage.property_id().is_some() && property.is_none() {
            warn!(payment_id = %draft.id, "property missing while previewing correction commission");
        }
        let history: Vec<Payment> = self
            .pair_history(draft)
            .await?
            .into_iter()
            .filter(|p| p.id != original.id)
            .collect();
        let completed = Payment {
            status: PaymentStatus::Completed,
            ..draft.clone()
        };
        Ok(breakdown(&completed, property.as_ref(), settings, &history))
    }

    fn draft_from(
        &self,
        input: NewPayment,
        property: Option<&PropertyRecord>,
        actor: &Actor,
    ) -> Payment {
        let now = Utc::now();
        let provisional = input.linkage.is_provisional();
        Payment {
            id: PaymentId::generate(),
            company_id: input.company_id,
            relationship: input.relationship,
            status: input.status,
            posting_status: PostingStatus::Draft,
            amount: input.amount,
            deposit_amount: input.deposit_amount,
            currency: input.currency,
            payment_date: input.payment_date,
            participant_id: input.participant_id,
            linkage: input.linkage,
            owner_id: property.and_then(|p| p.owner_id.clone()),
            rental_period: input.rental_period,
            advance_months: input.advance_months,
            reference: input.reference,
            vat: input.vat,
            commission: CommissionBreakdown::zero(input.amount),
            commission_finalized: !provisional,
            in_suspense: provisional,
            idempotency_key: input.idempotency_key,
            reversal_of_payment_id: None,
            reversal_payment_id: None,
            corrected_payment_id: None,
            reversed_at: None,
            reversed_by: None,
            reversal_reason: None,
            confirmed_emitted_at: None,
            reversed_emitted_at: None,
            created_by: actor.id.clone(),
            created_at: now,
            updated_at: now,
            notes: input.notes,
        }
    }

    /// Copy of `original` stripped of identity, links and markers.
    fn fresh_copy(&self, original: &Payment, actor: &Actor) -> Payment {
        let now = Utc::now();
        Payment {
            idempotency_key: None,
            reversal_of_payment_id: None,
            reversal_payment_id: None,
            corrected_payment_id: None,
            reversed_at: None,
            reversed_by: None,
            reversal_reason: None,
            confirmed_emitted_at: None,
            reversed_emitted_at: None,
            created_by: actor.id.clone(),
            created_at: now,
            updated_at: now,
            ..original.clone()
        }
    }
}

/// Commission for `payment` given its property and the pair's payment history.
fn breakdown(
    payment: &Payment,
    property: Option<&PropertyRecord>,
    settings: &CommissionSettings,
    history: &[Payment],
) -> CommissionBreakdown {
    if payment.is_provisional() {
        return CommissionBreakdown::zero(payment.amount);
    }
    let already_charged = history
        .iter()
        .any(|other| other.id != payment.id && other.charged_introduction());
    let request = CommissionRequest {
        gross_amount: payment.amount,
        deposit_amount: payment.deposit_amount,
        relationship: payment.relationship,
        commission_percent: property.and_then(|p| p.commission_percent),
        settings,
        vat: payment.vat,
        context: CommissionContext {
            agent_id: &payment.participant_id,
            completed: payment.status == PaymentStatus::Completed,
            provisional: false,
            introduction: property.map(|p| IntroductionContext {
                monthly_rent: p.monthly_rent.max(Decimal::ZERO),
                already_charged,
            }),
            development: property.and_then(|p| p.development.as_ref()),
        },
    };
    CommissionCalculator::compute(&request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::commission::RelationshipType;
    use crate::domain::ids::{OwnerId, ParticipantId, PropertyId, TenantId};
    use crate::domain::payment::RentalPeriod;
    use crate::domain::ports::Role;
    use crate::infrastructure::in_memory::{InMemoryDirectory, InMemoryStore, RecordingSink};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn actor(role: Role) -> Actor {
        Actor {
            id: ParticipantId::new("user-1"),
            company_id: CompanyId::new("co-1"),
            role,
        }
    }

    fn manager() -> PaymentLifecycleManager {
        let directory = InMemoryDirectory::new()
            .with_property(PropertyRecord {
                id: PropertyId::new("prop-1"),
                company_id: CompanyId::new("co-1"),
                agent_id: ParticipantId::new("agent-1"),
                owner_id: Some(OwnerId::new("owner-1")),
                monthly_rent: dec!(1000),
                commission_percent: Some(dec!(10)),
                relationship: RelationshipType::Management,
                development: None,
            })
            .with_tenant(TenantId::new("tenant-1"));
        PaymentLifecycleManager::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(directory),
            Arc::new(RecordingSink::new()),
            EngineConfig::default(),
        )
    }

    fn rent(status: PaymentStatus) -> NewPayment {
        NewPayment {
            company_id: CompanyId::new("co-1"),
            relationship: RelationshipType::Management,
            status,
            amount: dec!(1000),
            deposit_amount: Decimal::ZERO,
            currency: "USD".to_string(),
            payment_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            participant_id: ParticipantId::new("agent-1"),
            linkage: Linkage::Linked {
                property_id: PropertyId::new("prop-1"),
                tenant_id: TenantId::new("tenant-1"),
            },
            rental_period: Some(RentalPeriod::new(2025, 3)),
            advance_months: 1,
            reference: "RCPT-1".to_string(),
            vat: Default::default(),
            idempotency_key: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_completed_payment_is_posted_with_breakdown() {
        let manager = manager();
        let payment = manager
            .create(rent(PaymentStatus::Completed), &actor(Role::Agent))
            .await
            .unwrap()
            .into_payment();

        assert_eq!(payment.posting_status, PostingStatus::Posted);
        assert_eq!(payment.commission.total_commission, dec!(100));
        assert_eq!(payment.commission.agent_share, dec!(58.2));
        let balance = manager
            .ledger()
            .balance(&ParticipantId::new("agent-1"))
            .await
            .unwrap();
        assert_eq!(balance.value(), dec!(58.2));
    }

    #[tokio::test]
    async fn test_pending_payment_stays_draft_until_completed() {
        let manager = manager();
        let actor = actor(Role::Agent);
        let draft = manager
            .create(rent(PaymentStatus::Pending), &actor)
            .await
            .unwrap()
            .into_payment();
        assert_eq!(draft.posting_status, PostingStatus::Draft);

        let posted = manager
            .update_status(&draft.id, PaymentStatus::Completed, &actor)
            .await
            .unwrap();
        assert_eq!(posted.posting_status, PostingStatus::Posted);

        let err = manager
            .update_status(&draft.id, PaymentStatus::Failed, &actor)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::Conflict(ConflictReason::PostedPaymentImmutable)
        ));
    }

    #[tokio::test]
    async fn test_unknown_property_is_a_validation_error() {
        let manager = manager();
        let mut input = rent(PaymentStatus::Completed);
        input.linkage = Linkage::Linked {
            property_id: PropertyId::new("nowhere"),
            tenant_id: TenantId::new("tenant-1"),
        };
        let err = manager.create(input, &actor(Role::Agent)).await.unwrap_err();
        assert!(matches!(
            err,
            PaymentError::ValidationError(ValidationError::UnknownProperty(_))
        ));
    }

    #[tokio::test]
    async fn test_void_then_delete_draft() {
        let manager = manager();
        let actor = actor(Role::Agent);
        let draft = manager
            .create(rent(PaymentStatus::Pending), &actor)
            .await
            .unwrap()
            .into_payment();

        assert!(matches!(
            manager.void(&draft.id, "  ", &actor).await,
            Err(PaymentError::ValidationError(ValidationError::MissingReason))
        ));
        let voided = manager.void(&draft.id, "entered twice", &actor).await.unwrap();
        assert_eq!(voided.posting_status, PostingStatus::Voided);

        manager.delete(&draft.id, &actor).await.unwrap();
        assert!(matches!(
            manager.payment(&draft.id, &actor).await,
            Err(PaymentError::NotFound(_))
        ));
        let history = manager.audit().history(&draft.id).await.unwrap();
        let actions: Vec<AuditAction> = history.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::Create, AuditAction::Void, AuditAction::Delete]
        );
    }

    #[tokio::test]
    async fn test_other_company_cannot_see_payment() {
        let manager = manager();
        let payment = manager
            .create(rent(PaymentStatus::Pending), &actor(Role::Agent))
            .await
            .unwrap()
            .into_payment();
        let outsider = Actor {
            company_id: CompanyId::new("co-2"),
            ..actor(Role::Admin)
        };
        assert!(matches!(
            manager.payment(&payment.id, &outsider).await,
            Err(PaymentError::NotFound(_))
        ));
    }
}
