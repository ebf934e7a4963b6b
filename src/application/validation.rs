//! Input and rental-schedule checks run before anything is written.

use crate::domain::commission::RelationshipType;
use crate::domain::payment::{Linkage, NewPayment, Payment, RentalPeriod};
use crate::error::ValidationError;
use rust_decimal::Decimal;

type Checked = std::result::Result<(), ValidationError>;

/// Field-level validation of a create request.
pub fn check_new_payment(input: &NewPayment) -> Checked {
    if input.company_id.is_blank() {
        return Err(ValidationError::InvalidId("companyId"));
    }
    if input.participant_id.is_blank() {
        return Err(ValidationError::MissingField("participantId"));
    }
    if input.currency.trim().is_empty() {
        return Err(ValidationError::MissingField("currency"));
    }
    check_linkage(&input.linkage)?;
    check_amounts(input.amount, input.deposit_amount)?;
    check_schedule_fields(input.advance_months, input.rental_period)?;
    if input.advance_months > 1 && input.rental_period.is_none() {
        return Err(ValidationError::MissingField("rentalPeriod"));
    }
    Ok(())
}

/// Re-validates a draft after a patch has been applied.
pub fn check_payment(payment: &Payment) -> Checked {
    if payment.participant_id.is_blank() {
        return Err(ValidationError::MissingField("participantId"));
    }
    if payment.currency.trim().is_empty() {
        return Err(ValidationError::MissingField("currency"));
    }
    check_amounts(payment.amount, payment.deposit_amount)?;
    check_schedule_fields(payment.advance_months, payment.rental_period)?;
    if payment.advance_months > 1 && payment.rental_period.is_none() {
        return Err(ValidationError::MissingField("rentalPeriod"));
    }
    Ok(())
}

fn check_linkage(linkage: &Linkage) -> Checked {
    match linkage {
        Linkage::Linked {
            property_id,
            tenant_id,
        } => {
            if property_id.is_blank() {
                return Err(ValidationError::InvalidId("propertyId"));
            }
            if tenant_id.is_blank() {
                return Err(ValidationError::InvalidId("tenantId"));
            }
        }
        Linkage::Provisional {
            manual_address,
            manual_name,
        } => {
            if manual_address.trim().is_empty() {
                return Err(ValidationError::MissingField("manualAddress"));
            }
            if manual_name.trim().is_empty() {
                return Err(ValidationError::MissingField("manualName"));
            }
        }
    }
    Ok(())
}

/// A payment must move money: a positive amount, or a deposit-only receipt.
pub fn check_amounts(amount: Decimal, deposit_amount: Decimal) -> Checked {
    if deposit_amount < Decimal::ZERO || amount < Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount);
    }
    if amount.is_zero() && deposit_amount.is_zero() {
        return Err(ValidationError::NonPositiveAmount);
    }
    Ok(())
}

fn check_schedule_fields(advance_months: u32, period: Option<RentalPeriod>) -> Checked {
    if advance_months < 1 {
        return Err(ValidationError::InvalidAdvanceMonths);
    }
    match period {
        Some(period) if !period.is_valid() => {
            Err(ValidationError::InvalidRentalPeriod(period.month))
        }
        _ => Ok(()),
    }
}

/// Checks a rental payment against the pair's existing payments.
///
/// Advance payments must equal `monthly_rent * advance_months` and may not overlap any active
/// payment. Single-month payments may not exceed what is still owed for their month. `history`
/// may contain `payment` itself; it is ignored.
pub fn check_rental_schedule(payment: &Payment, monthly_rent: Decimal, history: &[Payment]) -> Checked {
    if payment.relationship == RelationshipType::Sale
        || monthly_rent <= Decimal::ZERO
        || payment.amount <= Decimal::ZERO
    {
        return Ok(());
    }
    let Some((start, end)) = payment.covered_months() else {
        return Ok(());
    };
    let others: Vec<&Payment> = history
        .iter()
        .filter(|other| other.id != payment.id && other.is_active())
        .collect();

    if payment.advance_months > 1 {
        let expected = monthly_rent * Decimal::from(payment.advance_months);
        if payment.amount != expected {
            return Err(ValidationError::AdvanceAmountMismatch {
                expected,
                actual: payment.amount,
            });
        }
        let overlaps = others.iter().any(|other| {
            other
                .covered_months()
                .is_some_and(|(s, e)| s < end && start < e)
        });
        if overlaps {
            return Err(ValidationError::OverlappingAdvancePeriod);
        }
        return Ok(());
    }

    let inside_advance = others.iter().any(|other| {
        other.advance_months > 1
            && other
                .covered_months()
                .is_some_and(|(s, e)| s <= start && start < e)
    });
    if inside_advance {
        return Err(ValidationError::OverlappingAdvancePeriod);
    }

    let paid: Decimal = others
        .iter()
        .filter(|other| other.advance_months <= 1 && other.covered_months().map(|(s, _)| s) == Some(start))
        .map(|other| other.amount)
        .sum();
    let remaining = (monthly_rent - paid).max(Decimal::ZERO);
    if payment.amount > remaining {
        return Err(ValidationError::ExceedsRemainingBalance {
            requested: payment.amount,
            remaining,
        });
    }
    Ok(())
}
