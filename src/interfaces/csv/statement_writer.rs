use crate::application::ledger::AgentStatement;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct StatementRow<'a> {
    agent: &'a str,
    commissions: Decimal,
    payouts: Decimal,
    penalties: Decimal,
    adjustments: Decimal,
    balance: Decimal,
}

/// Writes one summary row per agent ledger.
pub struct StatementWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> StatementWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_statements(&mut self, statements: &[AgentStatement]) -> Result<()> {
        for statement in statements {
            self.writer.serialize(StatementRow {
                agent: statement.participant_id.as_str(),
                commissions: statement.total_commissions.value().normalize(),
                payouts: statement.total_payouts.value().normalize(),
                penalties: statement.total_penalties.value().normalize(),
                adjustments: statement.total_adjustments.value().normalize(),
                balance: statement.running_balance.value().normalize(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
