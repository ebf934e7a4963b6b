use crate::domain::commission::{DevelopmentSplit, RelationshipType};
use crate::domain::ids::{CompanyId, OwnerId, ParticipantId, PropertyId, TenantId};
use crate::domain::ports::PropertyRecord;
use crate::error::Result;
use crate::infrastructure::in_memory::InMemoryDirectory;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Deserialize)]
struct PropertyRow {
    property: String,
    #[serde(default)]
    tenant: Option<String>,
    #[serde(default)]
    owner: Option<String>,
    agent: String,
    #[serde(default)]
    rent: Option<Decimal>,
    #[serde(default)]
    commission_percent: Option<Decimal>,
    relationship: RelationshipType,
    #[serde(default)]
    creator: Option<String>,
    #[serde(default)]
    creator_percent: Option<Decimal>,
}

/// Builds an [`InMemoryDirectory`] from a property CSV.
///
/// Columns: `property,tenant,owner,agent,rent,commission_percent,relationship`, plus optional
/// `creator,creator_percent` for development stands. A property may appear on several rows to
/// list several tenants.
pub fn read_directory<R: Read>(source: R, company_id: &CompanyId) -> Result<InMemoryDirectory> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(source);

    let mut directory = InMemoryDirectory::new();
    for row in reader.deserialize::<PropertyRow>() {
        let row = row?;
        let development = row.creator.map(|creator| {
            let owner_percent = row.creator_percent.unwrap_or(Decimal::ONE_HUNDRED);
            DevelopmentSplit {
                creator_id: ParticipantId::new(creator),
                owner_percent,
                collaborator_percent: Decimal::ONE_HUNDRED - owner_percent,
            }
        });
        directory = directory.with_property(PropertyRecord {
            id: PropertyId::new(row.property),
            company_id: company_id.clone(),
            agent_id: ParticipantId::new(row.agent),
            owner_id: row.owner.map(OwnerId::new),
            monthly_rent: row.rent.unwrap_or_default(),
            commission_percent: row.commission_percent,
            relationship: row.relationship,
            development,
        });
        if let Some(tenant) = row.tenant {
            directory = directory.with_tenant(TenantId::new(tenant));
        }
    }
    Ok(directory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Directory;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_reads_properties_and_tenants() {
        let data = "property,tenant,owner,agent,rent,commission_percent,relationship,creator,creator_percent\n\
                    prop-1, tenant-1, owner-1, agent-1, 1000, 10, management,,\n\
                    stand-9, buyer-1, dev-1, agent-2, , 5, sale, agent-1, 60";
        let directory = read_directory(data.as_bytes(), &CompanyId::new("co-1")).unwrap();

        assert_eq!(directory.len(), 2);
        let rental = directory
            .property(&PropertyId::new("prop-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rental.monthly_rent, dec!(1000));
        assert!(directory.tenant_exists(&TenantId::new("buyer-1")).await.unwrap());

        let stand = directory
            .property(&PropertyId::new("stand-9"))
            .await
            .unwrap()
            .unwrap();
        let split = stand.development.unwrap();
        assert_eq!(split.owner_percent, dec!(60));
        assert_eq!(split.collaborator_percent, dec!(40));
    }
}
