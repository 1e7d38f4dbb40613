use crate::domain::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Holder of a single area claim against a physical block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ClaimOwner {
    Direct,
    Virtual(String),
}

impl fmt::Display for ClaimOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct planting"),
            Self::Virtual(id) => write!(f, "virtual block {id}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AreaClaim {
    pub owner: ClaimOwner,
    pub area_m2: f64,
}

/// Area budget of one physical block. Committed area is the sum of the claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AreaLedger {
    block_id: String,
    total_area_m2: f64,
    claims: Vec<AreaClaim>,
}

impl AreaLedger {
    pub fn new(block_id: impl Into<String>, total_area_m2: f64) -> Result<Self, DomainError> {
        validate_area(total_area_m2, "block.total_area_m2")?;
        Ok(Self {
            block_id: block_id.into(),
            total_area_m2,
            claims: Vec::new(),
        })
    }

    pub fn total_area(&self) -> f64 {
        self.total_area_m2
    }

    pub fn committed_area(&self) -> f64 {
        self.claims.iter().map(|claim| claim.area_m2).sum()
    }

    pub fn available_area(&self) -> f64 {
        self.total_area_m2 - self.committed_area()
    }

    pub fn utilization(&self) -> f64 {
        self.committed_area() / self.total_area_m2
    }

    pub fn claim(&self, owner: &ClaimOwner) -> Option<f64> {
        self.claims
            .iter()
            .find(|claim| &claim.owner == owner)
            .map(|claim| claim.area_m2)
    }

    /// Dry-run of [`AreaLedger::reserve`] that never records a claim.
    pub fn check_reserve(&self, amount: f64) -> Result<(), DomainError> {
        validate_area(amount, "reservation amount")?;
        let committed = self.committed_area();
        if committed + amount > self.total_area_m2 {
            return Err(DomainError::InsufficientArea {
                block_id: self.block_id.clone(),
                requested: amount,
                available: self.total_area_m2 - committed,
            });
        }
        Ok(())
    }

    pub fn reserve(&mut self, owner: ClaimOwner, amount: f64) -> Result<(), DomainError> {
        if self.claim(&owner).is_some() {
            return Err(DomainError::LedgerViolation {
                block_id: self.block_id.clone(),
                reason: format!("{owner} already holds a claim"),
            });
        }
        self.check_reserve(amount)?;
        self.claims.push(AreaClaim {
            owner,
            area_m2: amount,
        });
        Ok(())
    }

    pub fn release(&mut self, owner: &ClaimOwner, amount: f64) -> Result<(), DomainError> {
        let Some(position) = self.claims.iter().position(|claim| &claim.owner == owner) else {
            return Err(DomainError::LedgerViolation {
                block_id: self.block_id.clone(),
                reason: format!("{owner} holds no claim to release"),
            });
        };
        let held = self.claims[position].area_m2;
        if held != amount {
            return Err(DomainError::LedgerViolation {
                block_id: self.block_id.clone(),
                reason: format!("{owner} holds {held:.2} m2 but release requested {amount:.2} m2"),
            });
        }
        self.claims.remove(position);
        Ok(())
    }

    pub fn set_total_area(&mut self, total_area_m2: f64) -> Result<(), DomainError> {
        validate_area(total_area_m2, "block.total_area_m2")?;
        let committed = self.committed_area();
        if total_area_m2 < committed {
            return Err(DomainError::validation(format!(
                "block {} has {committed:.2} m2 committed; total area {total_area_m2:.2} m2 is too small",
                self.block_id
            )));
        }
        self.total_area_m2 = total_area_m2;
        Ok(())
    }
}

fn validate_area(value: f64, field_name: &str) -> Result<(), DomainError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(DomainError::validation(format!(
            "{field_name} must be a positive number of m2"
        )));
    }
    Ok(())
}
