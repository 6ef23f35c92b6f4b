use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clientdesk_core::{ClientId, DomainError, DomainResult, UserId};

/// Longest accepted client name (matches the `varchar(255)` column).
pub const MAX_NAME_LEN: usize = 255;

/// Largest amount representable as `numeric(15, 2)`.
pub const MAX_AMOUNT: f64 = 9_999_999_999_999.99;

/// A client record owned by the user who created it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub salary: f64,
    pub company_value: f64,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for creating a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClient {
    pub name: String,
    pub salary: f64,
    pub company_value: f64,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPatch {
    pub name: Option<String>,
    pub salary: Option<f64>,
    pub company_value: Option<f64>,
}

impl Client {
    /// Validate `input` and build a new client created by `created_by`.
    pub fn create(input: NewClient, created_by: UserId, now: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            id: ClientId::new(),
            name: validate_name(&input.name)?,
            salary: validate_amount("salary", input.salary)?,
            company_value: validate_amount("companyValue", input.company_value)?,
            created_by,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    /// Apply a partial update. Nothing changes unless every field validates.
    pub fn apply(&mut self, patch: ClientPatch, now: DateTime<Utc>) -> DomainResult<()> {
        if self.is_deleted() {
            return Err(DomainError::NotFound);
        }

        let name = patch.name.as_deref().map(validate_name).transpose()?;
        let salary = patch
            .salary
            .map(|v| validate_amount("salary", v))
            .transpose()?;
        let company_value = patch
            .company_value
            .map(|v| validate_amount("companyValue", v))
            .transpose()?;

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(salary) = salary {
            self.salary = salary;
        }
        if let Some(company_value) = company_value {
            self.company_value = company_value;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Mark the client as deleted; deleted clients are hidden from reads.
    pub fn soft_delete(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.is_deleted() {
            return Err(DomainError::NotFound);
        }
        self.deleted_at = Some(now);
        Ok(())
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

fn validate_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::validation(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

/// Amounts are non-negative and stored with two decimal places.
fn validate_amount(field: &str, value: f64) -> DomainResult<f64> {
    if !value.is_finite() {
        return Err(DomainError::validation(format!("{field} must be a number")));
    }
    if value < 0.0 {
        return Err(DomainError::validation(format!("{field} must not be negative")));
    }
    if value > MAX_AMOUNT {
        return Err(DomainError::validation(format!("{field} is too large")));
    }
    Ok((value * 100.0).round() / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn new_client() -> NewClient {
        NewClient {
            name: "Acme Ltd".to_string(),
            salary: 1000.0,
            company_value: 25_000.5,
        }
    }

    #[test]
    fn create_sets_owner_and_timestamps() {
        let owner = UserId::new();
        let now = Utc::now();
        let client = Client::create(new_client(), owner, now).unwrap();

        assert_eq!(client.created_by, owner);
        assert_eq!(client.created_at, now);
        assert_eq!(client.updated_at, now);
        assert!(!client.is_deleted());
    }

    #[test]
    fn create_rejects_blank_name() {
        let mut input = new_client();
        input.name = "  ".to_string();
        assert!(matches!(
            Client::create(input, UserId::new(), Utc::now()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn amounts_are_rounded_to_cents() {
        let mut input = new_client();
        input.salary = 10.005_1;
        let client = Client::create(input, UserId::new(), Utc::now()).unwrap();
        assert_eq!(client.salary, 10.01);
    }

    #[test]
    fn patch_is_all_or_nothing() {
        let mut client = Client::create(new_client(), UserId::new(), Utc::now()).unwrap();
        let before = client.clone();

        let err = client.apply(
            ClientPatch {
                name: Some("Renamed".to_string()),
                salary: Some(-1.0),
                company_value: None,
            },
            Utc::now(),
        );

        assert!(err.is_err());
        assert_eq!(client, before);
    }

    #[test]
    fn patch_updates_only_given_fields() {
        let mut client = Client::create(new_client(), UserId::new(), Utc::now()).unwrap();
        client
            .apply(
                ClientPatch {
                    salary: Some(2000.0),
                    ..ClientPatch::default()
                },
                Utc::now(),
            )
            .unwrap();

        assert_eq!(client.name, "Acme Ltd");
        assert_eq!(client.salary, 2000.0);
    }

    #[test]
    fn deleted_clients_cannot_be_changed() {
        let mut client = Client::create(new_client(), UserId::new(), Utc::now()).unwrap();
        client.soft_delete(Utc::now()).unwrap();

        assert_eq!(client.soft_delete(Utc::now()), Err(DomainError::NotFound));
        assert_eq!(
            client.apply(ClientPatch::default(), Utc::now()),
            Err(DomainError::NotFound)
        );
    }

    #[test]
    fn deleted_at_is_not_serialized() {
        let mut client = Client::create(new_client(), UserId::new(), Utc::now()).unwrap();
        client.soft_delete(Utc::now()).unwrap();
        let json = serde_json::to_value(&client).unwrap();
        assert!(json.get("deletedAt").is_none());
        assert!(json.get("companyValue").is_some());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: every non-negative amount in range is accepted, every
        /// negative amount is rejected.
        #[test]
        fn amount_sign_decides_validity(amount in -1.0e12f64..1.0e12f64) {
            let result = validate_amount("salary", amount);
            if amount < 0.0 {
                prop_assert!(result.is_err());
            } else {
                prop_assert!(result.is_ok());
            }
        }
    }
}
