//! Client records

use std::sync::Arc;

use duepay_shared::Client;
use serde::Deserialize;

use crate::entitlement::PlanContext;
use crate::error::{BillingError, BillingResult};
use crate::store::{BillingStore, NewClient, UsageCounter};
use crate::usage;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateClientInput {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub business_name: Option<String>,
}

fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct ClientService {
    store: Arc<dyn BillingStore>,
}

impl ClientService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn create_client(
        &self,
        ctx: &PlanContext,
        input: CreateClientInput,
    ) -> BillingResult<Client> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(BillingError::InvalidInput("name is required".to_string()));
        }
        let email = optional(input.email);
        if email.as_deref().is_some_and(|e| !e.contains('@')) {
            return Err(BillingError::InvalidInput(
                "email address is not valid".to_string(),
            ));
        }

        let client = self
            .store
            .insert_client(NewClient {
                owner_id: ctx.owner_id,
                name,
                email,
                phone: optional(input.phone),
                business_name: optional(input.business_name),
            })
            .await?;

        usage::record(self.store.as_ref(), &ctx.usage, UsageCounter::ClientsAdded).await;

        tracing::info!(owner_id = %ctx.owner_id, client_id = %client.id, "Client created");
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBillingStore;
    use time::macros::datetime;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_create_client_trims_and_counts() {
        let store = InMemoryBillingStore::new();
        let service = ClientService::new(Arc::new(store.clone()));
        let owner = Uuid::new_v4();
        let now = datetime!(2024-01-15 9:00 UTC);
        let ctx = PlanContext::load(&store, owner, now).await.unwrap();

        let client = service
            .create_client(
                &ctx,
                CreateClientInput {
                    name: "  Ada Lovelace ".to_string(),
                    email: Some("ada@example.com".to_string()),
                    phone: Some("   ".to_string()),
                    business_name: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(client.name, "Ada Lovelace");
        assert_eq!(client.phone, None);
        let ctx = PlanContext::load(&store, owner, now).await.unwrap();
        assert_eq!(ctx.usage.clients_added, 1);
    }

    #[tokio::test]
    async fn test_create_client_validates() {
        let store = InMemoryBillingStore::new();
        let service = ClientService::new(Arc::new(store.clone()));
        let ctx = PlanContext::load(&store, Uuid::new_v4(), datetime!(2024-01-15 9:00 UTC))
            .await
            .unwrap();

        for (name, email) in [(" ", None), ("Ada", Some("not-an-email"))] {
            let err = service
                .create_client(
                    &ctx,
                    CreateClientInput {
                        name: name.to_string(),
                        email: email.map(str::to_string),
                        phone: None,
                        business_name: None,
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, BillingError::InvalidInput(_)));
        }
    }
}
