//! Credentials Client (§4.7). Fetches per-venue credentials from an
//! external, authenticated endpoint using a service-shared secret; the
//! core never decrypts or persists them, only forwards the first active
//! record per venue into a connector via `set_credentials`.

use std::collections::HashMap;

use serde::Deserialize;

use crate::connectors::connector::Credential;
use crate::error::{EngineError, Result};
use crate::model::VenueId;

#[derive(Debug, Clone, Deserialize)]
struct CredentialRecord {
    #[serde(rename = "apiKey")]
    api_key: String,
    #[serde(rename = "apiSecret")]
    api_secret: String,
    passphrase: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

impl From<CredentialRecord> for Credential {
    fn from(r: CredentialRecord) -> Self {
        Credential { api_key: r.api_key, api_secret: r.api_secret, passphrase: r.passphrase, user_id: r.user_id }
    }
}

pub struct CredentialsClient {
    http: reqwest::Client,
    backend_api_url: String,
    service_secret: String,
}

impl CredentialsClient {
    pub fn new(backend_api_url: String, service_secret: String) -> Self {
        Self { http: reqwest::Client::new(), backend_api_url, service_secret }
    }

    /// `GET /api/v1/internal/credentials` — returns the first active
    /// credential per venue. A venue absent from the response, or with an
    /// empty list, is simply absent from the returned map (§4.2:
    /// authenticated REST is "rare and optional").
    pub async fn fetch_all(&self) -> Result<HashMap<VenueId, Credential>> {
        let url = format!("{}/api/v1/internal/credentials", self.backend_api_url);
        let resp = self
            .http
            .get(&url)
            .header("Authorization", format!("Service {}", self.service_secret))
            .send()
            .await
            .map_err(EngineError::from)?;

        if !resp.status().is_success() {
            return Err(EngineError::Credentials(format!("credentials endpoint returned HTTP {}", resp.status())));
        }

        let body: HashMap<String, Vec<CredentialRecord>> = resp.json().await.map_err(EngineError::from)?;

        let mut out = HashMap::new();
        for (venue_name, records) in body {
            let Ok(venue) = venue_name.parse::<VenueId>() else {
                tracing::warn!(venue = %venue_name, "credentials endpoint named an unrecognized venue, skipping");
                continue;
            };
            if let Some(first) = records.into_iter().next() {
                out.insert(venue, Credential::from(first));
            }
        }
        Ok(out)
    }

    /// `GET /api/v1/internal/credentials/<venue>` — used for an explicit,
    /// single-venue refresh.
    pub async fn fetch_for_venue(&self, venue: VenueId) -> Result<Credential> {
        let url = format!("{}/api/v1/internal/credentials/{}", self.backend_api_url, venue.as_str());
        let resp = self
            .http
            .get(&url)
            .header("Authorization", format!("Service {}", self.service_secret))
            .send()
            .await
            .map_err(EngineError::from)?;

        if !resp.status().is_success() {
            return Err(EngineError::Credentials(format!("credentials endpoint returned HTTP {}", resp.status())));
        }

        let records: Vec<CredentialRecord> = resp.json().await.map_err(EngineError::from)?;
        records
            .into_iter()
            .next()
            .map(Credential::from)
            .ok_or_else(|| EngineError::Credentials(format!("no active credential for {venue}")))
    }
}

/// Injects fetched credentials into the connectors that support them,
/// logging once per venue on failure and continuing with public
/// endpoints only (§7: "authentication error on credentials endpoint: log
/// once, continue").
pub async fn install_credentials(
    client: &CredentialsClient,
    connectors: &[(VenueId, std::sync::Arc<dyn crate::connectors::VenueConnector>)],
) {
    let fetched = match client.fetch_all().await {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!(error = %e, "failed to fetch credentials, continuing with public endpoints only");
            return;
        }
    };

    for (venue, connector) in connectors {
        if let Some(credential) = fetched.get(venue) {
            connector.set_credentials(credential.clone());
            tracing::info!(venue = venue.as_str(), "credentials installed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_record_maps_to_credential() {
        let record = CredentialRecord {
            api_key: "k".into(),
            api_secret: "s".into(),
            passphrase: Some("p".into()),
            user_id: None,
        };
        let credential: Credential = record.into();
        assert_eq!(credential.api_key, "k");
        assert_eq!(credential.passphrase.as_deref(), Some("p"));
    }
}
