//! HTTP clients for the wallet ledger, enrollment and catalog services.
//!
//! All three speak JSON and accept the same optional bearer token. Status
//! mapping: 404 is `NotFound`, other 4xx are `Rejected`, everything else
//! (transport errors, 5xx, unreadable bodies) is `Unavailable` and so
//! retryable.
//!
//! The enrollment service answers 409 when the payment reference already
//! enrolled the user; that is the existing enrollment, not a failure.

use std::time::Duration;

use async_trait::async_trait;
use edupay_core::collaborators::{
    CatalogLookup, CollaboratorError, CourseBilling, Enrollment, EnrollmentRequest,
    EnrollmentService, LedgerEntry, LedgerReceipt, PayerProfile, WalletLedger, WalletOwner,
};
use edupay_core::config::CollaboratorsConfig;
use edupay_sdk::objects::{AccessType, BillingCycle};
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone)]
struct ServiceClient {
    service: &'static str,
    base_url: Url,
    token: Option<String>,
    http: reqwest::Client,
}

impl ServiceClient {
    fn url(&self, path: &str) -> Result<Url, CollaboratorError> {
        self.base_url
            .join(path)
            .map_err(|e| CollaboratorError::Unavailable {
                service: self.service,
                message: e.to_string(),
            })
    }

    async fn send<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        not_found: (&'static str, &str),
    ) -> Result<T, CollaboratorError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.http.request(method, self.url(path)?);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let unavailable = |message: String| CollaboratorError::Unavailable {
            service: self.service,
            message,
        };

        let response = request.send().await.map_err(|e| unavailable(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            let (what, id) = not_found;
            return Err(CollaboratorError::NotFound {
                what,
                id: id.to_owned(),
            });
        }
        if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Rejected {
                service: self.service,
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            return Err(unavailable(format!("status {status}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| unavailable(e.to_string()))
    }
}

/// Builds the three clients over one connection pool.
pub struct HttpCollaborators {
    pub ledger: HttpWalletLedger,
    pub enrollment: HttpEnrollmentService,
    pub catalog: HttpCatalog,
}

impl HttpCollaborators {
    pub fn new(config: &CollaboratorsConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let client = |service, base_url: &Url| ServiceClient {
            service,
            base_url: base_url.clone(),
            token: config.service_token.clone(),
            http: http.clone(),
        };
        Ok(Self {
            ledger: HttpWalletLedger {
                client: client("ledger", &config.ledger_url),
            },
            enrollment: HttpEnrollmentService {
                client: client("enrollment", &config.enrollment_url),
            },
            catalog: HttpCatalog {
                client: client("catalog", &config.catalog_url),
            },
        })
    }
}

pub struct HttpWalletLedger {
    client: ServiceClient,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletResponse {
    wallet_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LedgerEntryBody<'a> {
    amount: Decimal,
    currency: &'static str,
    reference: &'a str,
    description: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerResponse {
    transaction_id: String,
}

impl HttpWalletLedger {
    async fn post_entry(
        &self,
        operation: &str,
        entry: LedgerEntry,
    ) -> Result<LedgerReceipt, CollaboratorError> {
        let path = format!(
            "wallets/{}/{operation}",
            urlencoding::encode(&entry.wallet_id)
        );
        let body = LedgerEntryBody {
            amount: entry.amount,
            currency: entry.currency.code(),
            reference: &entry.reference,
            description: &entry.description,
        };
        let response: LedgerResponse = self
            .client
            .send(Method::POST, &path, Some(&body), ("wallet", &entry.wallet_id))
            .await?;
        Ok(LedgerReceipt {
            transaction_id: response.transaction_id,
        })
    }
}

#[async_trait]
impl WalletLedger for HttpWalletLedger {
    async fn wallet_of(&self, owner: &WalletOwner) -> Result<String, CollaboratorError> {
        let (kind, id) = match owner {
            WalletOwner::User(id) => ("users", id),
            WalletOwner::Organization(id) => ("organizations", id),
        };
        let path = format!("{kind}/{}/wallet", urlencoding::encode(id));
        let response: WalletResponse = self
            .client
            .send::<(), _>(Method::GET, &path, None, ("wallet owner", id))
            .await?;
        Ok(response.wallet_id)
    }

    async fn credit(&self, entry: LedgerEntry) -> Result<LedgerReceipt, CollaboratorError> {
        self.post_entry("credit", entry).await
    }

    async fn debit(&self, entry: LedgerEntry) -> Result<LedgerReceipt, CollaboratorError> {
        self.post_entry("debit", entry).await
    }
}

pub struct HttpEnrollmentService {
    client: ServiceClient,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnrollmentBody<'a> {
    user_id: &'a str,
    course_id: &'a str,
    access_type: AccessType,
    billing_cycle: BillingCycle,
    starts_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    ends_at: Option<i64>,
    payment_reference: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnrollmentResponse {
    enrollment_id: String,
}

#[async_trait]
impl EnrollmentService for HttpEnrollmentService {
    async fn enroll_user_to_course(
        &self,
        request: EnrollmentRequest,
    ) -> Result<Enrollment, CollaboratorError> {
        let body = EnrollmentBody {
            user_id: &request.user_id,
            course_id: &request.course_id,
            access_type: request.access_type,
            billing_cycle: request.billing_cycle,
            starts_at: request.starts_at.unix_timestamp(),
            ends_at: request.ends_at.map(|t| t.unix_timestamp()),
            payment_reference: &request.payment_reference,
        };
        let result: Result<EnrollmentResponse, _> = self
            .client
            .send(Method::POST, "enrollments", Some(&body), ("course", &request.course_id))
            .await;
        let response = match result {
            Err(CollaboratorError::Rejected {
                status: 409,
                message,
                ..
            }) => {
                tracing::info!(
                    payment_reference = %request.payment_reference,
                    "Enrollment already exists for payment"
                );
                match serde_json::from_str::<EnrollmentResponse>(&message) {
                    Ok(existing) => existing,
                    Err(_) => self.by_reference(&request.payment_reference).await?,
                }
            }
            other => other?,
        };
        Ok(Enrollment {
            enrollment_id: response.enrollment_id,
        })
    }
}

impl HttpEnrollmentService {
    async fn by_reference(&self, payment_reference: &str) -> Result<EnrollmentResponse, CollaboratorError> {
        let path = format!(
            "enrollments/by-reference/{}",
            urlencoding::encode(payment_reference)
        );
        self.client
            .send::<(), _>(Method::GET, &path, None, ("enrollment", payment_reference))
            .await
    }
}

pub struct HttpCatalog {
    client: ServiceClient,
}

#[async_trait]
impl CatalogLookup for HttpCatalog {
    async fn payer(&self, user_id: &str) -> Result<PayerProfile, CollaboratorError> {
        let path = format!("users/{}/billing", urlencoding::encode(user_id));
        self.client
            .send::<(), _>(Method::GET, &path, None, ("user", user_id))
            .await
    }

    async fn course(&self, course_id: &str) -> Result<CourseBilling, CollaboratorError> {
        let path = format!("courses/{}/billing", urlencoding::encode(course_id));
        self.client
            .send::<(), _>(Method::GET, &path, None, ("course", course_id))
            .await
    }
}
