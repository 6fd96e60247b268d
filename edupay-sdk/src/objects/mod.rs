pub mod metadata;
pub mod payment;
pub mod providers;
pub mod settlement;

pub use metadata::{METADATA_VERSION, MetadataError, PaymentMetadata};
pub use payment::{
    BillingCycle, CreatePaymentEssential, CreatePaymentRequest, Currency, PayerIdentity,
    PaymentLookup, PaymentPurpose, PaymentResponse, UnknownVariant,
};
pub use providers::{PaymentMethod, ProviderId, UnknownProvider};
pub use settlement::{
    AccessType, ProcessedWebhook, SettlementResponse, SettlementStatus, SettlementSummary,
};
