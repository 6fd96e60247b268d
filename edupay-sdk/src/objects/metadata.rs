//! Purchase intent metadata that travels through the payment provider.
//!
//! Most providers offer no server-side order lookup that survives a restart
//! of the settlement server, so everything settlement needs (payer, wallet,
//! course, purpose, billing cycle) is attached to the intent at the provider
//! and read back from the webhook. The schema is versioned so that webhooks
//! for intents created by an older release can still be read.
//!
//! Two encodings exist:
//!
//! * **Map form** ([`PaymentMetadata::to_map`]): flat string map, used for
//!   providers with a structured metadata channel. Free-form extras are kept.
//! * **Compact form** ([`PaymentMetadata::encode`]): a single short string
//!   `v1|{purpose}|{userId}|{walletId}|{courseId}|{billingCycle}` with
//!   percent-encoded fields, for providers that only echo one short custom
//!   field. Extras are not carried.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::objects::payment::{BillingCycle, PaymentPurpose};

/// Current metadata schema version.
pub const METADATA_VERSION: u8 = 1;

pub const KEY_VERSION: &str = "v";
pub const KEY_PURPOSE: &str = "purpose";
pub const KEY_USER_ID: &str = "userId";
pub const KEY_WALLET_ID: &str = "walletId";
pub const KEY_COURSE_ID: &str = "courseId";
pub const KEY_BILLING_CYCLE: &str = "billingCycle";

const RESERVED_KEYS: [&str; 6] = [
    KEY_VERSION,
    KEY_PURPOSE,
    KEY_USER_ID,
    KEY_WALLET_ID,
    KEY_COURSE_ID,
    KEY_BILLING_CYCLE,
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("metadata version {0} is newer than supported version {METADATA_VERSION}")]
    UnsupportedVersion(u8),
    #[error("invalid metadata version: {0}")]
    InvalidVersion(String),
    #[error("compact metadata must have 6 fields, got {0}")]
    FieldCount(usize),
    #[error("invalid percent-encoding in metadata field")]
    Encoding,
}

/// Versioned purchase intent metadata.
///
/// Every field is optional on the read side: a webhook may carry metadata
/// that is incomplete, and deciding whether that is fatal is up to the
/// settlement step. Reserved keys whose values cannot be parsed are kept
/// verbatim in `extra` so nothing is lost on the way through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMetadata {
    #[serde(rename = "v", default = "current_version")]
    pub version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<PaymentPurpose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_cycle: Option<BillingCycle>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

fn current_version() -> u8 {
    METADATA_VERSION
}

impl PaymentMetadata {
    pub fn new(purpose: PaymentPurpose, user_id: impl Into<String>) -> Self {
        Self {
            version: METADATA_VERSION,
            purpose: Some(purpose),
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    /// Flatten into the string map attached to the provider intent.
    ///
    /// Typed fields win over extras with the same key.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = self.extra.clone();
        map.insert(KEY_VERSION.to_owned(), self.version.to_string());
        let typed = [
            (KEY_PURPOSE, self.purpose.map(|p| p.as_str().to_owned())),
            (KEY_USER_ID, self.user_id.clone()),
            (KEY_WALLET_ID, self.wallet_id.clone()),
            (KEY_COURSE_ID, self.course_id.clone()),
            (KEY_BILLING_CYCLE, self.billing_cycle.map(|c| c.as_str().to_owned())),
        ];
        for (key, value) in typed {
            if let Some(value) = value {
                map.insert(key.to_owned(), value);
            }
        }
        map
    }

    /// Rebuild from the map form echoed back by a provider.
    ///
    /// A missing version is read as version 1, the first schema that was
    /// ever attached to intents.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, MetadataError> {
        let version = match map.get(KEY_VERSION) {
            Some(raw) => parse_version(raw)?,
            None => 1,
        };

        let mut extra: BTreeMap<String, String> = map
            .iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let purpose = parse_or_keep(map, KEY_PURPOSE, &mut extra);
        let billing_cycle = parse_or_keep(map, KEY_BILLING_CYCLE, &mut extra);

        Ok(Self {
            version,
            purpose,
            user_id: non_empty(map.get(KEY_USER_ID)),
            wallet_id: non_empty(map.get(KEY_WALLET_ID)),
            course_id: non_empty(map.get(KEY_COURSE_ID)),
            billing_cycle,
            extra,
        })
    }

    /// Encode into the compact single-string form.
    pub fn encode(&self) -> String {
        let field = |value: Option<&str>| {
            value
                .map(|v| urlencoding::encode(v).into_owned())
                .unwrap_or_default()
        };
        format!(
            "v{}|{}|{}|{}|{}|{}",
            self.version,
            field(self.purpose.map(|p| p.as_str())),
            field(self.user_id.as_deref()),
            field(self.wallet_id.as_deref()),
            field(self.course_id.as_deref()),
            field(self.billing_cycle.map(|c| c.as_str())),
        )
    }

    /// Decode the compact single-string form.
    pub fn decode(encoded: &str) -> Result<Self, MetadataError> {
        let fields: Vec<&str> = encoded.split('|').collect();
        if fields.len() != 6 {
            return Err(MetadataError::FieldCount(fields.len()));
        }
        let version_raw = fields[0]
            .strip_prefix('v')
            .ok_or_else(|| MetadataError::InvalidVersion(fields[0].to_owned()))?;
        let version = parse_version(version_raw)?;

        let mut map = BTreeMap::new();
        map.insert(KEY_VERSION.to_owned(), version.to_string());
        for (key, raw) in [
            (KEY_PURPOSE, fields[1]),
            (KEY_USER_ID, fields[2]),
            (KEY_WALLET_ID, fields[3]),
            (KEY_COURSE_ID, fields[4]),
            (KEY_BILLING_CYCLE, fields[5]),
        ] {
            if raw.is_empty() {
                continue;
            }
            let value = urlencoding::decode(raw).map_err(|_| MetadataError::Encoding)?;
            map.insert(key.to_owned(), value.into_owned());
        }
        Self::from_map(&map)
    }
}

fn parse_version(raw: &str) -> Result<u8, MetadataError> {
    let version: u8 = raw
        .parse()
        .map_err(|_| MetadataError::InvalidVersion(raw.to_owned()))?;
    if version == 0 {
        return Err(MetadataError::InvalidVersion(raw.to_owned()));
    }
    if version > METADATA_VERSION {
        return Err(MetadataError::UnsupportedVersion(version));
    }
    Ok(version)
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

fn parse_or_keep<T: std::str::FromStr>(
    map: &BTreeMap<String, String>,
    key: &str,
    extra: &mut BTreeMap<String, String>,
) -> Option<T> {
    let raw = map.get(key).filter(|v| !v.is_empty())?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            extra.insert(key.to_owned(), raw.clone());
            None
        }
    }
}
