//! Admin-side discount campaign management: thin typed calls over the backend admin API plus
//! the form checks run before anything is sent.

use chrono::{DateTime, Utc};
use common_http_errors::FieldError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::discount::{normalize_code, DiscountKind};
use crate::gateway::{encode_segment, GatewayError, GatewayResult, HttpBackend};

pub const CODE_MIN_LEN: usize = 3;
pub const CODE_MAX_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Active,
    Suspended,
    Expired,
    Exhausted,
    Scheduled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountCampaign {
    pub id: String,
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: DiscountKind,
    pub value: f64,
    #[serde(default)]
    pub maximum_discount: Option<i64>,
    #[serde(default)]
    pub minimum_purchase: Option<i64>,
    #[serde(default)]
    pub usage_limit: Option<i64>,
    #[serde(default)]
    pub usage_limit_per_user: Option<i64>,
    #[serde(default)]
    pub times_used: u64,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub show_id: Option<String>,
    pub status: CampaignStatus,
}

/// Create/update form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountDraft {
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: DiscountKind,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_discount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_purchase: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_limit_per_user: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_id: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("discount form has {} invalid field(s)", fields.len())]
pub struct AdminValidationError {
    pub fields: Vec<FieldError>,
}

impl DiscountDraft {
    /// Check the form and return it with the code normalized.
    pub fn validate(mut self) -> Result<Self, AdminValidationError> {
        let mut fields = Vec::new();
        let mut push = |field: &str, message: &str| fields.push(FieldError { field: field.into(), message: message.into() });

        self.code = normalize_code(&self.code);
        if !(CODE_MIN_LEN..=CODE_MAX_LEN).contains(&self.code.len()) {
            push("code", "code must be 3 to 32 letters or digits");
        }
        match self.kind {
            DiscountKind::Percentage if !(self.value > 0.0 && self.value <= 100.0) => {
                push("value", "percentage must be greater than 0 and at most 100")
            }
            DiscountKind::FixedAmount if !(self.value.is_finite() && self.value > 0.0) => {
                push("value", "amount must be greater than 0")
            }
            _ => {}
        }
        if let (Some(from), Some(until)) = (self.valid_from, self.valid_until) {
            if from >= until {
                push("validUntil", "end date must be after the start date");
            }
        }
        for (field, value) in [
            ("maximumDiscount", self.maximum_discount),
            ("minimumPurchase", self.minimum_purchase),
            ("usageLimit", self.usage_limit),
            ("usageLimitPerUser", self.usage_limit_per_user),
        ] {
            if value.is_some_and(|v| v < 0) {
                push(field, "must not be negative");
            }
        }

        if fields.is_empty() {
            Ok(self)
        } else {
            Err(AdminValidationError { fields })
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignPage {
    #[serde(default, alias = "content")]
    pub items: Vec<DiscountCampaign>,
    #[serde(default, alias = "totalElements")]
    pub total: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default, alias = "size")]
    pub page_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CampaignStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStatistics {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub times_used: u64,
    #[serde(default)]
    pub unique_users: u64,
    /// Minor units.
    #[serde(default)]
    pub total_discount_given: i64,
    #[serde(default)]
    pub total_revenue: i64,
    #[serde(default)]
    pub remaining_uses: Option<u64>,
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Validation(#[from] AdminValidationError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub struct AdminDiscounts<'a> {
    backend: &'a HttpBackend,
}

impl<'a> AdminDiscounts<'a> {
    pub fn new(backend: &'a HttpBackend) -> Self { Self { backend } }

    pub async fn list(&self, query: &CampaignQuery) -> GatewayResult<CampaignPage> {
        self.backend.get_json_with_query("/admin/discounts", query).await
    }

    pub async fn get(&self, id: &str) -> GatewayResult<DiscountCampaign> {
        self.backend.get_json(&format!("/admin/discounts/{}", encode_segment(id))).await
    }

    pub async fn create(&self, draft: DiscountDraft) -> Result<DiscountCampaign, AdminError> {
        let draft = draft.validate()?;
        let created: DiscountCampaign = self.backend.post_json("/admin/discounts", &draft).await?;
        info!(id = %created.id, code = %created.code, "discount campaign created");
        Ok(created)
    }

    pub async fn update(&self, id: &str, draft: DiscountDraft) -> Result<DiscountCampaign, AdminError> {
        let draft = draft.validate()?;
        let updated: DiscountCampaign = self
            .backend
            .put_json(&format!("/admin/discounts/{}", encode_segment(id)), &draft)
            .await?;
        info!(id = %updated.id, "discount campaign updated");
        Ok(updated)
    }

    pub async fn suspend(&self, id: &str) -> GatewayResult<()> {
        self.backend.post_empty(&format!("/admin/discounts/{}/suspend", encode_segment(id))).await?;
        info!(id, "discount campaign suspended");
        Ok(())
    }

    pub async fn reactivate(&self, id: &str) -> GatewayResult<()> {
        self.backend.post_empty(&format!("/admin/discounts/{}/reactivate", encode_segment(id))).await?;
        info!(id, "discount campaign reactivated");
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> GatewayResult<()> {
        self.backend.delete(&format!("/admin/discounts/{}", encode_segment(id))).await?;
        info!(id, "discount campaign deleted");
        Ok(())
    }

    pub async fn statistics(&self, id: &str) -> GatewayResult<CampaignStatistics> {
        self.backend.get_json(&format!("/admin/discounts/{}/statistics", encode_segment(id))).await
    }

    /// CSV export, passed through untouched.
    pub async fn export(&self) -> GatewayResult<String> {
        self.backend.get_text("/admin/discounts/export").await
    }
}
