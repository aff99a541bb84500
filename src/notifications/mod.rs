//! User notifications
//!
//! Purchase confirmations, low-funds warnings and milestone notices. Delivery
//! is best-effort: callers log failures and move on.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::NotificationsConfig;
use crate::ledger::User;
use crate::utils::helpers::generate_id;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(String),
    #[error("notification endpoint returned {0}")]
    Status(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationType {
    PurchaseConfirmations,
    LackOfFunds,
    MilestonesAchieved,
}

impl NotificationType {
    /// Whether the user opted in to this category
    pub fn allowed_for(&self, user: &User) -> bool {
        let settings = &user.notification_settings;
        match self {
            NotificationType::PurchaseConfirmations => settings.purchase_confirmations,
            NotificationType::LackOfFunds => settings.lack_of_funds,
            NotificationType::MilestonesAchieved => settings.milestones_achieved,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub notification_id: String,
    pub user_address: String,
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    pub target_url: String,
}

impl Notification {
    pub fn new(
        user: &User,
        notification_type: NotificationType,
        title: impl Into<String>,
        body: impl Into<String>,
        target_url: impl Into<String>,
    ) -> Self {
        Self {
            notification_id: generate_id(),
            user_address: user.address.clone(),
            notification_type,
            title: title.into(),
            body: body.into(),
            target_url: target_url.into(),
        }
    }

    pub fn purchase_confirmation(user: &User, amount: Decimal, target_url: &str) -> Self {
        Self::new(
            user,
            NotificationType::PurchaseConfirmations,
            "Purchase Confirmed",
            format!("Successfully purchased ${} worth of BTC", amount.normalize()),
            target_url,
        )
    }

    pub fn lack_of_funds(user: &User, amount: Decimal, target_url: &str) -> Self {
        Self::new(
            user,
            NotificationType::LackOfFunds,
            "Insufficient Funds",
            format!("Need ${} for DCA purchase", amount.normalize()),
            target_url,
        )
    }

    pub fn milestone_achieved(user: &User, milestone_pct: u32, total_invested: Decimal, target_url: &str) -> Self {
        Self::new(
            user,
            NotificationType::MilestonesAchieved,
            "Milestone Achieved!",
            format!(
                "You've invested ${} ({}% of target)",
                total_invested.round_dp(2).normalize(),
                milestone_pct
            ),
            target_url,
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn purchase_confirmation(&self, user: &User, amount: Decimal) -> Result<(), NotifyError>;

    async fn lack_of_funds(&self, user: &User, amount: Decimal) -> Result<(), NotifyError>;

    async fn milestone_achieved(&self, user: &User, milestone_pct: u32, total_invested: Decimal) -> Result<(), NotifyError>;
}

/// POSTs notifications as JSON to a delivery service
pub struct WebhookNotifier {
    enabled: bool,
    webhook_url: Option<String>,
    target_url: String,
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: &NotificationsConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            enabled: config.enabled,
            webhook_url: config.webhook_url.clone(),
            target_url: config.target_url.clone(),
            http_client,
        })
    }

    async fn send(&self, user: &User, notification: Notification) -> Result<(), NotifyError> {
        if !self.enabled {
            return Ok(());
        }
        if !notification.notification_type.allowed_for(user) {
            debug!(
                "{} has {:?} notifications disabled",
                user.address, notification.notification_type
            );
            return Ok(());
        }
        let Some(url) = &self.webhook_url else {
            return Ok(());
        };

        let response = self
            .http_client
            .post(url)
            .json(&notification)
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }

        info!(
            "[NOTIFY] {} -> {}: {}",
            notification.title, user.address, notification.body
        );
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn purchase_confirmation(&self, user: &User, amount: Decimal) -> Result<(), NotifyError> {
        self.send(user, Notification::purchase_confirmation(user, amount, &self.target_url))
            .await
    }

    async fn lack_of_funds(&self, user: &User, amount: Decimal) -> Result<(), NotifyError> {
        self.send(user, Notification::lack_of_funds(user, amount, &self.target_url))
            .await
    }

    async fn milestone_achieved(&self, user: &User, milestone_pct: u32, total_invested: Decimal) -> Result<(), NotifyError> {
        self.send(
            user,
            Notification::milestone_achieved(user, milestone_pct, total_invested, &self.target_url),
        )
        .await
    }
}

/// Drops every notification
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn purchase_confirmation(&self, _user: &User, _amount: Decimal) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn lack_of_funds(&self, _user: &User, _amount: Decimal) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn milestone_achieved(&self, _user: &User, _milestone_pct: u32, _total_invested: Decimal) -> Result<(), NotifyError> {
        Ok(())
    }
}
