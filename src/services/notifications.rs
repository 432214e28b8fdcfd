// src/services/notifications.rs

//! The two buyer-facing message contracts (thank-you, activation) plus
//! the simple notices for failed/cancelled/refunded payments. Every send
//! is fire-and-forget: a delivery failure is logged and flagged, never
//! propagated into the fulfillment flow.

use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::services::email::{EmailMessage, Mailer};
use crate::services::provisioning::EsimProfile;

#[derive(Debug, Clone)]
pub struct ThankYouDetails {
  pub to: String,
  pub order_id: Uuid,
  pub package_name: String,
  pub data_amount_gb: i32,
  pub validity_days: i32,
  pub amount: f64,
  pub currency: String,
  /// Set when provisioning is still pending and the buyer should expect
  /// their eSIM later rather than in the next email.
  pub delayed: bool,
}

#[derive(Debug, Clone)]
pub struct ActivationDetails {
  pub to: String,
  pub order_id: Uuid,
  pub package_name: String,
  pub profile: EsimProfile,
  pub iccid: Option<String>,
}

pub struct NotificationDispatcher {
  mailer: Arc<dyn Mailer>,
  frontend_url: String,
}

impl NotificationDispatcher {
  pub fn new(mailer: Arc<dyn Mailer>, frontend_url: String) -> Self {
    Self { mailer, frontend_url }
  }

  async fn dispatch(&self, message: EmailMessage) -> bool {
    match self.mailer.send(&message).await {
      Ok(()) => true,
      Err(e) => {
        error!(to = %message.to, subject = %message.subject, error = %e, "Email send failed");
        false
      }
    }
  }

  /// Sent once per order, immediately after payment confirmation. Never
  /// carries QR content.
  pub async fn send_thank_you(&self, details: &ThankYouDetails) -> bool {
    let delay_notice = if details.delayed {
      "<p>Your eSIM is being prepared and will arrive in a separate email shortly. \
       If it does not arrive within a few hours, our team is already on it.</p>"
    } else {
      "<p>Your eSIM activation details will follow in a separate email.</p>"
    };
    let html = format!(
      "<h1>Thank you for your order!</h1>\
       <p>Order reference: {order_id}</p>\
       <p>Package: {package} ({data}GB, {validity} days)</p>\
       <p>Amount paid: {amount:.2} {currency}</p>\
       {delay_notice}\
       <p><a href=\"{frontend}/dashboard\">View your order</a></p>",
      order_id = details.order_id,
      package = details.package_name,
      data = details.data_amount_gb,
      validity = details.validity_days,
      amount = details.amount,
      currency = details.currency.to_uppercase(),
      delay_notice = delay_notice,
      frontend = self.frontend_url,
    );
    info!(order_id = %details.order_id, to = %details.to, delayed = details.delayed, "Sending thank-you email");
    self
      .dispatch(EmailMessage {
        to: details.to.clone(),
        subject: "Your eSIM order is confirmed".to_string(),
        html,
      })
      .await
  }

  /// Sent only when a real, non-empty profile payload exists. A
  /// placeholder or pending value must never reach the buyer as final.
  pub async fn send_activation(&self, details: &ActivationDetails) -> bool {
    if !details.profile.is_complete() {
      warn!(order_id = %details.order_id, "Refusing to send activation email without a complete profile payload");
      return false;
    }
    let field = |label: &str, value: &Option<String>| match value.as_deref().filter(|v| !v.is_empty()) {
      Some(v) => format!("<p><strong>{}:</strong> {}</p>", label, v),
      None => String::new(),
    };
    let qr_image = details
      .profile
      .qr_code_url
      .as_deref()
      .filter(|v| !v.is_empty())
      .map(|url| format!("<p><img src=\"{}\" alt=\"eSIM QR code\" /></p>", url))
      .unwrap_or_default();
    let html = format!(
      "<h1>Your eSIM is ready</h1>\
       <p>Order reference: {order_id} ({package})</p>\
       {qr_image}\
       {lpa}{activation}{ios}{iccid}\
       <p>To install: scan the QR code, or add the LPA code manually under \
       Settings &gt; Cellular &gt; Add eSIM.</p>",
      order_id = details.order_id,
      package = details.package_name,
      qr_image = qr_image,
      lpa = field("LPA code", &details.profile.lpa_code),
      activation = field("Activation code", &details.profile.activation_code),
      ios = field("iOS quick install", &details.profile.ios_quick_install),
      iccid = field("ICCID", &details.iccid),
    );
    info!(order_id = %details.order_id, to = %details.to, "Sending activation email");
    self
      .dispatch(EmailMessage {
        to: details.to.clone(),
        subject: "Your eSIM is ready to install".to_string(),
        html,
      })
      .await
  }

  pub async fn send_payment_failed(&self, to: &str, amount: f64, package_name: &str, failure_reason: &str) -> bool {
    let html = format!(
      "<h1>Payment failed</h1>\
       <p>Your payment of {amount:.2} for {package} could not be processed: {reason}</p>\
       <p><a href=\"{frontend}/checkout?retry=true\">Try again</a></p>",
      amount = amount,
      package = package_name,
      reason = failure_reason,
      frontend = self.frontend_url,
    );
    self
      .dispatch(EmailMessage {
        to: to.to_string(),
        subject: "Your eSIM payment failed".to_string(),
        html,
      })
      .await
  }

  pub async fn send_payment_cancelled(&self, to: &str, amount: f64, package_name: &str) -> bool {
    let html = format!(
      "<h1>Payment cancelled</h1>\
       <p>Your payment of {amount:.2} for {package} was cancelled.</p>\
       <p><a href=\"{frontend}/checkout?retry=true\">Complete your purchase</a></p>",
      amount = amount,
      package = package_name,
      frontend = self.frontend_url,
    );
    self
      .dispatch(EmailMessage {
        to: to.to_string(),
        subject: "Your eSIM payment was cancelled".to_string(),
        html,
      })
      .await
  }

  pub async fn send_refund(&self, to: &str, amount: f64, refund_id: Option<&str>, order_id: Uuid) -> bool {
    let html = format!(
      "<h1>Refund processed</h1>\
       <p>A refund of {amount:.2} for order {order_id} has been processed{refund_ref}.</p>",
      amount = amount,
      order_id = order_id,
      refund_ref = refund_id.map(|id| format!(" (reference {})", id)).unwrap_or_default(),
    );
    self
      .dispatch(EmailMessage {
        to: to.to_string(),
        subject: "Your refund has been processed".to_string(),
        html,
      })
      .await
  }
}
