// src/fulfillment/orchestrator.rs

//! The fulfillment state machine. One entry point per webhook delivery;
//! the event ledger gates everything, then the handler for the event
//! type runs the provisioning/polling/notification sequence and records
//! a terminal or partial-failure state for every branch.

use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::{BeginProcessing, EventLedger, OrderStore, PackageStore, UserOrderStore};
use crate::errors::{AppError, Result};
use crate::fulfillment::events::{Charge, CheckoutSession, EventType, PaymentIntent, StripeEvent};
use crate::fulfillment::fallback;
use crate::metrics::SharedMetrics;
use crate::models::{
  EventProcessingStatus, NewOrder, NewUserOrder, Order, OrderStatus, Package, UserOrderStatus,
};
use crate::services::notifications::{ActivationDetails, NotificationDispatcher, ThankYouDetails};
use crate::services::polling::QrPollingEngine;
use crate::services::provisioning::{EsimOrder, EsimProfile, ProvisioningClient, ProvisioningError};

/// Placeholder the legacy data path used for not-yet-provisioned orders.
/// An esim id equal to it must never be treated as a valid profile.
const PLACEHOLDER_ESIM_ID: &str = "PENDING";

/// How a webhook delivery was disposed of, for the HTTP response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
  Processed,
  /// A terminal ledger record already exists for this event id.
  Duplicate { previous_status: EventProcessingStatus },
  /// Another delivery of the same event holds the `processing` claim.
  InFlight,
}

pub struct FulfillmentOrchestrator {
  orders: Arc<dyn OrderStore>,
  packages: Arc<dyn PackageStore>,
  user_orders: Arc<dyn UserOrderStore>,
  ledger: Arc<dyn EventLedger>,
  provisioning: Arc<ProvisioningClient>,
  polling: QrPollingEngine,
  notifications: Arc<NotificationDispatcher>,
  metrics: SharedMetrics,
  guest_user_id: Uuid,
}

impl FulfillmentOrchestrator {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    orders: Arc<dyn OrderStore>,
    packages: Arc<dyn PackageStore>,
    user_orders: Arc<dyn UserOrderStore>,
    ledger: Arc<dyn EventLedger>,
    provisioning: Arc<ProvisioningClient>,
    polling: QrPollingEngine,
    notifications: Arc<NotificationDispatcher>,
    metrics: SharedMetrics,
    guest_user_id: Uuid,
  ) -> Self {
    Self {
      orders,
      packages,
      user_orders,
      ledger,
      provisioning,
      polling,
      notifications,
      metrics,
      guest_user_id,
    }
  }

  /// Processes one verified webhook delivery end to end: dedup gate,
  /// handler dispatch, terminal ledger update. The ledger is updated on
  /// both arms so a retried delivery is distinguishable from a fresh one.
  #[instrument(name = "fulfillment::process_event", skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
  pub async fn process_event(&self, event: StripeEvent) -> Result<WebhookOutcome> {
    if let Some(record) = self.ledger.check_processed(&event.id).await? {
      info!(previous_status = record.status.as_str(), "Duplicate webhook delivery; short-circuiting");
      self.metrics.incr_event(&event.event_type, "duplicate");
      return Ok(WebhookOutcome::Duplicate {
        previous_status: record.status,
      });
    }

    let payload = serde_json::to_value(&event).unwrap_or_default();
    match self.ledger.begin_processing(&event.id, &event.event_type, &payload).await? {
      BeginProcessing::Conflict => {
        self.metrics.incr_event(&event.event_type, "in_flight");
        return Ok(WebhookOutcome::InFlight);
      }
      BeginProcessing::Started => {}
    }

    let outcome = self.dispatch(&event).await;

    // Finally-equivalent: the ledger always reaches a terminal state.
    let (status, error_message) = match &outcome {
      Ok(()) => (EventProcessingStatus::Completed, None),
      Err(e) => (EventProcessingStatus::Failed, Some(e.to_string())),
    };
    if let Err(ledger_err) = self
      .ledger
      .finish_processing(&event.id, status, error_message.as_deref())
      .await
    {
      error!(event_id = %event.id, error = %ledger_err, "Failed to finalize processed_events record");
    }
    self.metrics.incr_event(&event.event_type, status.as_str());

    outcome.map(|()| WebhookOutcome::Processed)
  }

  async fn dispatch(&self, event: &StripeEvent) -> Result<()> {
    match event.kind() {
      EventType::PaymentIntentSucceeded => self.handle_payment_succeeded(event.object()?).await,
      EventType::PaymentIntentFailed => self.handle_payment_failed(event.object()?).await,
      EventType::PaymentIntentCanceled => self.handle_payment_canceled(event.object()?).await,
      EventType::CheckoutSessionCompleted => self.handle_checkout_completed(event.object()?).await,
      EventType::ChargeRefunded => self.handle_charge_refunded(event.object()?).await,
      EventType::SubscriptionCreated | EventType::SubscriptionUpdated | EventType::SubscriptionDeleted => {
        info!(event_type = %event.event_type, "Subscription event acknowledged; no fulfillment action");
        Ok(())
      }
      EventType::Unknown => {
        info!(event_type = %event.event_type, "Unhandled event type");
        Ok(())
      }
    }
  }

  // --- payment_intent.succeeded ---

  #[instrument(name = "fulfillment::payment_succeeded", skip(self, intent), fields(payment_intent_id = %intent.id))]
  async fn handle_payment_succeeded(&self, intent: PaymentIntent) -> Result<()> {
    info!(
      amount = intent.amount,
      currency = %intent.currency,
      "Payment succeeded"
    );

    let Some(order) = self.orders.find_by_payment_intent(&intent.id).await? else {
      error!("Order not found for payment intent; nothing to fulfill");
      return Ok(());
    };

    // Checkout-session purchases are fulfilled by their session event;
    // the companion payment intent event for the same order arrives
    // afterwards and has nothing left to do.
    if order.status != OrderStatus::Pending {
      info!(order_id = %order.id, status = %order.status, "Order already progressed past pending; skipping");
      return Ok(());
    }

    // An intent without a package id is not a lookup failure. Parking is
    // reserved for ids that were present but resolve to nothing.
    let Some(raw_package_id) = intent.meta("packageId") else {
      warn!(order_id = %order.id, "No package ID found in payment intent metadata");
      return Ok(());
    };

    // Package validation happens before any provisioning side effect: a
    // catalog row can vanish between checkout and webhook delivery.
    let package = match self.resolve_package(Some(raw_package_id)).await? {
      Some(package) => package,
      None => {
        warn!(order_id = %order.id, package_id = %raw_package_id, "Package missing; flagging for admin review");
        self.orders.transition(order.id, OrderStatus::PaidButPackageMissing).await?;
        self
          .orders
          .merge_metadata(
            order.id,
            json!({
              "requires_admin_review": true,
              "missing_package_id": raw_package_id,
            }),
          )
          .await?;
        return Ok(());
      }
    };

    let order = self.orders.transition(order.id, OrderStatus::Paid).await?;
    info!(order_id = %order.id, "Order marked paid");

    let recipient = match self.recipient_for(&order, intent.meta("email")) {
      Some(email) => email,
      None => {
        warn!(order_id = %order.id, "No buyer email on order or event metadata; emails skipped");
        String::new()
      }
    };

    match self.fulfill(&order, &package, &recipient).await {
      Ok(()) => Ok(()),
      Err(e) => {
        error!(order_id = %order.id, error = %e, "Fulfillment pipeline failed; marking order failed");
        if let Err(t_err) = self.orders.transition(order.id, OrderStatus::Failed).await {
          error!(order_id = %order.id, error = %t_err, "Could not mark order failed");
        }
        let _ = self.orders.set_failure_reason(order.id, &e.to_string()).await;
        let _ = self
          .orders
          .merge_metadata(order.id, json!({ "fulfillment_error": e.to_string() }))
          .await;
        Err(e)
      }
    }
  }

  /// Steps 3-8 of the payment-succeeded pipeline. Errors raised here mark
  /// the order failed and suppress the activation email.
  async fn fulfill(&self, order: &Order, package: &Package, recipient: &str) -> Result<()> {
    let slug = package
      .provisioning_slug
      .as_deref()
      .filter(|s| !s.is_empty())
      .ok_or_else(|| AppError::Config(format!("Package {} has no provisioning slug", package.id)))?;

    let esim_order = match self.provisioning.create_order(slug, 1).await {
      Ok(esim_order) => esim_order,
      Err(e) => {
        // Recoverable: the order waits in pending_esim for a human or a
        // background retry; the buyer still gets the thank-you note.
        warn!(order_id = %order.id, error = %e, "Provisioning failed; parking order in pending_esim");
        self.orders.transition(order.id, OrderStatus::PendingEsim).await?;
        self
          .orders
          .merge_metadata(
            order.id,
            json!({ "roamify_failed": true, "provisioning_error": e.to_string() }),
          )
          .await?;
        self.send_thank_you(order, package, recipient, true).await;
        return Ok(());
      }
    };

    self
      .orders
      .set_provisioning_refs(order.id, &esim_order.provider_order_id, &esim_order.esim_id)
      .await?;
    if esim_order.fallback_used {
      warn!(
        order_id = %order.id,
        original = %esim_order.original_slug,
        fallback = ?esim_order.fallback_slug,
        "Fallback package substituted during provisioning"
      );
      self
        .orders
        .merge_metadata(
          order.id,
          json!({
            "requires_admin_review": true,
            "fallback_package_used": true,
            "original_package_slug": esim_order.original_slug,
            "fallback_package_slug": esim_order.fallback_slug,
          }),
        )
        .await?;
    }

    self.create_user_order(order, None, None).await;
    self.send_thank_you(order, package, recipient, false).await;

    let esim_id = esim_order.esim_id.as_str();
    if esim_id.is_empty() || esim_id == PLACEHOLDER_ESIM_ID {
      return Err(AppError::Internal(format!(
        "Provider returned an unusable esim id for order {}: {:?}",
        order.id, esim_id
      )));
    }

    match self.polling.wait_for_profile(self.provisioning.api(), esim_id).await {
      Ok(profile) => {
        self
          .orders
          .set_qr_payload(
            order.id,
            profile.lpa_code.as_deref(),
            profile.qr_code_url.as_deref(),
            profile.activation_code.as_deref(),
          )
          .await?;
        self.orders.transition(order.id, OrderStatus::Completed).await?;

        let iccid = self.fetch_iccid(order, esim_id).await;

        if !recipient.is_empty() {
          self
            .notifications
            .send_activation(&ActivationDetails {
              to: recipient.to_string(),
              order_id: order.id,
              package_name: package.name.clone(),
              profile,
              iccid,
            })
            .await;
        }
        info!(order_id = %order.id, "eSIM delivered");
        Ok(())
      }
      Err(ProvisioningError::QrTimeout { budget_secs }) => {
        // A half-delivered eSIM must not be represented as ready; the
        // order becomes eligible for background reconciliation instead.
        warn!(order_id = %order.id, budget_secs, "QR polling timed out; parking order in pending_qr");
        self.orders.transition(order.id, OrderStatus::PendingQr).await?;
        self.orders.merge_metadata(order.id, json!({ "qr_pending": true })).await?;
        Ok(())
      }
      Err(e) => {
        self
          .orders
          .merge_metadata(order.id, json!({ "qr_poll_error": e.to_string() }))
          .await?;
        Err(e.into())
      }
    }
  }

  /// Best-effort ICCID retrieval; absence is logged and flagged, never fatal.
  async fn fetch_iccid(&self, order: &Order, esim_id: &str) -> Option<String> {
    match self.provisioning.get_iccid(esim_id).await {
      Ok(Some(iccid)) => {
        if let Err(e) = self.orders.set_iccid(order.id, &iccid).await {
          warn!(order_id = %order.id, error = %e, "Could not persist ICCID");
        }
        Some(iccid)
      }
      Ok(None) => {
        info!(order_id = %order.id, "No ICCID available yet");
        None
      }
      Err(e) => {
        warn!(order_id = %order.id, error = %e, "ICCID retrieval failed");
        let _ = self
          .orders
          .merge_metadata(order.id, json!({ "iccid_fetch_failed": true }))
          .await;
        None
      }
    }
  }

  // --- checkout.session.completed ---

  #[instrument(name = "fulfillment::checkout_completed", skip(self, session), fields(session_id = %session.id))]
  async fn handle_checkout_completed(&self, session: CheckoutSession) -> Result<()> {
    info!("Checkout session completed");

    let package = match self.resolve_package(session.meta("packageId")).await? {
      Some(package) => package,
      None => {
        error!(package_id = ?session.meta("packageId"), "Package not found by id or slug; cannot create order");
        return Ok(());
      }
    };

    let Some(email) = session.buyer_email().map(String::from) else {
      error!("Checkout session carries no customer email; cannot create order");
      return Ok(());
    };

    // Degrade-rather-than-block: this entry point falls back to a locally
    // generated code instead of leaving the purchase unfulfilled.
    let provisioned = self.provision_for_checkout(&package).await;
    let from_provider = provisioned.is_some();
    let (provider_order_id, esim_id, profile) = provisioned.unwrap_or_else(|| {
      let code = fallback::generate_esim_code();
      let profile = EsimProfile {
        lpa_code: Some(fallback::generate_lpa_payload(&code)),
        activation_code: Some(code.clone()),
        ..Default::default()
      };
      (fallback::fallback_order_id(), code, profile)
    });

    let name = session.meta("name").map(String::from);
    let surname = session.meta("surname").map(String::from);
    let user_name = match (&name, &surname) {
      (None, None) => email.clone(),
      _ => format!("{} {}", name.as_deref().unwrap_or(""), surname.as_deref().unwrap_or(""))
        .trim()
        .to_string(),
    };

    let order = self
      .orders
      .insert(NewOrder {
        package_id: package.id,
        user_email: email.clone(),
        user_name,
        name,
        surname,
        amount: session.amount_major(),
        currency: "eur".to_string(),
        payment_intent_id: session.payment_intent.clone(),
        checkout_session_id: Some(session.id.clone()),
        stripe_customer_id: session.customer.clone(),
        provider_order_id: Some(provider_order_id),
        esim_id: Some(esim_id),
        lpa_code: profile.lpa_code.clone(),
        qr_code_url: profile.qr_code_url.clone(),
        activation_code: profile.activation_code.clone(),
        status: OrderStatus::Paid,
        metadata: if from_provider {
          json!({})
        } else {
          json!({ "fallback_esim": true, "requires_admin_review": true })
        },
      })
      .await?;
    info!(order_id = %order.id, from_provider, "Order created from checkout session");

    self
      .create_user_order(&order, order.iccid.as_deref(), profile.qr_code_url.as_deref())
      .await;

    self.send_thank_you(&order, &package, &email, !from_provider).await;

    // A locally generated code is never presented as an installable eSIM.
    if from_provider && profile.is_complete() {
      self
        .notifications
        .send_activation(&ActivationDetails {
          to: email,
          order_id: order.id,
          package_name: package.name.clone(),
          profile,
          iccid: None,
        })
        .await;
    }
    Ok(())
  }

  /// Provider order + QR wait for the synchronous checkout path. Any
  /// failure routes the caller to the local fallback.
  async fn provision_for_checkout(&self, package: &Package) -> Option<(String, String, EsimProfile)> {
    let slug = package.provisioning_slug.as_deref().filter(|s| !s.is_empty())?;
    let esim_order: EsimOrder = match self.provisioning.create_order(slug, 1).await {
      Ok(created) => created,
      Err(e) => {
        error!(package_id = %package.id, error = %e, "Provisioning failed for checkout session; using fallback");
        return None;
      }
    };
    match self
      .polling
      .wait_for_profile(self.provisioning.api(), &esim_order.esim_id)
      .await
    {
      Ok(profile) => Some((esim_order.provider_order_id, esim_order.esim_id, profile)),
      Err(e) => {
        error!(esim_id = %esim_order.esim_id, error = %e, "QR wait failed for checkout session; using fallback");
        None
      }
    }
  }

  // --- simple event types ---

  #[instrument(name = "fulfillment::payment_failed", skip(self, intent), fields(payment_intent_id = %intent.id))]
  async fn handle_payment_failed(&self, intent: PaymentIntent) -> Result<()> {
    info!("Payment failed");
    if let Some(order) = self.orders.find_by_payment_intent(&intent.id).await? {
      self.transition_logged(order.id, OrderStatus::Failed).await;
      let _ = self.orders.set_failure_reason(order.id, intent.failure_message()).await;
    }
    if let Some(email) = intent.meta("userEmail") {
      let package_name = intent.meta("packageName").unwrap_or("eSIM Package");
      self
        .notifications
        .send_payment_failed(email, intent.amount_major(), package_name, intent.failure_message())
        .await;
    }
    Ok(())
  }

  #[instrument(name = "fulfillment::payment_canceled", skip(self, intent), fields(payment_intent_id = %intent.id))]
  async fn handle_payment_canceled(&self, intent: PaymentIntent) -> Result<()> {
    info!("Payment canceled");
    if let Some(order) = self.orders.find_by_payment_intent(&intent.id).await? {
      self.transition_logged(order.id, OrderStatus::Cancelled).await;
    }
    if let Some(email) = intent.meta("userEmail") {
      let package_name = intent.meta("packageName").unwrap_or("eSIM Package");
      self
        .notifications
        .send_payment_cancelled(email, intent.amount_major(), package_name)
        .await;
    }
    Ok(())
  }

  #[instrument(name = "fulfillment::charge_refunded", skip(self, charge), fields(charge_id = %charge.id))]
  async fn handle_charge_refunded(&self, charge: Charge) -> Result<()> {
    info!("Charge refunded");
    let Some(payment_intent_id) = charge.payment_intent.as_deref() else {
      warn!("Refunded charge has no payment intent reference");
      return Ok(());
    };
    if let Some(order) = self.orders.find_by_payment_intent(payment_intent_id).await? {
      self.transition_logged(order.id, OrderStatus::Refunded).await;
      if let Some(refund_id) = charge.refund_id() {
        let _ = self.orders.set_refund_id(order.id, refund_id).await;
      }
      if !order.user_email.is_empty() {
        self
          .notifications
          .send_refund(&order.user_email, charge.amount_refunded_major(), charge.refund_id(), order.id)
          .await;
      }
    }
    Ok(())
  }

  // --- shared helpers ---

  /// Package lookup by UUID first, by storefront slug as a fallback.
  async fn resolve_package(&self, raw_id: Option<&str>) -> Result<Option<Package>> {
    let Some(raw_id) = raw_id else { return Ok(None) };
    if let Ok(id) = Uuid::parse_str(raw_id) {
      if let Some(package) = self.packages.find_by_id(id).await? {
        return Ok(Some(package));
      }
    }
    self.packages.find_by_location_slug(raw_id).await
  }

  fn recipient_for(&self, order: &Order, event_email: Option<&str>) -> Option<String> {
    if !order.user_email.is_empty() {
      return Some(order.user_email.clone());
    }
    event_email.map(String::from)
  }

  async fn send_thank_you(&self, order: &Order, package: &Package, recipient: &str, delayed: bool) {
    if recipient.is_empty() {
      return;
    }
    let sent = self
      .notifications
      .send_thank_you(&ThankYouDetails {
        to: recipient.to_string(),
        order_id: order.id,
        package_name: package.name.clone(),
        data_amount_gb: package.data_amount,
        validity_days: package.validity_days,
        amount: order.amount,
        currency: order.currency.clone(),
        delayed,
      })
      .await;
    if sent {
      let _ = self
        .orders
        .merge_metadata(order.id, json!({ "thank_you_email_sent": true }))
        .await;
    }
  }

  /// Best-effort dashboard row; failure is flagged, never propagated.
  async fn create_user_order(&self, order: &Order, iccid: Option<&str>, qr_code_url: Option<&str>) {
    let result = self
      .user_orders
      .insert(NewUserOrder {
        user_id: self.guest_user_id,
        order_id: order.id,
        status: UserOrderStatus::Pending,
        iccid: iccid.map(String::from),
        qr_code_url: qr_code_url.map(String::from),
      })
      .await;
    if let Err(e) = result {
      warn!(order_id = %order.id, error = %e, "Could not create user_orders row");
      let _ = self
        .orders
        .merge_metadata(order.id, json!({ "user_order_failed": true }))
        .await;
    }
  }

  /// Status update for the simple event types: an illegal transition
  /// (e.g. refund raced ahead of the paid hop) is logged, not raised.
  async fn transition_logged(&self, order_id: Uuid, target: OrderStatus) {
    if let Err(e) = self.orders.transition(order_id, target).await {
      warn!(%order_id, target = %target, error = %e, "Status transition rejected");
    }
  }
}
