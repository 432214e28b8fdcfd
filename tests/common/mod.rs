// tests/common/mod.rs
#![allow(dead_code)] // Allow unused helpers in this common test module

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use esim_fulfillment::db::{BeginProcessing, EventLedger, OrderStore, PackageStore, UserOrderStore};
use esim_fulfillment::errors::{AppError, Result};
use esim_fulfillment::fulfillment::{FulfillmentOrchestrator, StripeEvent};
use esim_fulfillment::metrics::TracingMetrics;
use esim_fulfillment::models::{
  EventProcessingStatus, NewOrder, NewUserOrder, Order, OrderStatus, Package, ProcessedEvent, UserOrder,
};
use esim_fulfillment::services::email::{EmailMessage, Mailer};
use esim_fulfillment::services::notifications::NotificationDispatcher;
use esim_fulfillment::services::polling::QrPollingEngine;
use esim_fulfillment::services::provisioning::{
  CreatedOrder, EsimProfile, ProvisioningApi, ProvisioningClient, ProvisioningError, RetryPolicy,
};

pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

// --- In-memory stores ---

#[derive(Default)]
pub struct InMemoryOrderStore {
  orders: Mutex<HashMap<Uuid, Order>>,
}

impl InMemoryOrderStore {
  pub fn seed(&self, order: Order) {
    self.orders.lock().unwrap().insert(order.id, order);
  }

  pub fn get(&self, id: Uuid) -> Order {
    self.orders.lock().unwrap().get(&id).expect("order must exist").clone()
  }

  pub fn all(&self) -> Vec<Order> {
    self.orders.lock().unwrap().values().cloned().collect()
  }

  /// The single order in the store, for checkout-session tests.
  pub fn only(&self) -> Order {
    let orders = self.all();
    assert_eq!(orders.len(), 1, "expected exactly one order, found {}", orders.len());
    orders.into_iter().next().unwrap()
  }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
  async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
    Ok(self.orders.lock().unwrap().get(&id).cloned())
  }

  async fn find_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Order>> {
    Ok(
      self
        .orders
        .lock()
        .unwrap()
        .values()
        .find(|o| o.payment_intent_id.as_deref() == Some(payment_intent_id))
        .cloned(),
    )
  }

  async fn insert(&self, new_order: NewOrder) -> Result<Order> {
    let now = Utc::now();
    let order = Order {
      id: Uuid::new_v4(),
      package_id: Some(new_order.package_id),
      user_email: new_order.user_email,
      user_name: Some(new_order.user_name),
      name: new_order.name,
      surname: new_order.surname,
      amount: new_order.amount,
      currency: new_order.currency,
      payment_intent_id: new_order.payment_intent_id,
      checkout_session_id: new_order.checkout_session_id,
      stripe_customer_id: new_order.stripe_customer_id,
      provider_order_id: new_order.provider_order_id,
      esim_id: new_order.esim_id,
      iccid: None,
      lpa_code: new_order.lpa_code,
      qr_code_url: new_order.qr_code_url,
      activation_code: new_order.activation_code,
      status: new_order.status,
      metadata: Some(new_order.metadata),
      failure_reason: None,
      refund_id: None,
      created_at: now,
      updated_at: now,
      paid_at: (new_order.status == OrderStatus::Paid).then_some(now),
      failed_at: None,
      cancelled_at: None,
      refunded_at: None,
    };
    self.orders.lock().unwrap().insert(order.id, order.clone());
    Ok(order)
  }

  async fn transition(&self, id: Uuid, target: OrderStatus) -> Result<Order> {
    let mut orders = self.orders.lock().unwrap();
    let order = orders
      .get_mut(&id)
      .ok_or_else(|| AppError::NotFound(format!("Order {} not found for status transition", id)))?;
    if !order.status.can_transition_to(target) {
      return Err(AppError::Validation(format!(
        "Illegal order status transition {} -> {} for order {}",
        order.status, target, id
      )));
    }
    order.status = target;
    order.updated_at = Utc::now();
    match target {
      OrderStatus::Paid => order.paid_at = Some(order.updated_at),
      OrderStatus::Failed => order.failed_at = Some(order.updated_at),
      OrderStatus::Cancelled => order.cancelled_at = Some(order.updated_at),
      OrderStatus::Refunded => order.refunded_at = Some(order.updated_at),
      _ => {}
    }
    Ok(order.clone())
  }

  async fn merge_metadata(&self, id: Uuid, patch: JsonValue) -> Result<()> {
    let mut orders = self.orders.lock().unwrap();
    let order = orders
      .get_mut(&id)
      .ok_or_else(|| AppError::NotFound(format!("Order {} not found", id)))?;
    let mut merged = order.metadata.take().unwrap_or_else(|| json!({}));
    if let (Some(base), Some(extra)) = (merged.as_object_mut(), patch.as_object()) {
      for (key, value) in extra {
        base.insert(key.clone(), value.clone());
      }
    }
    order.metadata = Some(merged);
    Ok(())
  }

  async fn set_provisioning_refs(&self, id: Uuid, provider_order_id: &str, esim_id: &str) -> Result<()> {
    let mut orders = self.orders.lock().unwrap();
    if let Some(order) = orders.get_mut(&id) {
      order.provider_order_id = Some(provider_order_id.to_string());
      order.esim_id = Some(esim_id.to_string());
    }
    Ok(())
  }

  async fn set_qr_payload(
    &self,
    id: Uuid,
    lpa_code: Option<&str>,
    qr_code_url: Option<&str>,
    activation_code: Option<&str>,
  ) -> Result<()> {
    let mut orders = self.orders.lock().unwrap();
    if let Some(order) = orders.get_mut(&id) {
      order.lpa_code = lpa_code.map(String::from);
      order.qr_code_url = qr_code_url.map(String::from);
      order.activation_code = activation_code.map(String::from);
    }
    Ok(())
  }

  async fn set_iccid(&self, id: Uuid, iccid: &str) -> Result<()> {
    let mut orders = self.orders.lock().unwrap();
    if let Some(order) = orders.get_mut(&id) {
      order.iccid = Some(iccid.to_string());
    }
    Ok(())
  }

  async fn set_failure_reason(&self, id: Uuid, reason: &str) -> Result<()> {
    let mut orders = self.orders.lock().unwrap();
    if let Some(order) = orders.get_mut(&id) {
      order.failure_reason = Some(reason.to_string());
    }
    Ok(())
  }

  async fn set_refund_id(&self, id: Uuid, refund_id: &str) -> Result<()> {
    let mut orders = self.orders.lock().unwrap();
    if let Some(order) = orders.get_mut(&id) {
      order.refund_id = Some(refund_id.to_string());
    }
    Ok(())
  }
}

#[derive(Default)]
pub struct InMemoryPackageStore {
  packages: Mutex<Vec<Package>>,
}

impl InMemoryPackageStore {
  pub fn seed(&self, package: Package) {
    self.packages.lock().unwrap().push(package);
  }
}

#[async_trait]
impl PackageStore for InMemoryPackageStore {
  async fn find_by_id(&self, id: Uuid) -> Result<Option<Package>> {
    Ok(self.packages.lock().unwrap().iter().find(|p| p.id == id).cloned())
  }

  async fn find_by_location_slug(&self, slug: &str) -> Result<Option<Package>> {
    Ok(
      self
        .packages
        .lock()
        .unwrap()
        .iter()
        .find(|p| p.location_slug.as_deref() == Some(slug))
        .cloned(),
    )
  }
}

#[derive(Default)]
pub struct InMemoryUserOrderStore {
  pub rows: Mutex<Vec<UserOrder>>,
  pub fail_inserts: Mutex<bool>,
}

impl InMemoryUserOrderStore {
  pub fn count(&self) -> usize {
    self.rows.lock().unwrap().len()
  }
}

#[async_trait]
impl UserOrderStore for InMemoryUserOrderStore {
  async fn insert(&self, new_user_order: NewUserOrder) -> Result<UserOrder> {
    if *self.fail_inserts.lock().unwrap() {
      return Err(AppError::Internal("user_orders insert failed".to_string()));
    }
    let row = UserOrder {
      id: Uuid::new_v4(),
      user_id: new_user_order.user_id,
      order_id: new_user_order.order_id,
      status: new_user_order.status,
      iccid: new_user_order.iccid,
      qr_code_url: new_user_order.qr_code_url,
      created_at: Utc::now(),
    };
    self.rows.lock().unwrap().push(row.clone());
    Ok(row)
  }
}

#[derive(Default)]
pub struct InMemoryEventLedger {
  records: Mutex<HashMap<String, ProcessedEvent>>,
}

impl InMemoryEventLedger {
  pub fn seed(&self, event_id: &str, event_type: &str, status: EventProcessingStatus) {
    let record = ProcessedEvent {
      id: Uuid::new_v4(),
      event_id: event_id.to_string(),
      event_type: event_type.to_string(),
      status,
      payload: None,
      error_message: None,
      processed_at: Utc::now(),
      completed_at: None,
    };
    self.records.lock().unwrap().insert(event_id.to_string(), record);
  }

  pub fn get(&self, event_id: &str) -> ProcessedEvent {
    self
      .records
      .lock()
      .unwrap()
      .get(event_id)
      .expect("ledger record must exist")
      .clone()
  }
}

#[async_trait]
impl EventLedger for InMemoryEventLedger {
  async fn check_processed(&self, event_id: &str) -> Result<Option<ProcessedEvent>> {
    let record = self.records.lock().unwrap().get(event_id).cloned();
    // A stale `processing` claim behaves like an absent row at the gate;
    // the unique constraint still decides the winner.
    Ok(record.filter(|r| r.status != EventProcessingStatus::Processing))
  }

  async fn begin_processing(&self, event_id: &str, event_type: &str, payload: &JsonValue) -> Result<BeginProcessing> {
    let mut records = self.records.lock().unwrap();
    if records.contains_key(event_id) {
      return Ok(BeginProcessing::Conflict);
    }
    records.insert(
      event_id.to_string(),
      ProcessedEvent {
        id: Uuid::new_v4(),
        event_id: event_id.to_string(),
        event_type: event_type.to_string(),
        status: EventProcessingStatus::Processing,
        payload: Some(payload.clone()),
        error_message: None,
        processed_at: Utc::now(),
        completed_at: None,
      },
    );
    Ok(BeginProcessing::Started)
  }

  async fn finish_processing(
    &self,
    event_id: &str,
    status: EventProcessingStatus,
    error_message: Option<&str>,
  ) -> Result<()> {
    let mut records = self.records.lock().unwrap();
    if let Some(record) = records.get_mut(event_id) {
      record.status = status;
      record.error_message = error_message.map(String::from);
      record.completed_at = Some(Utc::now());
    }
    Ok(())
  }
}

// --- Scripted provider API ---

/// Plays back queued responses per endpoint; an empty queue yields the
/// endpoint's default ("order created" / "profile not ready yet").
#[derive(Default)]
pub struct ScriptedProvisioningApi {
  pub create_order_results: Mutex<VecDeque<Result<CreatedOrder, ProvisioningError>>>,
  pub apply_results: Mutex<VecDeque<Result<EsimProfile, ProvisioningError>>>,
  pub status_results: Mutex<VecDeque<Result<EsimProfile, ProvisioningError>>>,
  pub iccid: Mutex<Option<String>>,
  pub create_order_slugs: Mutex<Vec<String>>,
}

impl ScriptedProvisioningApi {
  pub fn push_create_order(&self, result: Result<CreatedOrder, ProvisioningError>) {
    self.create_order_results.lock().unwrap().push_back(result);
  }

  pub fn push_apply(&self, result: Result<EsimProfile, ProvisioningError>) {
    self.apply_results.lock().unwrap().push_back(result);
  }

  pub fn push_status(&self, result: Result<EsimProfile, ProvisioningError>) {
    self.status_results.lock().unwrap().push_back(result);
  }

  pub fn set_iccid(&self, iccid: &str) {
    *self.iccid.lock().unwrap() = Some(iccid.to_string());
  }

  pub fn slugs_requested(&self) -> Vec<String> {
    self.create_order_slugs.lock().unwrap().clone()
  }
}

#[async_trait]
impl ProvisioningApi for ScriptedProvisioningApi {
  async fn create_order(&self, slug: &str, _quantity: u32) -> Result<CreatedOrder, ProvisioningError> {
    self.create_order_slugs.lock().unwrap().push(slug.to_string());
    self
      .create_order_results
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or_else(|| {
        Ok(CreatedOrder {
          provider_order_id: "prov-order-1".to_string(),
          esim_id: "esim-123".to_string(),
        })
      })
  }

  async fn apply_profile(&self, _esim_id: &str) -> Result<EsimProfile, ProvisioningError> {
    self
      .apply_results
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or(Ok(EsimProfile::default()))
  }

  async fn get_profile_status(&self, _esim_id: &str) -> Result<EsimProfile, ProvisioningError> {
    self
      .status_results
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or(Ok(EsimProfile::default()))
  }

  async fn get_iccid(&self, _esim_id: &str) -> Result<Option<String>, ProvisioningError> {
    Ok(self.iccid.lock().unwrap().clone())
  }
}

// --- Recording mailer ---

#[derive(Default)]
pub struct RecordingMailer {
  pub sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingMailer {
  pub fn subjects(&self) -> Vec<String> {
    self.sent.lock().unwrap().iter().map(|m| m.subject.clone()).collect()
  }

  pub fn messages(&self) -> Vec<EmailMessage> {
    self.sent.lock().unwrap().clone()
  }
}

#[async_trait]
impl Mailer for RecordingMailer {
  async fn send(&self, message: &EmailMessage) -> Result<()> {
    self.sent.lock().unwrap().push(message.clone());
    Ok(())
  }
}

// --- Harness wiring ---

pub const GUEST_USER_ID: Uuid = Uuid::nil();

pub struct Harness {
  pub orchestrator: FulfillmentOrchestrator,
  pub orders: Arc<InMemoryOrderStore>,
  pub packages: Arc<InMemoryPackageStore>,
  pub user_orders: Arc<InMemoryUserOrderStore>,
  pub ledger: Arc<InMemoryEventLedger>,
  pub api: Arc<ScriptedProvisioningApi>,
  pub mailer: Arc<RecordingMailer>,
}

pub fn harness() -> Harness {
  init_tracing();
  let orders = Arc::new(InMemoryOrderStore::default());
  let packages = Arc::new(InMemoryPackageStore::default());
  let user_orders = Arc::new(InMemoryUserOrderStore::default());
  let ledger = Arc::new(InMemoryEventLedger::default());
  let api = Arc::new(ScriptedProvisioningApi::default());
  let mailer = Arc::new(RecordingMailer::default());
  let metrics = Arc::new(TracingMetrics);

  let provisioning = Arc::new(ProvisioningClient::new(
    api.clone() as Arc<dyn ProvisioningApi>,
    RetryPolicy::default(),
    metrics.clone(),
  ));
  let notifications = Arc::new(NotificationDispatcher::new(
    mailer.clone() as Arc<dyn Mailer>,
    "http://localhost:3000".to_string(),
  ));

  let orchestrator = FulfillmentOrchestrator::new(
    orders.clone(),
    packages.clone(),
    user_orders.clone(),
    ledger.clone(),
    provisioning,
    QrPollingEngine::default(),
    notifications,
    metrics,
    GUEST_USER_ID,
  );

  Harness {
    orchestrator,
    orders,
    packages,
    user_orders,
    ledger,
    api,
    mailer,
  }
}

// --- Fixture builders ---

pub fn make_package(provisioning_slug: Option<&str>) -> Package {
  Package {
    id: Uuid::new_v4(),
    name: "Europe 10GB".to_string(),
    country_name: Some("Europe".to_string()),
    data_amount: 10,
    validity_days: 30,
    price: 19.99,
    location_slug: Some("europe".to_string()),
    provisioning_slug: provisioning_slug.map(String::from),
    created_at: Utc::now(),
  }
}

pub fn make_pending_order(payment_intent_id: &str, package_id: Uuid) -> Order {
  let now = Utc::now();
  Order {
    id: Uuid::new_v4(),
    package_id: Some(package_id),
    user_email: "buyer@example.com".to_string(),
    user_name: Some("Ada Lovelace".to_string()),
    name: Some("Ada".to_string()),
    surname: Some("Lovelace".to_string()),
    amount: 19.99,
    currency: "eur".to_string(),
    payment_intent_id: Some(payment_intent_id.to_string()),
    checkout_session_id: None,
    stripe_customer_id: None,
    provider_order_id: None,
    esim_id: None,
    iccid: None,
    lpa_code: None,
    qr_code_url: None,
    activation_code: None,
    status: OrderStatus::Pending,
    metadata: None,
    failure_reason: None,
    refund_id: None,
    created_at: now,
    updated_at: now,
    paid_at: None,
    failed_at: None,
    cancelled_at: None,
    refunded_at: None,
  }
}

pub fn ready_profile() -> EsimProfile {
  EsimProfile {
    qr_code_url: Some("https://cdn.example.com/qr/esim-123.png".to_string()),
    lpa_code: Some("LPA:1$rsp.example$ABC123".to_string()),
    activation_code: Some("ABC123".to_string()),
    ios_quick_install: None,
  }
}

pub fn make_event(event_id: &str, event_type: &str, object: JsonValue) -> StripeEvent {
  let payload = json!({
    "id": event_id,
    "type": event_type,
    "data": { "object": object }
  });
  StripeEvent::parse(payload.to_string().as_bytes()).expect("test event must parse")
}

pub fn payment_succeeded_event(event_id: &str, payment_intent_id: &str, package_id: Uuid) -> StripeEvent {
  make_event(
    event_id,
    "payment_intent.succeeded",
    json!({
      "id": payment_intent_id,
      "amount": 1999,
      "currency": "eur",
      "metadata": { "packageId": package_id.to_string(), "email": "buyer@example.com" }
    }),
  )
}

pub fn server_error() -> ProvisioningError {
  ProvisioningError::Api {
    status: 503,
    body: "upstream unavailable".to_string(),
  }
}
