//! Payment gateway trait, charge client and in-memory sandbox.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use domain::{CardDetails, CreditCard, Money, TokenizedCard};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{ChargeError, GatewayError};

/// Answer to a tokenize request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCardResponse {
    Stored(TokenizedCard),
    /// The gateway refused the card, e.g. an invalid number.
    Rejected { message: String },
}

/// Answer to a purchase request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GatewayResult {
    Approved {
        reference: String,
    },
    Declined {
        reason: String,
        transaction_number: Option<String>,
    },
}

/// Low-level payment gateway operations.
///
/// An `Err` means the gateway could not be reached or answered nonsense, so
/// the state of the charge is unknown. A decline is an `Ok`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Tokenizes raw card details.
    async fn store_card(&self, card: &CardDetails) -> Result<StoreCardResponse, GatewayError>;

    /// Charges a tokenized card.
    async fn purchase(
        &self,
        token: &str,
        amount: Money,
        invoice_reference: &str,
    ) -> Result<GatewayResult, GatewayError>;
}

#[async_trait]
impl<T: PaymentGateway + ?Sized> PaymentGateway for Arc<T> {
    async fn store_card(&self, card: &CardDetails) -> Result<StoreCardResponse, GatewayError> {
        (**self).store_card(card).await
    }

    async fn purchase(
        &self,
        token: &str,
        amount: Money,
        invoice_reference: &str,
    ) -> Result<GatewayResult, GatewayError> {
        (**self).purchase(token, amount, invoice_reference).await
    }
}

/// What to charge.
#[derive(Debug, Clone)]
pub enum ChargeInstruction {
    /// Tokenize these details first, then charge the token.
    NewCard(CardDetails),
    /// Charge the stored token.
    CardOnFile(CreditCard),
}

impl ChargeInstruction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeInstruction::NewCard(_) => "new_card",
            ChargeInstruction::CardOnFile(_) => "card_on_file",
        }
    }
}

/// The result of a charge, plus the token to keep when a new card was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCharge {
    pub result: GatewayResult,
    /// Set when a new card was tokenized. Saved as the card on file only if
    /// the subscription commits.
    pub stored_card: Option<TokenizedCard>,
}

/// Runs the tokenize-then-purchase sequence against a [`PaymentGateway`].
#[derive(Debug, Clone)]
pub struct PaymentGatewayClient<G> {
    gateway: G,
    timeout: Duration,
}

impl<G: PaymentGateway> PaymentGatewayClient<G> {
    pub fn new(gateway: G, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    /// Charges `amount` using the given instruction.
    ///
    /// A rejected card becomes a declined result carrying the gateway
    /// message. The whole sequence shares one deadline of the configured
    /// timeout; running out of time is a [`GatewayError::Timeout`] tagged
    /// with the call that was in flight.
    #[tracing::instrument(skip_all, fields(method = instruction.as_str(), %amount))]
    pub async fn charge(
        &self,
        instruction: &ChargeInstruction,
        amount: Money,
        invoice_reference: &str,
    ) -> Result<GatewayCharge, ChargeError> {
        let deadline = Instant::now() + self.timeout;

        let (token, stored_card) = match instruction {
            ChargeInstruction::NewCard(card) => {
                let response = self.bounded(deadline, self.gateway.store_card(card)).await;
                record_request("store_card", store_label(&response));
                match response.map_err(ChargeError::Tokenize)? {
                    StoreCardResponse::Stored(tokenized) => {
                        (tokenized.token.clone(), Some(tokenized))
                    }
                    StoreCardResponse::Rejected { message } => {
                        tracing::warn!(%message, "card rejected by gateway");
                        return Ok(GatewayCharge {
                            result: GatewayResult::Declined {
                                reason: message,
                                transaction_number: None,
                            },
                            stored_card: None,
                        });
                    }
                }
            }
            ChargeInstruction::CardOnFile(card) => (card.token.clone(), None),
        };

        let response = self
            .bounded(
                deadline,
                self.gateway.purchase(&token, amount, invoice_reference),
            )
            .await;
        record_request("purchase", purchase_label(&response));

        Ok(GatewayCharge {
            result: response.map_err(ChargeError::Purchase)?,
            stored_card,
        })
    }

    async fn bounded<T>(
        &self,
        deadline: Instant,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        tokio::time::timeout_at(deadline, call)
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))?
    }
}

fn record_request(operation: &'static str, result: &'static str) {
    metrics::counter!("gateway_requests_total", "operation" => operation, "result" => result)
        .increment(1);
}

fn store_label(response: &Result<StoreCardResponse, GatewayError>) -> &'static str {
    match response {
        Ok(StoreCardResponse::Stored(_)) => "stored",
        Ok(StoreCardResponse::Rejected { .. }) => "rejected",
        Err(_) => "unavailable",
    }
}

fn purchase_label(response: &Result<GatewayResult, GatewayError>) -> &'static str {
    match response {
        Ok(GatewayResult::Approved { .. }) => "approved",
        Ok(GatewayResult::Declined { .. }) => "declined",
        Err(_) => "unavailable",
    }
}

#[derive(Debug)]
struct InMemoryGatewayState {
    decline_reason: Option<String>,
    reject_card: Option<String>,
    unavailable: bool,
    approval_reference: Option<String>,
    delay: Option<Duration>,
    next_transaction: u64,
    store_calls: usize,
    purchase_calls: usize,
    charged: Vec<(String, Money, String)>,
}

impl Default for InMemoryGatewayState {
    fn default() -> Self {
        Self {
            decline_reason: None,
            reject_card: None,
            unavailable: false,
            approval_reference: None,
            delay: None,
            next_transaction: 10_000_000,
            store_calls: 0,
            purchase_calls: 0,
            charged: Vec::new(),
        }
    }
}

/// In-memory sandbox gateway for tests and local runs.
///
/// Approves everything by default, handing out sequential transaction
/// numbers.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines every purchase with the given reason.
    pub fn set_decline(&self, reason: Option<&str>) {
        self.write().decline_reason = reason.map(str::to_string);
    }

    /// Rejects every card at tokenization with the given message.
    pub fn set_reject_card(&self, message: Option<&str>) {
        self.write().reject_card = message.map(str::to_string);
    }

    /// Fails every call as if the gateway were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write().unavailable = unavailable;
    }

    /// Approves purchases with a fixed reference instead of a sequential one.
    pub fn set_approval_reference(&self, reference: Option<&str>) {
        self.write().approval_reference = reference.map(str::to_string);
    }

    /// Delays every call, for exercising the caller's timeout.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.write().delay = delay;
    }

    /// Total gateway calls, tokenize and purchase.
    pub fn call_count(&self) -> usize {
        let state = self.read();
        state.store_calls + state.purchase_calls
    }

    pub fn store_count(&self) -> usize {
        self.read().store_calls
    }

    pub fn purchase_count(&self) -> usize {
        self.read().purchase_calls
    }

    /// Approved charges as (token, amount, invoice reference).
    pub fn charges(&self) -> Vec<(String, Money, String)> {
        self.read().charged.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryGatewayState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryGatewayState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self) {
        let delay = self.read().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn store_card(&self, card: &CardDetails) -> Result<StoreCardResponse, GatewayError> {
        self.write().store_calls += 1;
        self.pause().await;

        let mut state = self.write();
        if state.unavailable {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        if let Some(message) = &state.reject_card {
            return Ok(StoreCardResponse::Rejected {
                message: message.clone(),
            });
        }

        state.next_transaction += 1;
        Ok(StoreCardResponse::Stored(TokenizedCard {
            token: format!("9{}", state.next_transaction),
            last_four: card.last_four(),
            expiry_month: card.expiry_month,
            expiry_year: card.expiry_year,
            holder: card.holder.clone(),
        }))
    }

    async fn purchase(
        &self,
        token: &str,
        amount: Money,
        invoice_reference: &str,
    ) -> Result<GatewayResult, GatewayError> {
        self.write().purchase_calls += 1;
        self.pause().await;

        let mut state = self.write();
        if state.unavailable {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }

        state.next_transaction += 1;
        let transaction_number = state.next_transaction.to_string();
        if let Some(reason) = &state.decline_reason {
            return Ok(GatewayResult::Declined {
                reason: reason.clone(),
                transaction_number: Some(transaction_number),
            });
        }

        let reference = state
            .approval_reference
            .clone()
            .unwrap_or(transaction_number);
        state
            .charged
            .push((token.to_string(), amount, invoice_reference.to_string()));
        Ok(GatewayResult::Approved { reference })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{BusinessId, CreditCardId};

    fn card() -> CardDetails {
        CardDetails {
            number: "4111111111111111".to_string(),
            expiry_month: 12,
            expiry_year: 2030,
            holder: "Jo Citizen".to_string(),
            cvn: Some("123".to_string()),
        }
    }

    fn card_on_file() -> CreditCard {
        CreditCard {
            id: CreditCardId::new(1),
            business_id: BusinessId::new(1),
            token: "910000000".to_string(),
            last_four: "1111".to_string(),
            expiry_month: 12,
            expiry_year: 2030,
            holder: "Jo Citizen".to_string(),
            created_at: Utc::now(),
        }
    }

    fn client(gateway: &InMemoryGateway) -> PaymentGatewayClient<InMemoryGateway> {
        PaymentGatewayClient::new(gateway.clone(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_new_card_is_tokenized_then_charged() {
        let gateway = InMemoryGateway::new();
        let charge = client(&gateway)
            .charge(
                &ChargeInstruction::NewCard(card()),
                Money::from_dollars(299),
                "INV-1",
            )
            .await
            .unwrap();

        assert!(matches!(charge.result, GatewayResult::Approved { .. }));
        let stored = charge.stored_card.unwrap();
        assert_eq!(stored.last_four, "1111");
        assert_eq!(gateway.store_count(), 1);
        assert_eq!(gateway.purchase_count(), 1);
        assert_eq!(
            gateway.charges(),
            vec![(stored.token, Money::from_dollars(299), "INV-1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_card_on_file_skips_tokenization() {
        let gateway = InMemoryGateway::new();
        let charge = client(&gateway)
            .charge(
                &ChargeInstruction::CardOnFile(card_on_file()),
                Money::from_dollars(299),
                "INV-2",
            )
            .await
            .unwrap();

        assert!(matches!(charge.result, GatewayResult::Approved { .. }));
        assert!(charge.stored_card.is_none());
        assert_eq!(gateway.store_count(), 0);
        assert_eq!(gateway.charges()[0].0, "910000000");
    }

    #[tokio::test]
    async fn test_rejected_card_is_a_decline_without_purchase() {
        let gateway = InMemoryGateway::new();
        gateway.set_reject_card(Some("Invalid card number"));

        let charge = client(&gateway)
            .charge(
                &ChargeInstruction::NewCard(card()),
                Money::from_dollars(299),
                "INV-3",
            )
            .await
            .unwrap();

        assert_eq!(
            charge.result,
            GatewayResult::Declined {
                reason: "Invalid card number".to_string(),
                transaction_number: None,
            }
        );
        assert_eq!(gateway.purchase_count(), 0);
    }

    #[tokio::test]
    async fn test_decline_carries_transaction_number() {
        let gateway = InMemoryGateway::new();
        gateway.set_decline(Some("Insufficient funds"));

        let charge = client(&gateway)
            .charge(
                &ChargeInstruction::CardOnFile(card_on_file()),
                Money::from_dollars(299),
                "INV-4",
            )
            .await
            .unwrap();

        match charge.result {
            GatewayResult::Declined {
                reason,
                transaction_number,
            } => {
                assert_eq!(reason, "Insufficient funds");
                assert!(transaction_number.is_some());
            }
            other => panic!("expected decline, got {other:?}"),
        }
        assert!(gateway.charges().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_during_tokenize_charges_nothing() {
        let gateway = InMemoryGateway::new();
        gateway.set_unavailable(true);

        let result = client(&gateway)
            .charge(
                &ChargeInstruction::NewCard(card()),
                Money::from_dollars(299),
                "INV-5",
            )
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, ChargeError::Tokenize(GatewayError::Unavailable(_))));
        assert!(!err.charge_attempted());
        assert_eq!(gateway.purchase_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_during_purchase_may_have_charged() {
        let gateway = InMemoryGateway::new();
        gateway.set_unavailable(true);

        let result = client(&gateway)
            .charge(
                &ChargeInstruction::CardOnFile(card_on_file()),
                Money::from_dollars(299),
                "INV-7",
            )
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, ChargeError::Purchase(GatewayError::Unavailable(_))));
        assert!(err.charge_attempted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_card_calls_share_one_deadline() {
        let gateway = InMemoryGateway::new();
        gateway.set_delay(Some(Duration::from_millis(600)));

        let started = Instant::now();
        let result = client(&gateway)
            .charge(
                &ChargeInstruction::NewCard(card()),
                Money::from_dollars(299),
                "INV-8",
            )
            .await;

        assert!(matches!(
            result,
            Err(ChargeError::Purchase(GatewayError::Timeout(_)))
        ));
        assert_eq!(gateway.store_count(), 1);
        assert!(started.elapsed() <= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_gateway_times_out() {
        let gateway = InMemoryGateway::new();
        gateway.set_delay(Some(Duration::from_secs(5)));

        let result = client(&gateway)
            .charge(
                &ChargeInstruction::CardOnFile(card_on_file()),
                Money::from_dollars(299),
                "INV-6",
            )
            .await;
        assert!(matches!(
            result,
            Err(ChargeError::Purchase(GatewayError::Timeout(_)))
        ));
    }
}
