//! Subscription purchase saga constants and request types.

use common::{BusinessId, PlanId};
use domain::{CardDetails, Money};

/// The saga type identifier for subscription purchases.
pub const SAGA_TYPE: &str = "SubscriptionPurchase";

/// Step name: resolve the price components that apply to the business.
pub const STEP_RESOLVE_PRICING: &str = "resolve_pricing";

/// Step name: charge the payment method through the gateway.
pub const STEP_CHARGE_PAYMENT: &str = "charge_payment";

/// Step name: persist subscription, price snapshots and payment.
pub const STEP_COMMIT_SUBSCRIPTION: &str = "commit_subscription";

/// How the purchase will be paid.
#[derive(Debug, Clone)]
pub enum PaymentMethod {
    /// Card details entered for this purchase. Saved as the card on file
    /// if the purchase succeeds.
    NewCard(CardDetails),
    /// The card already stored for the business.
    CardOnFile,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::NewCard(_) => "new_card",
            PaymentMethod::CardOnFile => "card_on_file",
        }
    }
}

/// A request to buy a subscription for a business.
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub business_id: BusinessId,
    pub plan_id: PlanId,
    /// Overrides the plan price when set.
    pub amount: Option<Money>,
    pub payment_method: PaymentMethod,
}

impl PurchaseRequest {
    pub fn new(business_id: BusinessId, plan_id: PlanId, payment_method: PaymentMethod) -> Self {
        Self {
            business_id,
            plan_id,
            amount: None,
            payment_method,
        }
    }

    pub fn with_amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }
}
