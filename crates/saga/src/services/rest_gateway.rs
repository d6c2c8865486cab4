//! REST client for the hosted payment gateway.

use async_trait::async_trait;
use domain::{CardDetails, Money, TokenizedCard};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::services::gateway::{GatewayResult, PaymentGateway, StoreCardResponse};

/// Talks to the gateway's token-customer API.
///
/// - `POST {base}/customers` tokenizes card details.
/// - `POST {base}/transactions` charges a token.
///
/// Transport failures and 5xx answers are [`GatewayError::Unavailable`].
/// A 4xx answer is the gateway refusing the request.
#[derive(Debug, Clone)]
pub struct RestPaymentGateway {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl RestPaymentGateway {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, GatewayError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        if response.status().is_server_error() {
            return Err(GatewayError::Unavailable(format!(
                "gateway returned {}",
                response.status()
            )));
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CardDetailsBody<'a> {
    name: &'a str,
    number: &'a str,
    expiry_month: u32,
    expiry_year: i32,
    #[serde(rename = "CVN", skip_serializing_if = "Option::is_none")]
    cvn: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateCustomerRequest<'a> {
    card_details: CardDetailsBody<'a>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateCustomerResponse {
    customer: TokenCustomer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TokenCustomer {
    #[serde(rename = "TokenCustomerID")]
    token_customer_id: String,
    card_details: MaskedCard,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MaskedCard {
    name: String,
    number: String,
    expiry_month: u32,
    expiry_year: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TransactionRequest<'a> {
    customer: CustomerRef<'a>,
    payment: PaymentBody<'a>,
    transaction_type: &'static str,
}

#[derive(Debug, Serialize)]
struct CustomerRef<'a> {
    #[serde(rename = "TokenCustomerID")]
    token_customer_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PaymentBody<'a> {
    total_amount: i64,
    invoice_reference: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TransactionResponse {
    transaction_status: bool,
    #[serde(rename = "TransactionID")]
    transaction_id: Option<String>,
    #[serde(default)]
    response_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
}

async fn refusal_message(response: reqwest::Response) -> String {
    let status = response.status();
    let body: ErrorResponse = response.json().await.unwrap_or_default();
    body.message
        .unwrap_or_else(|| format!("gateway refused the request ({status})"))
}

fn last_four(masked: &str) -> String {
    let digits: Vec<char> = masked.chars().collect();
    digits[digits.len().saturating_sub(4)..].iter().collect()
}

#[async_trait]
impl PaymentGateway for RestPaymentGateway {
    #[tracing::instrument(skip_all)]
    async fn store_card(&self, card: &CardDetails) -> Result<StoreCardResponse, GatewayError> {
        let request = CreateCustomerRequest {
            card_details: CardDetailsBody {
                name: &card.holder,
                number: &card.number,
                expiry_month: card.expiry_month,
                expiry_year: card.expiry_year,
                cvn: card.cvn.as_deref(),
            },
        };

        let response = self.post("/customers", &request).await?;
        if response.status().is_client_error() {
            return Ok(StoreCardResponse::Rejected {
                message: refusal_message(response).await,
            });
        }

        let body: CreateCustomerResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let masked = body.customer.card_details;

        Ok(StoreCardResponse::Stored(TokenizedCard {
            token: body.customer.token_customer_id,
            last_four: last_four(&masked.number),
            expiry_month: masked.expiry_month,
            expiry_year: masked.expiry_year,
            holder: masked.name,
        }))
    }

    #[tracing::instrument(skip(self, token))]
    async fn purchase(
        &self,
        token: &str,
        amount: Money,
        invoice_reference: &str,
    ) -> Result<GatewayResult, GatewayError> {
        let request = TransactionRequest {
            customer: CustomerRef {
                token_customer_id: token,
            },
            payment: PaymentBody {
                total_amount: amount.cents(),
                invoice_reference,
            },
            transaction_type: "Recurring",
        };

        let response = self.post("/transactions", &request).await?;
        if response.status().is_client_error() {
            return Ok(GatewayResult::Declined {
                reason: refusal_message(response).await,
                transaction_number: None,
            });
        }

        let body: TransactionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        match (body.transaction_status, body.transaction_id) {
            (true, Some(reference)) => Ok(GatewayResult::Approved { reference }),
            (true, None) => Err(GatewayError::InvalidResponse(
                "approved transaction without an id".to_string(),
            )),
            (false, transaction_number) => Ok(GatewayResult::Declined {
                reason: body
                    .response_message
                    .unwrap_or_else(|| "Transaction declined".to_string()),
                transaction_number,
            }),
        }
    }
}
