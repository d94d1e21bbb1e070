//! Binance response payloads.
//!
//! The API sends most numbers as strings and some ids as bare integers, so the
//! numeric fields go through lenient deserializers.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("number out of range")),
        Value::String(s) if s.is_empty() => Ok(0.0),
        Value::String(s) => s.parse::<f64>().map_err(serde::de::Error::custom),
        Value::Null => Ok(0.0),
        other => Err(serde::de::Error::custom(format!("expected number, got {}", other))),
    }
}

fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s),
        other => Err(serde::de::Error::custom(format!("expected id, got {}", other))),
    }
}

/// Error body returned with non-2xx responses
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

/// Spot balance entry
#[derive(Debug, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(deserialize_with = "de_f64")]
    pub free: f64,
    #[serde(deserialize_with = "de_f64")]
    pub locked: f64,
}

/// `GET /api/v3/account`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    #[serde(default)]
    pub balances: Vec<BalanceInfo>,
    #[serde(default)]
    pub can_trade: bool,
}

/// `GET /api/v3/ticker/price`
#[derive(Debug, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    #[serde(deserialize_with = "de_f64")]
    pub price: f64,
}

/// `GET /sapi/v1/loan/ongoing/orders`
#[derive(Debug, Deserialize)]
pub struct LoanOrdersPage {
    #[serde(default)]
    pub rows: Vec<LoanOrder>,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanOrder {
    #[serde(deserialize_with = "de_id")]
    pub order_id: String,
    pub loan_coin: String,
    #[serde(default, deserialize_with = "de_f64")]
    pub total_debt: f64,
    pub collateral_coin: String,
    #[serde(default, deserialize_with = "de_f64")]
    pub collateral_amount: f64,
    /// Fraction, e.g. `0.45`
    #[serde(rename = "currentLTV", default, deserialize_with = "de_f64")]
    pub current_ltv: f64,
    #[serde(rename = "marginCallLTV", default, deserialize_with = "de_f64")]
    pub margin_call_ltv: f64,
}

/// `POST /sapi/v1/loan/repay`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanRepayResponse {
    pub loan_coin: String,
    #[serde(default)]
    pub repay_status: Option<String>,
}

/// `POST /sapi/v1/loan/borrow`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanBorrowResponse {
    #[serde(deserialize_with = "de_id")]
    pub order_id: String,
    pub loan_coin: String,
    #[serde(default, deserialize_with = "de_f64")]
    pub loan_amount: f64,
}

/// `POST /sapi/v1/loan/adjust/ltv`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanAdjustResponse {
    pub collateral_coin: String,
    pub direction: String,
    #[serde(default, deserialize_with = "de_f64")]
    pub amount: f64,
}

/// `GET /sapi/v1/margin/account`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginAccount {
    #[serde(deserialize_with = "de_f64")]
    pub total_asset_of_btc: f64,
    #[serde(deserialize_with = "de_f64")]
    pub total_liability_of_btc: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub margin_level: f64,
    #[serde(default)]
    pub user_assets: Vec<MarginAsset>,
}

#[derive(Debug, Deserialize)]
pub struct MarginAsset {
    pub asset: String,
    #[serde(default, deserialize_with = "de_f64")]
    pub free: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub locked: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub borrowed: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub interest: f64,
}

/// Margin transfer/borrow/repay acknowledgement
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionAck {
    #[serde(deserialize_with = "de_id")]
    pub tran_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_loan_orders_page() {
        let body = r#"{
            "rows": [{
                "orderId": 100000001,
                "loanCoin": "USDT",
                "totalDebt": "10000.5",
                "residualInterest": "0.5",
                "collateralCoin": "BTC",
                "collateralAmount": "0.5",
                "currentLTV": "0.62",
                "expirationTime": 1575018510000
            }],
            "total": 1
        }"#;

        let page: LoanOrdersPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.total, 1);
        let order = &page.rows[0];
        assert_eq!(order.order_id, "100000001");
        assert_eq!(order.total_debt, 10000.5);
        assert_eq!(order.current_ltv, 0.62);
        assert_eq!(order.margin_call_ltv, 0.0);
    }

    #[test]
    fn test_parse_margin_account() {
        let body = r#"{
            "borrowEnabled": true,
            "marginLevel": "11.64405625",
            "totalAssetOfBtc": "6.82728457",
            "totalLiabilityOfBtc": "0.58633215",
            "totalNetAssetOfBtc": "6.24095242",
            "userAssets": [
                {"asset": "BTC", "borrowed": "0.00000000", "free": "0.00499500",
                 "interest": "0.00000000", "locked": "0.00000000", "netAsset": "0.00499500"},
                {"asset": "USDT", "borrowed": "1000.00000000", "free": "0.00000000",
                 "interest": "1.25000000", "locked": "0.00000000", "netAsset": "-1001.25"}
            ]
        }"#;

        let account: MarginAccount = serde_json::from_str(body).unwrap();
        assert_eq!(account.total_asset_of_btc, 6.82728457);
        assert_eq!(account.user_assets.len(), 2);
        assert_eq!(account.user_assets[1].borrowed, 1000.0);
        assert_eq!(account.user_assets[1].interest, 1.25);
    }

    #[test]
    fn test_parse_transaction_ack_with_numeric_id() {
        let ack: TransactionAck = serde_json::from_str(r#"{"tranId": 100000001}"#).unwrap();
        assert_eq!(ack.tran_id, "100000001");
    }
}
