use crate::model::{ExecutionReport, LogPayload, Order, OrderState, RecallTicket};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

/// Field delimiter of the NVFIX wire form.
pub const SOH: char = '\u{0001}';

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json decode failed for {raw:?}: {reason}")]
    Json { raw: String, reason: String },
    #[error("hybrid message does not start with a json object: {0:?}")]
    NotJsonObject(String),
    #[error("unterminated json object in hybrid message: {0:?}")]
    UnterminatedJson(String),
    #[error("malformed nvfix pair {pair:?} in {raw:?}")]
    MalformedPair { pair: String, raw: String },
}

impl CodecError {
    fn json(raw: &str, err: serde_json::Error) -> CodecError {
        CodecError::Json {
            raw: raw.to_string(),
            reason: err.to_string(),
        }
    }
}

/// A hybrid message is a JSON object with trailing SOH-delimited metadata.
pub fn is_hybrid(raw: &str) -> bool {
    raw.starts_with('{') && raw.contains(SOH)
}

pub fn decode_json<T: DeserializeOwned>(raw: &str) -> Result<T, CodecError> {
    serde_json::from_str(raw).map_err(|err| CodecError::json(raw, err))
}

/// Messages that can travel as SOH-delimited `tag=value` pairs. Tags are
/// lower-cased on the wire.
pub trait NvfixMessage: Default {
    /// Applies one tag. Returns false when the tag is not part of the type's
    /// field table.
    fn set_nvfix_field(&mut self, tag: &str, value: &str) -> bool;

    fn nvfix_fields(&self) -> Vec<(&'static str, String)>;

    fn to_nvfix(&self) -> String {
        let mut out = String::new();
        for (tag, value) in self.nvfix_fields() {
            if !out.is_empty() {
                out.push(SOH);
            }
            out.push_str(tag);
            out.push('=');
            out.push_str(&value);
        }
        out
    }
}

/// Parses an NVFIX message left-to-right. Unknown tags log WARN and are
/// skipped; a pair without `=` fails the whole parse, nothing is applied.
pub fn decode_nvfix<T: NvfixMessage>(raw: &str) -> Result<T, CodecError> {
    let mut message = T::default();
    for pair in raw.split(SOH).filter(|pair| !pair.is_empty()) {
        let Some((tag, value)) = pair.split_once('=') else {
            return Err(CodecError::MalformedPair {
                pair: pair.to_string(),
                raw: raw.to_string(),
            });
        };
        let tag = tag.to_ascii_lowercase();
        if !message.set_nvfix_field(&tag, value) {
            warn!(tag = %tag, "unknown nvfix tag skipped");
        }
    }
    Ok(message)
}

/// Parses a hybrid message: the leading JSON object is isolated by brace
/// scanning (string- and escape-aware), the SOH tail is parsed as NVFIX
/// pairs and merged into the object as additional lower-cased fields with
/// numeric promotion.
pub fn parse_hybrid(raw: &str) -> Result<Value, CodecError> {
    if !raw.starts_with('{') {
        return Err(CodecError::NotJsonObject(raw.to_string()));
    }
    let json_end =
        json_object_end(raw).ok_or_else(|| CodecError::UnterminatedJson(raw.to_string()))?;
    let mut object: Map<String, Value> =
        serde_json::from_str(&raw[..json_end]).map_err(|err| CodecError::json(raw, err))?;

    for pair in raw[json_end..].split(SOH).filter(|pair| !pair.is_empty()) {
        let Some((tag, value)) = pair.split_once('=') else {
            return Err(CodecError::MalformedPair {
                pair: pair.to_string(),
                raw: raw.to_string(),
            });
        };
        object.insert(tag.to_ascii_lowercase(), promote_scalar(value));
    }
    Ok(Value::Object(object))
}

pub fn decode_hybrid<T: DeserializeOwned>(raw: &str) -> Result<T, CodecError> {
    serde_json::from_value(parse_hybrid(raw)?).map_err(|err| CodecError::json(raw, err))
}

/// Decodes a ticket-history payload (JSON, hybrid-tolerant).
pub fn decode_ticket(raw: &str) -> Result<RecallTicket, CodecError> {
    if is_hybrid(raw) {
        decode_hybrid(raw)
    } else {
        decode_json(raw)
    }
}

/// Decodes an OMS-stream payload into its typed form. A message carrying a
/// non-empty `execID` is an execution report, anything else is an order.
pub fn decode_oms_payload(raw: &str) -> Result<LogPayload, CodecError> {
    if raw.starts_with('{') {
        let value = if is_hybrid(raw) {
            parse_hybrid(raw)?
        } else {
            serde_json::from_str(raw).map_err(|err| CodecError::json(raw, err))?
        };
        let is_exec = value
            .get("execID")
            .and_then(Value::as_str)
            .map(|id| !id.is_empty())
            .unwrap_or(false);
        if is_exec {
            let report: ExecutionReport =
                serde_json::from_value(value).map_err(|err| CodecError::json(raw, err))?;
            Ok(LogPayload::ExecReport(report))
        } else {
            let order: Order =
                serde_json::from_value(value).map_err(|err| CodecError::json(raw, err))?;
            Ok(LogPayload::Order(order))
        }
    } else if raw.split(SOH).any(|pair| {
        pair.split_once('=')
            .map(|(tag, id)| tag.eq_ignore_ascii_case("execid") && !id.is_empty())
            .unwrap_or(false)
    }) {
        Ok(LogPayload::ExecReport(decode_nvfix(raw)?))
    } else {
        Ok(LogPayload::Order(decode_nvfix(raw)?))
    }
}

fn json_object_end(raw: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in raw.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Numeric promotion for merged hybrid metadata: pure digits become an
/// integer, digits-dot-digits become a real, everything else stays a string.
fn promote_scalar(value: &str) -> Value {
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(integer) = value.parse::<u64>() {
            return Value::from(integer);
        }
    } else if let Some((whole, frac)) = value.split_once('.') {
        if !whole.is_empty()
            && !frac.is_empty()
            && whole.bytes().all(|b| b.is_ascii_digit())
            && frac.bytes().all(|b| b.is_ascii_digit())
        {
            if let Ok(real) = value.parse::<f64>() {
                return Value::from(real);
            }
        }
    }
    Value::from(value)
}

fn set_u64(target: &mut u64, value: &str) -> bool {
    match value.parse() {
        Ok(parsed) => {
            *target = parsed;
            true
        }
        Err(_) => false,
    }
}

fn set_f64(target: &mut f64, value: &str) -> bool {
    match value.parse() {
        Ok(parsed) => {
            *target = parsed;
            true
        }
        Err(_) => false,
    }
}

impl NvfixMessage for ExecutionReport {
    fn set_nvfix_field(&mut self, tag: &str, value: &str) -> bool {
        match tag {
            "execid" => self.exec_id = value.to_string(),
            "exectype" => self.exec_type = value.chars().next(),
            "clordid" => self.cl_ord_id = value.to_string(),
            "origclordid" => self.orig_cl_ord_id = value.to_string(),
            "orderid" => self.order_id = value.to_string(),
            "lastqty" => return set_u64(&mut self.last_qty, value),
            "cumqty" => return set_u64(&mut self.cum_qty, value),
            "leavesqty" => return set_u64(&mut self.leaves_qty, value),
            "lastprice" => return set_f64(&mut self.last_price, value),
            "avgprice" => return set_f64(&mut self.avg_price, value),
            "orderstate" => self.order_state = value.to_string(),
            "transacttime" => self.transact_time = value.to_string(),
            "sendingtime" => self.sending_time = value.to_string(),
            "side" => self.side = value.to_string(),
            "symbol" => self.symbol = value.to_string(),
            "currency" => self.currency = value.to_string(),
            _ => return false,
        }
        true
    }

    fn nvfix_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("execid", self.exec_id.clone()),
            ("clordid", self.cl_ord_id.clone()),
            ("origclordid", self.orig_cl_ord_id.clone()),
            ("orderid", self.order_id.clone()),
            ("lastqty", self.last_qty.to_string()),
            ("cumqty", self.cum_qty.to_string()),
            ("leavesqty", self.leaves_qty.to_string()),
            ("lastprice", self.last_price.to_string()),
            ("avgprice", self.avg_price.to_string()),
            ("orderstate", self.order_state.clone()),
            ("transacttime", self.transact_time.clone()),
            ("sendingtime", self.sending_time.clone()),
            ("side", self.side.clone()),
            ("symbol", self.symbol.clone()),
            ("currency", self.currency.clone()),
        ];
        if let Some(exec_type) = self.exec_type {
            fields.insert(1, ("exectype", exec_type.to_string()));
        }
        fields
    }
}

impl NvfixMessage for Order {
    fn set_nvfix_field(&mut self, tag: &str, value: &str) -> bool {
        match tag {
            "orderid" => self.order_id = value.to_string(),
            "currentstate" => match OrderState::parse(value) {
                Some(state) => self.current_state = state,
                None => return false,
            },
            "ordqty" => return set_u64(&mut self.ord_qty, value),
            "fillqty" => return set_u64(&mut self.fill_qty, value),
            "symbol" => self.symbol = value.to_string(),
            "account" => self.account = value.to_string(),
            "currency" => self.currency = value.to_string(),
            "side" => self.side = value.to_string(),
            _ => return false,
        }
        true
    }

    fn nvfix_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("orderid", self.order_id.clone()),
            ("currentstate", self.current_state.as_str().to_string()),
            ("ordqty", self.ord_qty.to_string()),
            ("fillqty", self.fill_qty.to_string()),
            ("symbol", self.symbol.clone()),
            ("account", self.account.clone()),
            ("currency", self.currency.clone()),
            ("side", self.side.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> ExecutionReport {
        ExecutionReport {
            exec_id: "E-77".to_string(),
            exec_type: Some('F'),
            cl_ord_id: "C-1".to_string(),
            orig_cl_ord_id: "C-0".to_string(),
            order_id: "R-1".to_string(),
            last_qty: 25,
            cum_qty: 75,
            leaves_qty: 25,
            last_price: 10.5,
            avg_price: 10.25,
            order_state: "PartiallyFilled".to_string(),
            transact_time: "20250321-14:00:00.000".to_string(),
            sending_time: "20250321-14:00:00.010".to_string(),
            side: "1".to_string(),
            symbol: "ACME".to_string(),
            currency: "USD".to_string(),
        }
    }

    #[test]
    fn nvfix_round_trips_execution_report() {
        let report = sample_report();
        let decoded: ExecutionReport = decode_nvfix(&report.to_nvfix()).unwrap();
        assert_eq!(decoded, report);
    }

    #[test]
    fn nvfix_round_trips_order() {
        let order = Order {
            order_id: "R-9".to_string(),
            current_state: OrderState::PendingFill,
            ord_qty: 400,
            fill_qty: 100,
            symbol: "ACME".to_string(),
            account: "FUND-7".to_string(),
            currency: "USD".to_string(),
            side: "1".to_string(),
            ..Order::default()
        };
        let decoded: Order = decode_nvfix(&order.to_nvfix()).unwrap();
        assert_eq!(decoded, order);
    }

    #[test]
    fn unknown_nvfix_tag_is_skipped() {
        let raw = format!("orderid=R-1{SOH}flavour=blue{SOH}ordqty=10");
        let order: Order = decode_nvfix(&raw).unwrap();
        assert_eq!(order.order_id, "R-1");
        assert_eq!(order.ord_qty, 10);
    }

    #[test]
    fn nvfix_pair_without_separator_fails_whole_parse() {
        let raw = format!("orderid=R-1{SOH}garbage");
        let err = decode_nvfix::<Order>(&raw).unwrap_err();
        assert!(matches!(err, CodecError::MalformedPair { .. }));
    }

    #[test]
    fn hybrid_merges_soh_metadata_with_numeric_promotion() {
        let raw = format!(
            "{{\"id\":\"R-1\",\"currentState\":\"Created\"}}{SOH}SEQ=42{SOH}Px=10.25{SOH}venue=XNYS"
        );
        let value = parse_hybrid(&raw).unwrap();
        assert_eq!(value["id"], "R-1");
        assert_eq!(value["seq"], 42);
        assert_eq!(value["px"], 10.25);
        assert_eq!(value["venue"], "XNYS");
    }

    #[test]
    fn hybrid_brace_scan_honours_strings_and_escapes() {
        let raw = format!(
            "{{\"id\":\"R-{{}}\",\"note\":\"say \\\"}}\\\"\",\"nested\":{{\"a\":1}}}}{SOH}k=v"
        );
        let value = parse_hybrid(&raw).unwrap();
        assert_eq!(value["id"], "R-{}");
        assert_eq!(value["nested"]["a"], 1);
        assert_eq!(value["k"], "v");
    }

    #[test]
    fn hybrid_with_unbalanced_braces_is_rejected() {
        let raw = format!("{{\"id\":\"R-1\"{SOH}k=v");
        assert!(matches!(
            parse_hybrid(&raw).unwrap_err(),
            CodecError::UnterminatedJson(_)
        ));
    }

    #[test]
    fn json_error_carries_original_message() {
        let err = decode_json::<RecallTicket>("not json").unwrap_err();
        match err {
            CodecError::Json { raw, .. } => assert_eq!(raw, "not json"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ticket_decodes_from_plain_and_hybrid_json() {
        let plain = "{\"id\":\"R-1\",\"currentState\":\"Created\",\"recallQty\":100}";
        let ticket = decode_ticket(plain).unwrap();
        assert_eq!(ticket.id, "R-1");
        assert_eq!(ticket.recall_qty, 100);

        let hybrid = format!("{plain}{SOH}region=emea");
        let ticket = decode_ticket(&hybrid).unwrap();
        assert_eq!(ticket.current_state, "Created");
    }

    #[test]
    fn oms_payload_discriminates_on_exec_id() {
        let exec = "{\"execID\":\"E-1\",\"orderID\":\"R-1\",\"cumQty\":10,\"orderState\":\"Filled\"}";
        assert!(matches!(
            decode_oms_payload(exec).unwrap(),
            LogPayload::ExecReport(_)
        ));

        let order = "{\"orderId\":\"R-1\",\"currentState\":\"PendingNew\",\"ordQty\":10}";
        assert!(matches!(
            decode_oms_payload(order).unwrap(),
            LogPayload::Order(_)
        ));

        let nvfix_exec = format!("execid=E-2{SOH}orderid=R-2{SOH}cumqty=5");
        assert!(matches!(
            decode_oms_payload(&nvfix_exec).unwrap(),
            LogPayload::ExecReport(_)
        ));
    }
}
