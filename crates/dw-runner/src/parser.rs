//! Feed protocol glue — subscription requests and frame parsing.
//!
//! This is the transport-specific collaborator the core stays independent
//! of: it turns raw JSON frames into [`FeedMessage`]s and builds the
//! subscription/heartbeat payloads for [`StreamSpec`]. Numeric fields
//! arrive as decimal strings and are parsed here, once — nothing past this
//! point re-reads raw payloads.
//!
//! Frame shapes:
//!
//! ```json
//! {"op":"ping"} / {"op":"pong"}
//! {"event":"subscribed","topic":"book.BTCUSDT"}
//! {"topic":"book.BTCUSDT","type":"snapshot","data":{"b":[["100","1.5"]],"a":[],"u":7,"ts":1700000000000}}
//! {"topic":"trades.BTCUSDT","data":[{"p":"100","s":"0.5","side":"buy","ts":1700000000000}]}
//! {"topic":"candle.1m.BTCUSDT","data":{"o":"1","h":"2","l":"0.5","c":"1.5","v":"100","ts":1700000000000}}
//! ```

use std::collections::HashMap;

use dw_core::config::FeedConfig;
use dw_core::types::{
    BookLevel, BookUpdate, BookUpdateKind, CandleRecord, FeedMessage, TradeSide, TradeTick,
};
use dw_md::StreamSpec;
use serde_json::{Value, json};

/// Build the stream spec for the configured feed.
pub fn stream_spec(cfg: &FeedConfig) -> StreamSpec {
    StreamSpec {
        label: "feed".into(),
        subscribe_msgs: vec![build_subscribe(&cfg.symbols)],
        ping_payload: json!({"op": "ping"}).to_string(),
        pong_payload: json!({"op": "pong"}).to_string(),
        extra_headers: HashMap::new(),
        parser: Box::new(|text| parse_frame(text)),
    }
}

/// Build one subscription request covering all streams for all symbols.
fn build_subscribe(symbols: &[String]) -> String {
    let args: Vec<String> = symbols
        .iter()
        .flat_map(|s| vec![format!("book.{s}"), format!("trades.{s}"), format!("candle.1m.{s}")])
        .collect();

    json!({"op": "subscribe", "args": args}).to_string()
}

/// Parse one text frame into zero or more messages.
///
/// Unparseable frames yield nothing; recognized-but-unrouted frames yield
/// [`FeedMessage::Unhandled`] so the engine can count them.
pub fn parse_frame(text: &str) -> Vec<FeedMessage> {
    let v: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    if let Some(op) = v.get("op").and_then(|o| o.as_str()) {
        return match op {
            "ping" => vec![FeedMessage::HeartbeatIn],
            "pong" => vec![FeedMessage::HeartbeatAck],
            other => vec![FeedMessage::Unhandled { topic: other.to_string() }],
        };
    }

    if v.get("event").and_then(|e| e.as_str()) == Some("subscribed") {
        let topic = v.get("topic").and_then(|t| t.as_str()).unwrap_or("").to_string();
        return vec![FeedMessage::SubscriptionAck { topic }];
    }

    let Some(topic) = v.get("topic").and_then(|t| t.as_str()) else {
        return Vec::new();
    };

    if let Some(symbol) = topic.strip_prefix("book.") {
        return parse_book(&v, symbol).into_iter().collect();
    }
    if let Some(symbol) = topic.strip_prefix("trades.") {
        return parse_trades(&v, symbol);
    }
    if let Some(rest) = topic.strip_prefix("candle.") {
        return parse_candle(&v, rest).into_iter().collect();
    }

    vec![FeedMessage::Unhandled { topic: topic.to_string() }]
}

fn parse_book(v: &Value, symbol: &str) -> Option<FeedMessage> {
    let data = v.get("data")?;
    let kind = match v.get("type").and_then(|t| t.as_str())? {
        "snapshot" => BookUpdateKind::Snapshot,
        "delta" => BookUpdateKind::Delta,
        _ => return None,
    };

    Some(FeedMessage::Book(BookUpdate {
        symbol: symbol.to_string(),
        kind,
        bids: parse_levels(data.get("b")),
        asks: parse_levels(data.get("a")),
        update_id: data.get("u").and_then(|u| u.as_u64()).unwrap_or(0),
        timestamp_ms: data.get("ts").and_then(|t| t.as_u64()).unwrap_or(0),
    }))
}

fn parse_trades(v: &Value, symbol: &str) -> Vec<FeedMessage> {
    let Some(items) = v.get("data").and_then(|d| d.as_array()) else {
        return Vec::new();
    };
    let ticks: Vec<TradeTick> = items
        .iter()
        .filter_map(|item| {
            Some(TradeTick {
                symbol: symbol.to_string(),
                timestamp_ms: item.get("ts")?.as_u64()?,
                price: parse_str_f64(item.get("p"))?,
                size: parse_str_f64(item.get("s"))?,
                side: match item.get("side")?.as_str()? {
                    "buy" => TradeSide::Buy,
                    "sell" => TradeSide::Sell,
                    _ => return None,
                },
            })
        })
        .collect();

    if ticks.is_empty() { Vec::new() } else { vec![FeedMessage::TradeTicks(ticks)] }
}

fn parse_candle(v: &Value, topic_rest: &str) -> Option<FeedMessage> {
    // topic is "candle.<timeframe>.<symbol>"
    let (timeframe, symbol) = topic_rest.split_once('.')?;
    let data = v.get("data")?;

    Some(FeedMessage::Candle(CandleRecord {
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        timestamp_ms: data.get("ts")?.as_u64()?,
        open: parse_str_f64(data.get("o"))?,
        high: parse_str_f64(data.get("h"))?,
        low: parse_str_f64(data.get("l"))?,
        close: parse_str_f64(data.get("c"))?,
        volume: parse_str_f64(data.get("v"))?,
    }))
}

/// Parse `[["price","size"], ...]` into levels. Malformed entries are skipped.
fn parse_levels(v: Option<&Value>) -> Vec<BookLevel> {
    let Some(items) = v.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|pair| {
            let pair = pair.as_array()?;
            Some(BookLevel::new(
                parse_str_f64(pair.first())?,
                parse_str_f64(pair.get(1))?,
            ))
        })
        .collect()
}

/// Parse a JSON value holding a decimal string (or plain number) as f64.
fn parse_str_f64(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_covers_all_streams() {
        let msg = build_subscribe(&["BTCUSDT".to_string()]);
        let v: Value = serde_json::from_str(&msg).unwrap();
        let args: Vec<&str> =
            v["args"].as_array().unwrap().iter().map(|a| a.as_str().unwrap()).collect();
        assert_eq!(args, vec!["book.BTCUSDT", "trades.BTCUSDT", "candle.1m.BTCUSDT"]);
    }

    #[test]
    fn heartbeats_parse_to_both_directions() {
        assert!(matches!(parse_frame(r#"{"op":"ping"}"#).as_slice(), [FeedMessage::HeartbeatIn]));
        assert!(matches!(parse_frame(r#"{"op":"pong"}"#).as_slice(), [FeedMessage::HeartbeatAck]));
    }

    #[test]
    fn book_snapshot_parses_levels_and_ids() {
        let frame = r#"{
            "topic": "book.BTCUSDT", "type": "snapshot",
            "data": {"b": [["100.5","1.5"],["100.0","2"]], "a": [["101.0","0.7"]], "u": 42, "ts": 1700000000000}
        }"#;
        let msgs = parse_frame(frame);
        let [FeedMessage::Book(update)] = msgs.as_slice() else {
            panic!("expected one book message");
        };
        assert_eq!(update.kind, BookUpdateKind::Snapshot);
        assert_eq!(update.symbol, "BTCUSDT");
        assert_eq!(update.bids.len(), 2);
        assert_eq!(update.bids[0].price, 100.5);
        assert_eq!(update.asks[0].size, 0.7);
        assert_eq!(update.update_id, 42);
    }

    #[test]
    fn trades_parse_sides_and_skip_malformed() {
        let frame = r#"{
            "topic": "trades.ETHUSDT",
            "data": [
                {"p": "2000.1", "s": "0.5", "side": "buy", "ts": 1700000000000},
                {"p": "oops", "s": "0.5", "side": "buy", "ts": 1700000000000},
                {"p": "2000.2", "s": "1.5", "side": "sell", "ts": 1700000000001}
            ]
        }"#;
        let msgs = parse_frame(frame);
        let [FeedMessage::TradeTicks(ticks)] = msgs.as_slice() else {
            panic!("expected one trades message");
        };
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].side, TradeSide::Buy);
        assert_eq!(ticks[1].price, 2000.2);
    }

    #[test]
    fn candle_topic_carries_timeframe_and_symbol() {
        let frame = r#"{
            "topic": "candle.1m.BTCUSDT",
            "data": {"o": "1", "h": "2", "l": "0.5", "c": "1.5", "v": "100", "ts": 1700000000000}
        }"#;
        let msgs = parse_frame(frame);
        let [FeedMessage::Candle(candle)] = msgs.as_slice() else {
            panic!("expected one candle");
        };
        assert_eq!(candle.symbol, "BTCUSDT");
        assert_eq!(candle.timeframe, "1m");
        assert_eq!(candle.close, 1.5);
    }

    #[test]
    fn junk_and_unknown_topics_do_not_panic() {
        assert!(parse_frame("not json at all").is_empty());
        assert!(parse_frame(r#"{"foo": 1}"#).is_empty());
        assert!(matches!(
            parse_frame(r#"{"topic": "funding.BTCUSDT", "data": {}}"#).as_slice(),
            [FeedMessage::Unhandled { .. }]
        ));
    }
}
