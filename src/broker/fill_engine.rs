//! Walk-the-book fill engine (spec.md §4.E).
//!
//! Grounded line-by-line on `broker/fill_engine.py`'s `try_fill`. A pure
//! function: never mutates the book or the order, only reports what a fill
//! against the book *would* look like at this `eval_seq`.

use rust_decimal::Decimal;

use crate::book::{L2Book, Side};
use crate::broker::rules::{ConsumedLevel, FillContext, FillRecord, FillStatus, Order};

/// Evaluate whether `order` fills against `book` at `eval_seq`. Returns a
/// `FillRecord` either way — rejections are ordinary values, never an
/// `Err` (spec.md §7: fill rejections are `Ok` values with a populated
/// `reject_reason`).
pub fn try_fill(order: &Order, book: &L2Book, eval_seq: u64, ts_recv: f64) -> FillRecord {
    let reject = |reason: &str| FillRecord {
        order_id: order.order_id.clone(),
        asset_id: order.asset_id.clone(),
        seq: eval_seq,
        ts_recv,
        side: order.side,
        fill_price: Decimal::ZERO,
        fill_size: Decimal::ZERO,
        remaining: order.remaining(),
        fill_status: FillStatus::Rejected,
        reject_reason: Some(reason.to_string()),
        because: FillContext {
            eval_seq,
            book_best_bid: book.best_bid(),
            book_best_ask: book.best_ask(),
            levels_consumed: Vec::new(),
        },
    };

    if !book.is_initialized() {
        return reject("book_not_initialized");
    }

    let levels: Vec<(Decimal, Decimal)> = match order.side {
        Side::Buy => sorted_ask_levels(book, order.limit_price),
        Side::Sell => sorted_bid_levels(book, order.limit_price),
    };

    if levels.is_empty() {
        return reject("no_competitive_levels");
    }

    let mut remaining = order.remaining();
    let mut total_filled = Decimal::ZERO;
    let mut total_notional = Decimal::ZERO;
    let mut consumed = Vec::new();

    for (price, size) in levels {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = size.min(remaining);
        total_filled += take;
        total_notional += price * take;
        consumed.push(ConsumedLevel { price, size: take });
        remaining -= take;
    }

    if total_filled <= Decimal::ZERO {
        return reject("no_competitive_levels");
    }

    let avg_price = total_notional / total_filled;
    let new_remaining = order.remaining() - total_filled;
    let fill_status = if new_remaining <= Decimal::ZERO {
        FillStatus::Full
    } else {
        FillStatus::Partial
    };

    FillRecord {
        order_id: order.order_id.clone(),
        asset_id: order.asset_id.clone(),
        seq: eval_seq,
        ts_recv,
        side: order.side,
        fill_price: avg_price,
        fill_size: total_filled,
        remaining: new_remaining,
        fill_status,
        reject_reason: None,
        because: FillContext {
            eval_seq,
            book_best_bid: book.best_bid(),
            book_best_ask: book.best_ask(),
            levels_consumed: consumed,
        },
    }
}

/// Ask levels at or below `limit_price`, with positive size, cheapest
/// first — the BUY side's walk order.
fn sorted_ask_levels(book: &L2Book, limit_price: Decimal) -> Vec<(Decimal, Decimal)> {
    book.levels_for_side(Side::Sell)
        .iter()
        .filter(|(&price, &size)| size > Decimal::ZERO && price <= limit_price)
        .map(|(&price, &size)| (price, size))
        .collect()
}

/// Bid levels at or above `limit_price`, with positive size, richest
/// first — the SELL side's walk order.
fn sorted_bid_levels(book: &L2Book, limit_price: Decimal) -> Vec<(Decimal, Decimal)> {
    book.levels_for_side(Side::Buy)
        .iter()
        .rev()
        .filter(|(&price, &size)| size > Decimal::ZERO && price >= limit_price)
        .map(|(&price, &size)| (price, size))
        .collect()
}
