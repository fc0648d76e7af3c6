//! Alert text.

use crate::db::models::{Burn, Holder, Swap};

/// `0x1234...abcd`
pub fn short_address(address: &str) -> String {
    if address.len() <= 10 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

/// Linked username, then label, then the shortened address.
pub fn resolve_address(address: &str, holder: Option<&Holder>) -> String {
    if let Some(holder) = holder {
        if let Some(username) = holder.username.as_deref().filter(|u| !u.is_empty()) {
            return format!("u/{}", username);
        }
        if let Some(label) = holder.label.as_deref().filter(|l| !l.is_empty()) {
            return label.to_string();
        }
    }
    short_address(address)
}

/// Group thousands and keep at most `max_decimals` fraction digits.
pub fn format_amount(value: f64, max_decimals: usize) -> String {
    let formatted = format!("{:.*}", max_decimals, value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, f.trim_end_matches('0')),
        None => (formatted.as_str(), ""),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if value < 0.0 && formatted.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };

    if frac_part.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}.{}", sign, grouped, frac_part)
    }
}

pub fn burn_message(burn: &Burn, sender: &str, explorer_url: &str) -> String {
    format!(
        "🔥 *BURN ALERT!* ({chain}) 🔥\n\n\
         *{amount} MOONs* were just burned!\n\n\
         From: {sender}\n\
         [View Transaction]({explorer}/tx/{hash})",
        chain = burn.chain,
        amount = format_amount(burn.amount, 2),
        sender = sender,
        explorer = explorer_url.trim_end_matches('/'),
        hash = burn.tx_hash,
    )
}

pub fn swap_message(swap: &Swap, maker: &str, explorer_url: &str) -> String {
    let quote = swap.quote_symbol();
    format!(
        "🔄 *SWAP ALERT!* ({dex})\n\n\
         {maker} **{action}** *{moon} MOON*\n\
         For: {quote_amount} {quote}\n\
         Price: {price:.6} {quote}\n\
         [View Transaction]({explorer}/tx/{hash})",
        dex = swap.dex,
        maker = maker,
        action = swap.action,
        moon = format_amount(swap.moon_amount(), 2),
        quote_amount = format_amount(swap.quote_amount(), 6),
        quote = quote,
        price = swap.price(),
        explorer = explorer_url.trim_end_matches('/'),
        hash = swap.tx_hash,
    )
}
