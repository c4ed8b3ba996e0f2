//! Centralized input validation.
//!
//! Everything here runs before a request touches the store.

use crate::{crypto::TOKEN_LENGTH, error::ValidationError, order::LineItem};

pub const MAX_TABLE_NUMBER: u32 = 10_000;
pub const MAX_STAFF_ID_LENGTH: usize = 128;
pub const MAX_LINE_ITEMS: usize = 100;
pub const MAX_QUANTITY: u32 = 99;
pub const MAX_UNIT_PRICE_CENTS: i64 = 1_000_000;
pub const MAX_NOTES_LENGTH: usize = 500;
pub const MAX_CLEANUP_DAYS: i64 = 3650;
pub const MAX_TOP_LIMIT: usize = 100;

pub fn validate_table_number(table_number: u32) -> Result<(), ValidationError> {
    if table_number == 0 || table_number > MAX_TABLE_NUMBER {
        return Err(ValidationError::InvalidTableNumber(format!(
            "{table_number} (must be between 1 and {MAX_TABLE_NUMBER})"
        )));
    }
    Ok(())
}

pub fn validate_staff_id(id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::MissingField(
            "Staff id is required".to_string(),
        ));
    }
    if id.len() > MAX_STAFF_ID_LENGTH {
        return Err(ValidationError::InvalidStaffId(
            "Staff id is too long".to_string(),
        ));
    }
    Ok(())
}

/// Tokens are 43 characters of unpadded base64url.
pub fn validate_token(token: &str) -> Result<(), ValidationError> {
    if token.len() != TOKEN_LENGTH {
        return Err(ValidationError::InvalidToken(
            "Token has the wrong length".to_string(),
        ));
    }
    if !token
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(ValidationError::InvalidToken(
            "Token contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_line_items(items: &[LineItem]) -> Result<(), ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::MissingField(
            "An order needs at least one item".to_string(),
        ));
    }
    if items.len() > MAX_LINE_ITEMS {
        return Err(ValidationError::InvalidLineItem(format!(
            "At most {MAX_LINE_ITEMS} items per order"
        )));
    }

    for item in items {
        if item.name.trim().is_empty() || item.menu_item_id.trim().is_empty() {
            return Err(ValidationError::InvalidLineItem(
                "Item name and menu item id are required".to_string(),
            ));
        }
        if item.quantity == 0 || item.quantity > MAX_QUANTITY {
            return Err(ValidationError::InvalidLineItem(format!(
                "Quantity for {} must be between 1 and {MAX_QUANTITY}",
                item.name
            )));
        }
        if !(0..=MAX_UNIT_PRICE_CENTS).contains(&item.unit_price_cents) {
            return Err(ValidationError::InvalidLineItem(format!(
                "Price for {} is out of range",
                item.name
            )));
        }
    }

    Ok(())
}

pub fn validate_notes(notes: Option<&str>) -> Result<(), ValidationError> {
    match notes {
        Some(n) if n.chars().count() > MAX_NOTES_LENGTH => Err(ValidationError::InvalidField(
            format!("Notes must be at most {MAX_NOTES_LENGTH} characters"),
        )),
        _ => Ok(()),
    }
}

pub fn validate_cleanup_days(days: i64) -> Result<(), ValidationError> {
    if !(0..=MAX_CLEANUP_DAYS).contains(&days) {
        return Err(ValidationError::InvalidField(format!(
            "days must be between 0 and {MAX_CLEANUP_DAYS}"
        )));
    }
    Ok(())
}

pub fn validate_top_limit(limit: usize) -> Result<(), ValidationError> {
    if limit == 0 || limit > MAX_TOP_LIMIT {
        return Err(ValidationError::InvalidField(format!(
            "limit must be between 1 and {MAX_TOP_LIMIT}"
        )));
    }
    Ok(())
}
