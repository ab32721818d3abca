//! Recipient identifier normalisation.

use wagate_common::{Error, Result};

const USER_SUFFIX: &str = "@s.whatsapp.net";
const GROUP_SUFFIX: &str = "@g.us";

/// Strip everything but digits from a phone number.
#[must_use]
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// True when the identifier names a group chat.
#[must_use]
pub fn is_group(jid: &str) -> bool {
    jid.ends_with(GROUP_SUFFIX)
}

/// Canonicalise a destination: full JIDs pass through, anything else is
/// treated as a phone number and normalised to a user JID.
pub fn to_user_jid(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::bad_input("destination is empty"));
    }
    if trimmed.contains('@') {
        return Ok(trimmed.to_string());
    }
    let digits = normalize_phone(trimmed);
    if digits.is_empty() {
        return Err(Error::bad_input(format!(
            "destination is not a phone number: {trimmed}"
        )));
    }
    Ok(format!("{digits}{USER_SUFFIX}"))
}

/// Coerce a group identifier to group-JID form.
pub fn to_group_jid(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::bad_input("group id is empty"));
    }
    if trimmed.ends_with(GROUP_SUFFIX) {
        return Ok(trimmed.to_string());
    }
    if trimmed.contains('@') {
        return Err(Error::bad_input(format!("not a group id: {trimmed}")));
    }
    Ok(format!("{trimmed}{GROUP_SUFFIX}"))
}
